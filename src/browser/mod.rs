//! 浏览器协作方：标签页生命周期与页面代理
//!
//! - **tab**: TabDriver 能力（打开、导航、等待加载、关闭）
//! - **agent**: PageAgent 契约（提取订单号、翻页、抓取发票）
//! - **mock**: 脚本化实现，用于测试
//! - **headless**: headless_chrome 实现（feature "browser"）

pub mod agent;
#[cfg(feature = "browser")]
pub mod headless;
pub mod mock;
pub mod tab;

pub use agent::{ClickResult, OrderPage, PageAgent};
#[cfg(feature = "browser")]
pub use headless::HeadlessBrowser;
pub use mock::ScriptedBrowser;
pub use tab::{TabDriver, TabEvent, TabId};
