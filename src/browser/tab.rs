//! 标签页生命周期能力：打开、导航、等待加载完成、关闭
//!
//! 引擎只调用这些原语，不关心背后是 Chrome 扩展 API、CDP 还是测试替身。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::TabError;

/// 标签页句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u32);

impl std::fmt::Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tab#{}", self.0)
    }
}

/// 等待加载时观察到的事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabEvent {
    /// 页面加载完成（status = complete）
    Loaded,
    /// 标签页已被关闭（用户手动关闭或浏览器回收）
    Closed,
}

/// 标签页驱动 trait
#[async_trait]
pub trait TabDriver: Send + Sync {
    /// 在后台打开新标签页并开始加载 url
    async fn open(&self, url: &str) -> Result<TabId, TabError>;

    /// 让已有标签页导航到新 url
    async fn navigate(&self, tab: TabId, url: &str) -> Result<(), TabError>;

    /// 等待下一次加载完成；标签页消失时返回 Closed
    async fn wait_for_load(&self, tab: TabId) -> Result<TabEvent, TabError>;

    /// 关闭标签页；已关闭时返回 AlreadyClosed，调用方可忽略
    async fn close(&self, tab: TabId) -> Result<(), TabError>;
}
