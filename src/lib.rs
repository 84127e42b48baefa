//! Invoice Exporter - 订单历史批量采集与发票导出
//!
//! 模块划分：
//! - **browser**: 标签页驱动与页面代理（脚本化替身 / headless Chrome）
//! - **cache**: 键值存储后端（内存 / JSON 文件 / SQLite）、采集缓存与发票缓存
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **control**: 控制面消息协议与 ControlSurface 句柄
//! - **core**: 采集状态、重试策略、显式状态机、时钟与采集 actor
//! - **export**: 发票批量下载与 CSV 导出
//! - **observability**: tracing 日志初始化

pub mod browser;
pub mod cache;
pub mod config;
pub mod control;
pub mod core;
pub mod export;
pub mod observability;

pub use control::{ControlRequest, ControlSurface};
pub use core::{spawn_collector, CollectorDeps};
