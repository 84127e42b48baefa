//! 协作方错误类型与失败分类
//!
//! 与 CollectionMachine 配合：根据 FailureClass 决定重试当前步骤，还是直接结束本轮采集。

use thiserror::Error;

/// 页面代理（Page Agent）调用失败：无响应、元素未找到、返回格式错误、标签页已关闭等
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentFailure {
    #[error("Page agent did not respond")]
    NoResponse,

    #[error("Page agent error: {0}")]
    Agent(String),

    #[error("Malformed agent response: {0}")]
    Malformed(String),

    #[error("Pagination click rejected")]
    ClickRejected,

    #[error("Tab is closed")]
    TabClosed,
}

/// 标签页生命周期失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TabError {
    #[error("Tab creation failed: {0}")]
    CreateFailed(String),

    #[error("Tab already closed")]
    AlreadyClosed,

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Browser driver error: {0}")]
    Driver(String),
}

/// 失败分类：瞬时失败走重试预算，生命周期失败直接进入 Finishing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// 代理不可达、元素未找到、点击被拒：按重试策略处理
    Transient,
    /// 没有标签页就无法再联系代理：结束本轮
    RunEnding,
}

impl AgentFailure {
    pub fn class(&self) -> FailureClass {
        match self {
            AgentFailure::TabClosed => FailureClass::RunEnding,
            _ => FailureClass::Transient,
        }
    }
}

impl From<TabError> for AgentFailure {
    fn from(err: TabError) -> Self {
        match err {
            TabError::AlreadyClosed => AgentFailure::TabClosed,
            other => AgentFailure::Agent(other.to_string()),
        }
    }
}
