//! 采集策略：重试预算与固定延迟
//!
//! 重试/退避是纯数据：给定当前重试计数，返回「延迟后重试」或「放弃」，不依赖任何计时器。

use std::time::Duration;

use crate::config::CollectionSection;

/// 状态机使用的策略参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionPolicy {
    /// 每页最多重试次数（不含首次尝试）
    pub max_retries: u32,
    /// 页面加载完成后、提取前的稳定等待
    pub settle_delay: Duration,
    /// 失败后重试前的固定退避
    pub retry_delay: Duration,
    /// 翻页点击前的间隔；为 0 时直接点击
    pub advance_delay: Duration,
}

impl Default for CollectionPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            settle_delay: Duration::from_millis(100),
            retry_delay: Duration::from_millis(100),
            advance_delay: Duration::ZERO,
        }
    }
}

/// 失败后的决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 第 attempt 次重试，等待 delay 后执行
    RetryAfter { attempt: u32, delay: Duration },
    /// 重试预算耗尽，结束本轮
    GiveUp,
}

impl CollectionPolicy {
    pub fn from_config(section: &CollectionSection) -> Self {
        Self {
            max_retries: section.max_retries,
            settle_delay: Duration::from_millis(section.settle_delay_ms),
            retry_delay: Duration::from_millis(section.retry_delay_ms),
            advance_delay: Duration::from_millis(section.advance_delay_ms),
        }
    }

    /// retry_count 为本页已用掉的重试次数
    pub fn on_failure(&self, retry_count: u32) -> RetryDecision {
        if retry_count < self.max_retries {
            RetryDecision::RetryAfter {
                attempt: retry_count + 1,
                delay: self.retry_delay,
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}
