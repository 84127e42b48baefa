//! 时钟与调度抽象
//!
//! 引擎中的所有等待（页面稳定、重试退避、翻页间隔）与时间戳都经由 Clock，
//! 测试中注入 ManualClock 即可在不依赖真实计时器的情况下驱动完整流程。

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

/// 时钟 trait：当前时间（毫秒时间戳）与异步等待
#[async_trait]
pub trait Clock: Send + Sync {
    /// 当前时间（Unix 毫秒）
    fn now_ms(&self) -> i64;

    /// 等待指定时长
    async fn sleep(&self, duration: Duration);
}

/// 真实时钟：chrono 取时间，tokio 计时器等待
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// 手动时钟（用于测试）：时间只在调用 advance/set 时变化，sleep 立即返回并记录时长
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    /// 迄今为止所有 sleep 调用的时长
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        tokio::task::yield_now().await;
    }
}
