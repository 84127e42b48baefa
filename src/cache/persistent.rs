//! 采集状态的持久缓存（带过期）
//!
//! 存储失败一律记日志并视为未命中，不会中断采集。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::store::KeyValueStore;
use crate::config::CacheSection;
use crate::core::{Clock, CollectionState, PageRecord};

/// 默认缓存键
pub const DEFAULT_CACHE_KEY: &str = "walmart_order_cache";

/// 默认过期时间：24 小时
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// 持久化布局：`{orderNumbers, additionalFields, pagesCached, timestamp}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheBlob {
    pub order_numbers: Vec<String>,
    #[serde(default)]
    pub additional_fields: BTreeMap<String, String>,
    /// JSON 中页号为字符串键
    #[serde(default)]
    pub pages_cached: BTreeMap<u32, PageRecord>,
    pub timestamp: i64,
}

impl CacheBlob {
    fn from_state(state: &CollectionState, timestamp: i64) -> Self {
        Self {
            order_numbers: state.order_numbers.iter().cloned().collect(),
            additional_fields: state.additional_fields.clone(),
            pages_cached: state.pages_cached.clone(),
            timestamp,
        }
    }
}

/// 持久缓存：load / save / clear
#[derive(Clone)]
pub struct PersistentCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    key: String,
    ttl: Duration,
}

impl PersistentCache {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            key: DEFAULT_CACHE_KEY.to_string(),
            ttl: DEFAULT_TTL,
        }
    }

    pub fn from_config(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        section: &CacheSection,
    ) -> Self {
        Self::new(store, clock)
            .with_key(&section.key)
            .with_ttl(Duration::from_secs(section.expiration_hours * 60 * 60))
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.key = key.to_string();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 从存储恢复累计结果与页缓存。
    ///
    /// - 无记录：不做任何事
    /// - 已过期：删除记录并清空内存中的累计结果
    /// - 采集进行中：内存状态为准，不做恢复
    pub async fn load(&self, state: &mut CollectionState) {
        if state.is_collecting {
            tracing::debug!("Skipping cache load during active collection");
            return;
        }

        let value = match self.store.get(&self.key).await {
            Ok(Some(v)) => v,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(key = %self.key, "Cache read failed: {}", e);
                return;
            }
        };

        let blob: CacheBlob = match serde_json::from_value(value) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(key = %self.key, "Ignoring malformed cache entry: {}", e);
                return;
            }
        };

        let age_ms = self.clock.now_ms() - blob.timestamp;
        if age_ms > self.ttl.as_millis() as i64 {
            tracing::info!(age_ms, "Cache expired, clearing");
            if let Err(e) = self.store.remove(&self.key).await {
                tracing::warn!(key = %self.key, "Failed to remove expired cache: {}", e);
            }
            state.clear_all();
            state.cache_timestamp = None;
            return;
        }

        tracing::debug!(
            orders = blob.order_numbers.len(),
            pages = blob.pages_cached.len(),
            "Loaded collection cache"
        );
        state.order_numbers = blob.order_numbers.into_iter().collect();
        state.additional_fields = blob.additional_fields;
        state.pages_cached = blob.pages_cached;
        state.cache_timestamp = Some(blob.timestamp);
    }

    /// 将当前累计结果整体写入存储
    pub async fn save(&self, state: &mut CollectionState) {
        let now = self.clock.now_ms();
        let blob = CacheBlob::from_state(state, now);
        let value = match serde_json::to_value(&blob) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Failed to serialize cache: {}", e);
                return;
            }
        };
        match self.store.set(&self.key, value).await {
            Ok(()) => {
                state.cache_timestamp = Some(now);
                tracing::debug!(
                    orders = blob.order_numbers.len(),
                    pages = blob.pages_cached.len(),
                    "Collection cache saved"
                );
            }
            Err(e) => tracing::warn!(key = %self.key, "Cache write failed: {}", e),
        }
    }

    /// 删除存储记录并清空内存中的累计结果
    pub async fn clear(&self, state: &mut CollectionState) {
        if let Err(e) = self.store.remove(&self.key).await {
            tracing::warn!(key = %self.key, "Cache remove failed: {}", e);
        }
        state.clear_all();
        state.cache_timestamp = None;
        tracing::info!("Collection cache cleared");
    }
}
