//! 单个订单发票数据的缓存，键为 `invoice_cache_<订单号>`，与采集缓存同样 24 小时过期

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::persistent::DEFAULT_TTL;
use super::store::KeyValueStore;
use crate::core::Clock;
use crate::export::OrderInvoice;

const KEY_PREFIX: &str = "invoice_cache_";
/// 已缓存订单号的索引，用于列出与全部清除
const INDEX_KEY: &str = "invoice_cache_index";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedInvoice {
    data: OrderInvoice,
    timestamp: i64,
}

#[derive(Clone)]
pub struct InvoiceCache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl InvoiceCache {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn key(order_number: &str) -> String {
        format!("{KEY_PREFIX}{order_number}")
    }

    /// 未命中、已过期或读取失败都返回 None
    pub async fn get(&self, order_number: &str) -> Option<OrderInvoice> {
        let key = Self::key(order_number);
        let value = match self.store.get(&key).await {
            Ok(Some(v)) => v,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(%key, "Invoice cache read failed: {}", e);
                return None;
            }
        };
        let cached: CachedInvoice = match serde_json::from_value(value) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(%key, "Ignoring malformed invoice cache entry: {}", e);
                return None;
            }
        };
        if self.clock.now_ms() - cached.timestamp > self.ttl.as_millis() as i64 {
            tracing::debug!(order_number, "Invoice cache expired");
            self.remove(order_number).await;
            return None;
        }
        Some(cached.data)
    }

    pub async fn put(&self, order_number: &str, invoice: &OrderInvoice) {
        let entry = CachedInvoice {
            data: invoice.clone(),
            timestamp: self.clock.now_ms(),
        };
        let key = Self::key(order_number);
        let result = match serde_json::to_value(&entry) {
            Ok(v) => self.store.set(&key, v).await,
            Err(e) => Err(e.into()),
        };
        match result {
            Ok(()) => {
                let mut index = self.index().await;
                if index.insert(order_number.to_string()) {
                    self.write_index(&index).await;
                }
            }
            Err(e) => tracing::warn!(%key, "Invoice cache write failed: {}", e),
        }
    }

    pub async fn remove(&self, order_number: &str) {
        let key = Self::key(order_number);
        if let Err(e) = self.store.remove(&key).await {
            tracing::warn!(%key, "Invoice cache remove failed: {}", e);
        }
        let mut index = self.index().await;
        if index.remove(order_number) {
            self.write_index(&index).await;
        }
    }

    /// 索引中记录的订单号（可能包含已过期但尚未读取过的条目）
    pub async fn cached_orders(&self) -> Vec<String> {
        self.index().await.into_iter().collect()
    }

    pub async fn clear_all(&self) {
        let index = self.index().await;
        for order_number in &index {
            if let Err(e) = self.store.remove(&Self::key(order_number)).await {
                tracing::warn!(order_number, "Invoice cache remove failed: {}", e);
            }
        }
        if let Err(e) = self.store.remove(INDEX_KEY).await {
            tracing::warn!("Invoice cache index remove failed: {}", e);
        }
        tracing::info!(count = index.len(), "Invoice cache cleared");
    }

    async fn index(&self) -> BTreeSet<String> {
        match self.store.get(INDEX_KEY).await {
            Ok(Some(v)) => serde_json::from_value(v).unwrap_or_default(),
            Ok(None) => BTreeSet::new(),
            Err(e) => {
                tracing::warn!("Invoice cache index read failed: {}", e);
                BTreeSet::new()
            }
        }
    }

    async fn write_index(&self, index: &BTreeSet<String>) {
        let result = match serde_json::to_value(index) {
            Ok(v) => self.store.set(INDEX_KEY, v).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!("Invoice cache index write failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::core::ManualClock;

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, InvoiceCache) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let cache = InvoiceCache::new(store.clone(), clock.clone());
        (store, clock, cache)
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let (store, _clock, cache) = setup();
        let invoice = OrderInvoice::new("123", "Jan 1");
        cache.put("123", &invoice).await;
        assert_eq!(cache.get("123").await, Some(invoice));
        assert!(store.get("invoice_cache_123").await.unwrap().is_some());
        assert_eq!(cache.cached_orders().await, vec!["123"]);

        cache.remove("123").await;
        assert!(cache.get("123").await.is_none());
        assert!(cache.cached_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_expired_invoice_is_dropped() {
        let (_store, clock, cache) = setup();
        cache.put("123", &OrderInvoice::new("123", "")).await;
        clock.advance(DEFAULT_TTL + Duration::from_secs(1));
        assert!(cache.get("123").await.is_none());
        assert!(cache.cached_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_all() {
        let (store, _clock, cache) = setup();
        cache.put("1", &OrderInvoice::new("1", "")).await;
        cache.put("2", &OrderInvoice::new("2", "")).await;
        cache.clear_all().await;
        assert!(store.is_empty().await);
    }
}
