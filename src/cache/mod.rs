//! 持久缓存：键值存储后端、采集状态缓存、发票缓存

pub mod file_store;
pub mod invoice_cache;
pub mod persistent;
pub mod sqlite_store;
pub mod store;

use std::sync::Arc;

pub use file_store::JsonFileStore;
pub use invoice_cache::InvoiceCache;
pub use persistent::{CacheBlob, PersistentCache, DEFAULT_CACHE_KEY, DEFAULT_TTL};
pub use sqlite_store::SqliteStore;
pub use store::{KeyValueStore, MemoryStore, StoreError};

use crate::config::{CacheBackend, CacheSection};

/// 按配置创建存储后端；SQLite 打开失败时退回内存存储
pub fn create_store(section: &CacheSection) -> Arc<dyn KeyValueStore> {
    match section.backend {
        CacheBackend::Memory => {
            tracing::info!("Using in-memory cache store");
            Arc::new(MemoryStore::new())
        }
        CacheBackend::File => {
            tracing::info!("Using JSON file cache store: {:?}", section.path);
            Arc::new(JsonFileStore::new(&section.path))
        }
        CacheBackend::Sqlite => match SqliteStore::open(&section.path) {
            Ok(store) => {
                tracing::info!("Using SQLite cache store: {:?}", section.path);
                Arc::new(store)
            }
            Err(e) => {
                tracing::warn!("Failed to open SQLite cache, falling back to memory: {}", e);
                Arc::new(MemoryStore::new())
            }
        },
    }
}
