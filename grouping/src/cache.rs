// Cache for parsed rule sets. Keys are derived from the content of the rules
// and a format version, so entries never need to expire.
use bytes::Bytes;
use moka::sync::Cache as MokaCache;

use crate::config::CacheConfig;

pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Option<Bytes>;
    fn set(&self, key: &str, value: Bytes);
}

pub struct MemoryCache {
    cache: MokaCache<String, Bytes>,
}

impl MemoryCache {
    pub fn new(config: &CacheConfig) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(config.max_capacity)
            .build();

        MemoryCache { cache }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        MemoryCache::new(&CacheConfig::default())
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Option<Bytes> {
        self.cache.get(key)
    }

    fn set(&self, key: &str, value: Bytes) {
        self.cache.insert(key.to_string(), value);
    }
}
