//! C6: the two-tier cache (response cache, backend cache) and its three
//! backends. Both tiers speak the same [`Cache`] trait; which backend is live
//! for each tier is decided purely by [`crate::config::CacheConf::cache_type`].

pub mod memcache;
pub mod memory;
pub mod null;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{CacheConf, CacheType};

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration);
}

pub fn build_cache(conf: &CacheConf) -> Arc<dyn Cache> {
    match conf.cache_type {
        CacheType::Mem => Arc::new(memory::MemoryCache::new(conf.size_limit_bytes)),
        CacheType::Memcache => Arc::new(memcache::MemcacheCache::new(conf.memcache_servers.clone())),
        CacheType::Null => Arc::new(null::NullCache),
    }
}

/// Chooses the TTL for a cached render response: queries whose `until` is
/// recent (within `short_duration_sec` of "now", with `short_until_offset_sec`
/// slack) get the short TTL, since they're likely to still be filling in;
/// older, settled windows get the long default TTL.
pub fn response_ttl(conf: &CacheConf, until: i64, now: i64) -> Duration {
    if now - until < conf.short_duration_sec + conf.short_until_offset_sec {
        Duration::from_secs(conf.short_timeout_sec)
    } else {
        Duration::from_secs(conf.default_timeout_sec)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn recent_window_gets_short_ttl() {
        let conf = CacheConf {
            cache_type: CacheType::Mem,
            default_timeout_sec: 60,
            short_timeout_sec: 5,
            short_duration_sec: 3600,
            short_until_offset_sec: 120,
            memcache_servers: vec![],
            size_limit_bytes: 1024,
        };
        let ttl = response_ttl(&conf, 1000, 1000);
        assert_eq!(ttl, Duration::from_secs(5));
    }

    #[test]
    fn settled_window_gets_default_ttl() {
        let conf = CacheConf {
            cache_type: CacheType::Mem,
            default_timeout_sec: 60,
            short_timeout_sec: 5,
            short_duration_sec: 3600,
            short_until_offset_sec: 120,
            memcache_servers: vec![],
            size_limit_bytes: 1024,
        };
        let ttl = response_ttl(&conf, 0, 10_000);
        assert_eq!(ttl, Duration::from_secs(60));
    }
}
