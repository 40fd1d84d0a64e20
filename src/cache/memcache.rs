//! Memcache-backed cache tier, backed by the `async-memcached` client.
//!
//! Connections are opened lazily and re-opened on the next call after any
//! protocol or I/O error — there is no persistent connection pool, just one
//! guarded connection per configured server, picked round-robin. Cache
//! failures are never fatal to the request: `get` degrades to a miss and
//! `set` is best-effort, matching the donor's "cache is an optimization, not
//! a dependency" stance.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::Cache;

struct Slot {
    addr: String,
    client: Mutex<Option<async_memcached::Client>>,
}

pub struct MemcacheCache {
    slots: Vec<Slot>,
    round_robin: AtomicUsize,
}

impl MemcacheCache {
    pub fn new(servers: Vec<String>) -> Self {
        MemcacheCache {
            slots: servers
                .into_iter()
                .map(|addr| Slot {
                    addr,
                    client: Mutex::new(None),
                })
                .collect(),
            round_robin: AtomicUsize::new(0),
        }
    }

    fn pick(&self) -> Option<&Slot> {
        if self.slots.is_empty() {
            return None;
        }
        let idx = self.round_robin.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        self.slots.get(idx)
    }
}

#[async_trait]
impl Cache for MemcacheCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let slot = self.pick()?;
        let mut guard = slot.client.lock().await;
        if guard.is_none() {
            *guard = async_memcached::Client::new(slot.addr.as_str()).await.ok();
        }
        let client = guard.as_mut()?;
        match client.get(key).await {
            Ok(Some(value)) => Some(value.data),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(server = %slot.addr, error = %e, "memcache get failed");
                *guard = None;
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let Some(slot) = self.pick() else { return };
        let mut guard = slot.client.lock().await;
        if guard.is_none() {
            *guard = async_memcached::Client::new(slot.addr.as_str()).await.ok();
        }
        let Some(client) = guard.as_mut() else { return };
        if let Err(e) = client
            .set(key, value.as_slice(), Some(ttl.as_secs() as i64), None)
            .await
        {
            tracing::warn!(server = %slot.addr, error = %e, "memcache set failed");
            *guard = None;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn no_servers_configured_always_misses() {
        let c = MemcacheCache::new(vec![]);
        assert!(c.get("k").await.is_none());
        c.set("k", vec![1], Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn unreachable_server_degrades_to_a_miss() {
        let c = MemcacheCache::new(vec!["127.0.0.1:1".to_string()]);
        assert!(c.get("k").await.is_none());
    }
}
