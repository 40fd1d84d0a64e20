//! In-process expiring cache. Entries are checked for expiry lazily, on read;
//! there is no background sweeper. A running total of stored bytes caps
//! growth: once `size_limit_bytes` would be exceeded, the oldest entries are
//! evicted (insertion order) until the new entry fits.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::Cache;

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
    inserted_at: Instant,
}

pub struct MemoryCache {
    size_limit_bytes: usize,
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new(size_limit_bytes: usize) -> Self {
        MemoryCache {
            size_limit_bytes,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn items(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn size_bytes(&self) -> usize {
        self.entries.read().unwrap().values().map(|e| e.value.len()).sum()
    }

    fn evict_to_fit(&self, entries: &mut BTreeMap<String, Entry>, incoming: usize) {
        if self.size_limit_bytes == 0 {
            return;
        }
        let mut total: usize = entries.values().map(|e| e.value.len()).sum();
        while total + incoming > self.size_limit_bytes {
            let oldest_key = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone());
            match oldest_key {
                Some(k) => {
                    if let Some(removed) = entries.remove(&k) {
                        total -= removed.value.len();
                    }
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap();
        match entries.get(key) {
            Some(e) if e.expires_at > now => Some(e.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let mut entries = self.entries.write().unwrap();
        self.evict_to_fit(&mut entries, value.len());
        let now = Instant::now();
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
                inserted_at: now,
            },
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let c = MemoryCache::new(1024);
        c.set("k", vec![1, 2, 3], Duration::from_secs(60)).await;
        assert_eq!(c.get("k").await, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let c = MemoryCache::new(1024);
        c.set("k", vec![1], Duration::from_millis(1)).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(c.get("k").await, None);
    }

    #[tokio::test]
    async fn oversized_inserts_evict_oldest() {
        let c = MemoryCache::new(10);
        c.set("a", vec![0; 6], Duration::from_secs(60)).await;
        c.set("b", vec![0; 6], Duration::from_secs(60)).await;
        assert!(c.get("a").await.is_none());
        assert!(c.get("b").await.is_some());
    }
}
