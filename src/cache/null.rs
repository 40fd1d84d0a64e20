//! Always-miss cache, used when a tier's `type` is `null`.

use std::time::Duration;

use async_trait::async_trait;

use super::Cache;

pub struct NullCache;

#[async_trait]
impl Cache for NullCache {
    async fn get(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) {}
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn always_misses() {
        let c = NullCache;
        c.set("k", vec![1, 2, 3], Duration::from_secs(1)).await;
        assert!(c.get("k").await.is_none());
    }
}
