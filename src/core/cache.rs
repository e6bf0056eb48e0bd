use moka::future::Cache;
use std::hash::Hash;
use std::time::Duration;

const DEFAULT_MAX_CAPACITY: u64 = 10_000;

/// In-process cache where every entry lives for a fixed time after insertion.
///
/// Writes are last-writer-wins; two tasks missing the same key may both fill
/// it and the later insert simply replaces the earlier one.
#[derive(Clone)]
pub struct TtlCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Cache<K, V>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_MAX_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, max_capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key).await
    }

    pub async fn insert(&self, key: K, value: V) {
        self.inner.insert(key, value).await;
    }

    pub async fn invalidate(&self, key: &K) {
        self.inner.invalidate(key).await;
    }

    /// Drops every entry whose key matches `predicate`.
    pub async fn invalidate_where<F>(&self, predicate: F)
    where
        F: Fn(&K) -> bool,
    {
        let matching: Vec<_> = self
            .inner
            .iter()
            .filter(|(key, _)| predicate(key.as_ref()))
            .map(|(key, _)| key)
            .collect();

        for key in matching {
            self.inner.invalidate(key.as_ref()).await;
        }
    }

    pub async fn len(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }
}

impl<K, V> std::fmt::Debug for TtlCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.inner.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_get() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("user-1".to_string(), 42).await;
        assert_eq!(cache.get(&"user-1".to_string()).await, Some(42));
        assert_eq!(cache.get(&"user-2".to_string()).await, None);
    }

    #[tokio::test]
    async fn test_expired_entries_are_not_returned() {
        let cache = TtlCache::new(Duration::from_millis(10));
        cache.insert(1u32, "a".to_string()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get(&1).await, None);
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert(1u32, "first").await;
        cache.insert(1u32, "second").await;
        assert_eq!(cache.get(&1).await, Some("second"));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_invalidate_where() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert(("biz-a".to_string(), 1u32), 1).await;
        cache.insert(("biz-a".to_string(), 2u32), 2).await;
        cache.insert(("biz-b".to_string(), 1u32), 3).await;

        cache.invalidate_where(|(business, _)| business == "biz-a").await;

        assert_eq!(cache.get(&("biz-a".to_string(), 1)).await, None);
        assert_eq!(cache.get(&("biz-a".to_string(), 2)).await, None);
        assert_eq!(cache.get(&("biz-b".to_string(), 1)).await, Some(3));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_capacity_is_bounded() {
        let cache = TtlCache::with_capacity(Duration::from_secs(60), 10);
        for i in 0..40u32 {
            cache.insert(i, i).await;
        }
        assert!(cache.len().await <= 10);
    }
}
