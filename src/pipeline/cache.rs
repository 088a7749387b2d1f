//! 5-minute TTL cache fronting store-backed blacklist/keyword lookups.
//! A miss is not an error — the caller refills on access.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

const TTL: Duration = Duration::from_secs(5 * 60);

struct Entry<T> {
    value: T,
    fetched_at: Instant,
}

/// A TTL-expiring cache keyed by `K`, storing one `V` per key (e.g. the
/// blacklisted-word set keyed by `()`, or region keyword lists keyed by
/// region id).
pub struct TtlCache<K, V> {
    entries: DashMap<K, Entry<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> Default for TtlCache<K, V>
where
    K: std::hash::Hash + Eq,
{
    fn default() -> Self {
        Self { entries: DashMap::new(), hits: AtomicU64::new(0), misses: AtomicU64::new(0) }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    /// Return the cached value for `key` if present and fresh; otherwise
    /// call `refill` to populate it.
    pub async fn get_or_refill<F, Fut, E>(&self, key: K, refill: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, E>>,
    {
        if let Some(entry) = self.entries.get(&key) {
            if entry.fetched_at.elapsed() < TTL {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.value.clone());
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = refill().await?;
        self.entries.insert(key, Entry { value: value.clone(), fetched_at: Instant::now() });
        Ok(value)
    }

    /// Invalidate a single key on write.
    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Fraction of lookups served from cache, in `[0, 1]`. `0.0` if there
    /// have been no lookups yet.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refills_on_miss_and_reuses_on_hit() {
        let cache: TtlCache<i64, Vec<String>> = TtlCache::default();
        let mut calls = 0;
        let mut fetch = || {
            calls += 1;
            async move { Ok::<_, anyhow::Error>(vec!["a".to_string()]) }
        };
        let first = cache.get_or_refill(1, &mut fetch).await.unwrap();
        let second = cache.get_or_refill(1, &mut fetch).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let cache: TtlCache<i64, Vec<String>> = TtlCache::default();
        let mut calls = 0;
        let mut fetch = || {
            calls += 1;
            async move { Ok::<_, anyhow::Error>(vec!["a".to_string()]) }
        };
        cache.get_or_refill(1, &mut fetch).await.unwrap();
        cache.invalidate(&1);
        cache.get_or_refill(1, &mut fetch).await.unwrap();
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn hit_ratio_reflects_hits_and_misses() {
        let cache: TtlCache<i64, Vec<String>> = TtlCache::default();
        let mut fetch = || async move { Ok::<_, anyhow::Error>(vec!["a".to_string()]) };
        cache.get_or_refill(1, &mut fetch).await.unwrap();
        cache.get_or_refill(1, &mut fetch).await.unwrap();
        cache.get_or_refill(1, &mut fetch).await.unwrap();
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 2);
        assert!((cache.hit_ratio() - (2.0 / 3.0)).abs() < 1e-9);
    }
}
