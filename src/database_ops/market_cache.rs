//! Process-scoped lookup caches for the UI helper endpoints.
//!
//! Each cache owns its entries and a map of in-flight fetches, so concurrent
//! misses for one key share a single upstream request. Entries expire after a
//! TTL and are swept at most once per TTL period; a size cap bounds the map
//! between sweeps. Nothing is global.
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tracing::debug;

use crate::database_ops::leaderboard::{NftType, PointsSource};
use crate::database_ops::opensea::OpenSeaProvider;

pub const DEFAULT_MAX_ENTRIES: usize = 10_000;
/// How long a degraded answer (timeout, upstream 5xx) is served before retrying.
pub const DEFAULT_FAILURE_TTL: Duration = Duration::from_secs(30);

struct Entries<K, V> {
    map: HashMap<K, (Instant, V)>,
    next_sweep: Instant,
}

pub struct TtlCache<K, V>
where
    V: Clone,
{
    ttl: Duration,
    failure_ttl: Duration,
    max_entries: usize,
    entries: Mutex<Entries<K, V>>,
    pending: Mutex<HashMap<K, Shared<BoxFuture<'static, Result<V, V>>>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self::with_limits(ttl, DEFAULT_FAILURE_TTL.min(ttl), DEFAULT_MAX_ENTRIES)
    }

    pub fn with_limits(ttl: Duration, failure_ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            failure_ttl,
            max_entries: max_entries.max(1),
            entries: Mutex::new(Entries {
                map: HashMap::new(),
                next_sweep: Instant::now(),
            }),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().await;
        match entries.map.get(key) {
            Some((expires_at, v)) if Instant::now() < *expires_at => Some(v.clone()),
            Some(_) => {
                entries.map.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn insert(&self, key: K, value: V) {
        self.insert_for(key, value, self.ttl).await;
    }

    async fn insert_for(&self, key: K, value: V, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if now >= entries.next_sweep {
            entries.map.retain(|_, (expires_at, _)| now < *expires_at);
            let period = self.ttl.min(self.failure_ttl).max(Duration::from_millis(1));
            entries.next_sweep = now + period;
        }
        if entries.map.len() >= self.max_entries && !entries.map.contains_key(&key) {
            entries.map.retain(|_, (expires_at, _)| now < *expires_at);
            if entries.map.len() >= self.max_entries {
                let oldest = entries
                    .map
                    .iter()
                    .min_by_key(|(_, (expires_at, _))| *expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(k) = oldest {
                    entries.map.remove(&k);
                }
            }
        }
        entries.map.insert(key, (now + ttl, value));
    }

    /// Cached value, or the result of `fetch` shared with any caller already
    /// waiting on the same key. `Err` carries a fallback value that is returned
    /// to every waiter but kept only for the failure TTL.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, V>> + Send + 'static,
    {
        if let Some(v) = self.get(&key).await {
            return v;
        }
        let fut = {
            let mut pending = self.pending.lock().await;
            match pending.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let shared = fetch().boxed().shared();
                    pending.insert(key.clone(), shared.clone());
                    shared
                }
            }
        };
        let outcome = fut.await;
        // Any waiter may finish first if the one that started the fetch was dropped.
        self.pending.lock().await.remove(&key);
        match outcome {
            Ok(value) => {
                self.insert_for(key, value.clone(), self.ttl).await;
                value
            }
            Err(fallback) => {
                self.insert_for(key, fallback.clone(), self.failure_ttl).await;
                fallback
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

type ImageKey = (String, String, String);

/// Image-URL and points lookups with TTL caching, owned by the API server state.
pub struct MarketCache {
    opensea: Arc<OpenSeaProvider>,
    points_source: Arc<dyn PointsSource>,
    images: TtlCache<ImageKey, Option<String>>,
    points: TtlCache<(String, NftType), i64>,
}

impl MarketCache {
    pub fn new(
        opensea: Arc<OpenSeaProvider>,
        points_source: Arc<dyn PointsSource>,
        image_ttl: Duration,
        points_ttl: Duration,
    ) -> Self {
        Self {
            opensea,
            points_source,
            images: TtlCache::new(image_ttl),
            points: TtlCache::new(points_ttl),
        }
    }

    /// A lookup that yields no URL is cached only for the failure TTL, since
    /// a timeout and a missing image look the same from here.
    pub async fn image_url(&self, chain: &str, contract: &str, token_id: &str) -> Option<String> {
        let key = (
            chain.to_string(),
            contract.to_ascii_lowercase(),
            token_id.to_string(),
        );
        let opensea = self.opensea.clone();
        let (c, a, t) = key.clone();
        self.images
            .get_or_fetch(key, move || async move {
                debug!(contract = %a, token_id = %t, "image cache miss");
                match opensea.fetch_nft_image(&c, &a, &t).await {
                    Some(url) => Ok(Some(url)),
                    None => Err(None),
                }
            })
            .await
    }

    pub async fn points(&self, token_id: &str, nft_type: NftType) -> i64 {
        let source = self.points_source.clone();
        let id = token_id.to_string();
        self.points
            .get_or_fetch((id.clone(), nft_type), move || async move {
                debug!(token_id = %id, nft_type = %nft_type, "points cache miss");
                match source.points(&id, nft_type).await {
                    Ok(points) => Ok(points.max(0)),
                    Err(err) => {
                        tracing::warn!(token_id = %id, nft_type = %nft_type, error = %err, "points lookup failed; using 0");
                        Err(0)
                    }
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_misses_share_one_fetch() {
        let cache: Arc<TtlCache<String, u32>> = Arc::new(TtlCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        let lookups = (0..8).map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            async move {
                cache
                    .get_or_fetch("token-1".to_string(), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(7)
                    })
                    .await
            }
        });
        let values = futures::future::join_all(lookups).await;

        assert!(values.iter().all(|v| *v == 7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(&"token-1".to_string()).await, Some(7));
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache: TtlCache<&'static str, i64> = TtlCache::new(Duration::from_millis(30));
        cache.insert("k", 1).await;
        assert_eq!(cache.get(&"k").await, Some(1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get(&"k").await, None);
        assert!(cache.is_empty().await);

        let refreshed = cache.get_or_fetch("k", || async { Ok(2) }).await;
        assert_eq!(refreshed, 2);
    }

    #[tokio::test]
    async fn expired_entries_are_swept_on_insert() {
        let cache: TtlCache<u32, u32> = TtlCache::new(Duration::from_millis(10));
        for k in 0..5000 {
            cache.insert(k, k).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let fresh = cache.get_or_fetch(99_999, || async { Ok(1) }).await;
        assert_eq!(fresh, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn live_entries_never_exceed_cap() {
        let cache: TtlCache<u32, u32> =
            TtlCache::with_limits(Duration::from_secs(60), Duration::from_secs(60), 100);
        for k in 0..1000 {
            cache.insert(k, k).await;
        }
        assert_eq!(cache.len().await, 100);
        assert_eq!(cache.get(&999).await, Some(999));
    }

    #[tokio::test]
    async fn fallback_values_expire_on_failure_ttl() {
        let cache: TtlCache<&'static str, i64> =
            TtlCache::with_limits(Duration::from_secs(60), Duration::from_millis(20), 100);
        assert_eq!(cache.get_or_fetch("k", || async { Err(0) }).await, 0);
        assert_eq!(cache.get(&"k").await, Some(0));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get(&"k").await, None);

        assert_eq!(cache.get_or_fetch("k", || async { Ok(5) }).await, 5);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get(&"k").await, Some(5));
    }

    struct CountingPoints(AtomicUsize);

    #[async_trait::async_trait]
    impl PointsSource for CountingPoints {
        async fn points(&self, token_id: &str, _nft_type: NftType) -> anyhow::Result<i64> {
            self.0.fetch_add(1, Ordering::SeqCst);
            if token_id == "down" {
                return Err(anyhow::anyhow!("staking 500"));
            }
            Ok(11)
        }
    }

    #[tokio::test]
    async fn points_are_cached_per_token_and_type() {
        let source = Arc::new(CountingPoints(AtomicUsize::new(0)));
        let opensea = Arc::new(OpenSeaProvider::new(Default::default()).unwrap());
        let cache = MarketCache::new(
            opensea,
            source.clone(),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );
        assert_eq!(cache.points("1", NftType::Mythic).await, 11);
        assert_eq!(cache.points("1", NftType::Mythic).await, 11);
        assert_eq!(cache.points("1", NftType::Ancient).await, 11);
        assert_eq!(source.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_points_lookup_is_not_held_for_full_ttl() {
        let source = Arc::new(CountingPoints(AtomicUsize::new(0)));
        let opensea = Arc::new(OpenSeaProvider::new(Default::default()).unwrap());
        let cache = MarketCache {
            opensea,
            points_source: source.clone(),
            images: TtlCache::new(Duration::from_secs(60)),
            points: TtlCache::with_limits(
                Duration::from_secs(60),
                Duration::from_millis(20),
                DEFAULT_MAX_ENTRIES,
            ),
        };
        assert_eq!(cache.points("down", NftType::Mythic).await, 0);
        assert_eq!(cache.points("down", NftType::Mythic).await, 0);
        assert_eq!(source.0.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.points("down", NftType::Mythic).await, 0);
        assert_eq!(source.0.load(Ordering::SeqCst), 2);
    }
}
