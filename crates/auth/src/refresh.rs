// Refresh cache for soft-expired tokens
// Decision: Keyed by the original token string, so identical tokens share one refresh
// Decision: Single-flight comes from moka's try_get_with; concurrent callers await the same init

use async_trait::async_trait;
use futures::future::BoxFuture;
use moka::future::Cache;
use std::time::Duration;

use crate::{
    error::{AuthError, Result},
    token::Claims,
};

/// Default number of cached refresh results
const DEFAULT_CAPACITY: u64 = 10_000;

/// Replacement produced for a soft-expired token
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshedToken {
    pub claims: Claims,
    pub token: String,
}

/// Deferred refresh operation handed to the cache
pub type RefreshFuture = BoxFuture<'static, Result<RefreshedToken>>;

/// Deduplicates refreshes of the same token
#[async_trait]
pub trait RefreshCache: Send + Sync {
    /// Return the cached replacement for `token` or run `refresh` to produce it.
    ///
    /// Concurrent callers with the same token observe one execution of `refresh`.
    async fn get_or_refresh(&self, token: &str, refresh: RefreshFuture) -> Result<RefreshedToken>;
}

/// No deduplication; every caller runs its own refresh
#[derive(Debug, Clone, Copy, Default)]
pub struct Uncached;

#[async_trait]
impl RefreshCache for Uncached {
    async fn get_or_refresh(&self, _token: &str, refresh: RefreshFuture) -> Result<RefreshedToken> {
        refresh
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))
    }
}

/// Single-flight refresh cache backed by moka
#[derive(Clone)]
pub struct MokaRefreshCache {
    cache: Cache<String, RefreshedToken>,
}

impl MokaRefreshCache {
    /// Cache holding up to `max_capacity` entries for `ttl` each
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(max_capacity)
                .build(),
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self::new(DEFAULT_CAPACITY, ttl)
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl RefreshCache for MokaRefreshCache {
    async fn get_or_refresh(&self, token: &str, refresh: RefreshFuture) -> Result<RefreshedToken> {
        self.cache
            .try_get_with(token.to_string(), refresh)
            .await
            .map_err(|e| AuthError::RefreshFailed(e.to_string()))
    }
}

impl std::fmt::Debug for MokaRefreshCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaRefreshCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn counting_refresh(calls: Arc<AtomicUsize>, token: &'static str) -> RefreshFuture {
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, AuthError>(RefreshedToken {
                claims: Claims {
                    jti: format!("refreshed-{token}"),
                    ..Default::default()
                },
                token: format!("new-{token}"),
            })
        }
        .boxed()
    }

    #[tokio::test]
    async fn test_single_flight() {
        let cache = Arc::new(MokaRefreshCache::with_ttl(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_refresh("old", counting_refresh(calls, "old"))
                        .await
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r == &results[0]));
        assert_eq!(results[0].token, "new-old");
    }

    #[tokio::test]
    async fn test_distinct_tokens_refresh_separately() {
        let cache = MokaRefreshCache::with_ttl(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        let a = cache
            .get_or_refresh("a", counting_refresh(calls.clone(), "a"))
            .await
            .unwrap();
        let b = cache
            .get_or_refresh("b", counting_refresh(calls.clone(), "b"))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_error_is_shared_and_not_cached() {
        let cache = MokaRefreshCache::with_ttl(Duration::from_secs(60));
        let failing: RefreshFuture =
            async { Err::<RefreshedToken, _>(AuthError::Secret("gone".to_string())) }.boxed();
        let err = cache.get_or_refresh("t", failing).await.unwrap_err();
        assert!(matches!(err, AuthError::RefreshFailed(msg) if msg.contains("gone")));

        let calls = Arc::new(AtomicUsize::new(0));
        assert!(cache
            .get_or_refresh("t", counting_refresh(calls.clone(), "t"))
            .await
            .is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_uncached_runs_every_time() {
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            Uncached
                .get_or_refresh("t", counting_refresh(calls.clone(), "t"))
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
