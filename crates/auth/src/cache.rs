//! Per-subject TTL cache of permission lookups.
//!
//! Entries move through `absent -> fresh -> stale -> fresh | absent`. A stale
//! entry is never served on the happy path, but it stays around as a fallback
//! when the identity provider cannot be reached, until `cleanup` or an
//! invalidation removes it.
//!
//! There is no single-flight de-duplication: two concurrent lookups for the
//! same subject may both hit the remote source, and the last write wins.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use quotegate_core::{Clock, PeriodicTask, RemoteError, SubjectId, SystemClock};

use crate::guard::PermissionCheck;
use crate::{Permission, PermissionSet, Subject};

/// Default entry lifetime.
pub const DEFAULT_PERMISSION_TTL: TimeDelta = TimeDelta::minutes(5);

/// Remote lookup of a subject's effective permissions.
///
/// Implementations must be idempotent; the cache may call them again at any
/// time after an entry expires.
#[async_trait]
pub trait PermissionSource: Send + Sync {
    async fn fetch_permissions(&self, subject: &SubjectId) -> Result<PermissionSet, RemoteError>;
}

/// How a lookup was satisfied.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Served from a cached entry younger than the TTL.
    Fresh,
    /// Fetched from the remote source during this lookup.
    Refreshed,
    /// The remote fetch failed; an expired entry was served instead.
    Stale,
}

/// Result of [`PermissionCache::lookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionLookup {
    pub permissions: PermissionSet,
    pub freshness: Freshness,
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale_fallbacks: u64,
    pub entries: usize,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    permissions: PermissionSet,
    captured_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_fresh(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        now - self.captured_at < ttl
    }
}

/// TTL cache of subject permissions.
///
/// Construct one per process and share it behind an `Arc`. The internal lock
/// is never held across an `.await`.
pub struct PermissionCache {
    ttl: TimeDelta,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<SubjectId, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    stale_fallbacks: AtomicU64,
}

impl core::fmt::Debug for PermissionCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PermissionCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.len())
            .finish()
    }
}

impl Default for PermissionCache {
    fn default() -> Self {
        Self::new(DEFAULT_PERMISSION_TTL)
    }
}

impl PermissionCache {
    pub fn new(ttl: TimeDelta) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: TimeDelta, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale_fallbacks: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<SubjectId, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the subject's permissions, fetching them if the cache has no
    /// fresh entry.
    ///
    /// When `fetch` fails and an expired entry exists, the expired value is
    /// returned without any signal; use [`PermissionCache::lookup`] to learn
    /// whether that happened. With no entry at all the error is propagated.
    pub async fn get_permissions<F, Fut>(
        &self,
        subject: &SubjectId,
        fetch: F,
    ) -> Result<PermissionSet, RemoteError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PermissionSet, RemoteError>>,
    {
        self.lookup(subject, fetch).await.map(|l| l.permissions)
    }

    /// Same as [`PermissionCache::get_permissions`], reporting how the value
    /// was obtained.
    pub async fn lookup<F, Fut>(
        &self,
        subject: &SubjectId,
        fetch: F,
    ) -> Result<PermissionLookup, RemoteError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PermissionSet, RemoteError>>,
    {
        let now = self.clock.now();

        let cached = self.entries().get(subject).cloned();
        if let Some(entry) = cached.filter(|e| e.is_fresh(now, self.ttl)) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(subject = %subject, "permission cache hit");
            return Ok(PermissionLookup {
                permissions: entry.permissions,
                freshness: Freshness::Fresh,
            });
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(subject = %subject, "permission cache miss; fetching");

        match fetch().await {
            Ok(permissions) => {
                self.entries().insert(
                    subject.clone(),
                    CacheEntry {
                        permissions: permissions.clone(),
                        captured_at: now,
                    },
                );
                Ok(PermissionLookup {
                    permissions,
                    freshness: Freshness::Refreshed,
                })
            }
            Err(err) => {
                // Re-read: an invalidation during the fetch must not be undone
                // by serving what was cached before it.
                let fallback = self.entries().get(subject).cloned();
                match fallback {
                    Some(entry) => {
                        self.stale_fallbacks.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            subject = %subject,
                            age_secs = (now - entry.captured_at).num_seconds(),
                            "permission fetch failed, serving stale entry: {err}"
                        );
                        Ok(PermissionLookup {
                            permissions: entry.permissions,
                            freshness: Freshness::Stale,
                        })
                    }
                    None => {
                        tracing::warn!(subject = %subject, "permission fetch failed with cold cache: {err}");
                        Err(err)
                    }
                }
            }
        }
    }

    /// Convenience wrapper over [`PermissionCache::get_permissions`] for a
    /// [`PermissionSource`].
    pub async fn get_from<S>(&self, subject: &SubjectId, source: &S) -> Result<PermissionSet, RemoteError>
    where
        S: PermissionSource + ?Sized,
    {
        self.get_permissions(subject, || source.fetch_permissions(subject))
            .await
    }

    /// Pure cache lookup; never fetches.
    ///
    /// Any entry counts, expired or not: expired entries are still servable as
    /// a fallback. A cold cache answers `false`.
    pub fn has_permission(&self, subject: &SubjectId, name: &str) -> bool {
        self.entries()
            .get(subject)
            .is_some_and(|e| e.permissions.grants(name))
    }

    pub fn invalidate(&self, subject: &SubjectId) {
        if self.entries().remove(subject).is_some() {
            tracing::debug!(subject = %subject, "permission cache entry invalidated");
        }
    }

    pub fn invalidate_all(&self) {
        let mut entries = self.entries();
        let cleared = entries.len();
        entries.clear();
        tracing::info!(cleared, "permission cache cleared");
    }

    /// Drop every entry whose age is at least the TTL. Returns how many were
    /// removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, e| e.is_fresh(now, self.ttl));
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = entries.len(), "permission cache cleanup");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_fallbacks: self.stale_fallbacks.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    /// Run [`PermissionCache::cleanup`] every `interval` until the returned
    /// handle is shut down or dropped.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration) -> PeriodicTask {
        let cache = Arc::clone(self);
        PeriodicTask::spawn("permission-cache-cleanup", interval, move || {
            let cache = Arc::clone(&cache);
            async move {
                cache.cleanup();
            }
        })
    }
}

/// Permission check backed by the shared cache and a remote source.
///
/// The effective permission set is whatever the source returns (through the
/// cache); the permissions embedded in the session are not consulted.
#[derive(Clone)]
pub struct CachedPermissionCheck {
    cache: Arc<PermissionCache>,
    source: Arc<dyn PermissionSource>,
}

impl CachedPermissionCheck {
    pub fn new(cache: Arc<PermissionCache>, source: Arc<dyn PermissionSource>) -> Self {
        Self { cache, source }
    }
}

#[async_trait]
impl PermissionCheck for CachedPermissionCheck {
    async fn has_permission(&self, subject: &Subject, permission: &Permission) -> Result<bool, RemoteError> {
        let granted = self.cache.get_from(&subject.id, self.source.as_ref()).await?;
        Ok(granted.grants(permission.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use proptest::prelude::*;
    use quotegate_core::ManualClock;

    fn subject(id: &str) -> SubjectId {
        id.parse().unwrap()
    }

    fn perms(names: &[&str]) -> PermissionSet {
        PermissionSet::parse(names.iter().copied()).unwrap()
    }

    fn cache_at_start() -> (PermissionCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = PermissionCache::with_clock(DEFAULT_PERMISSION_TTL, clock.clone());
        (cache, clock)
    }

    /// Source that counts calls and can be switched into failure mode.
    struct ScriptedSource {
        calls: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
        answer: Mutex<PermissionSet>,
    }

    impl ScriptedSource {
        fn new(answer: PermissionSet) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: std::sync::atomic::AtomicBool::new(false),
                answer: Mutex::new(answer),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        fn set_answer(&self, answer: PermissionSet) {
            *self.answer.lock().unwrap() = answer;
        }
    }

    #[async_trait]
    impl PermissionSource for ScriptedSource {
        async fn fetch_permissions(&self, _subject: &SubjectId) -> Result<PermissionSet, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(RemoteError::network("connection refused"));
            }
            Ok(self.answer.lock().unwrap().clone())
        }
    }

    fn block_on<F: Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }

    #[tokio::test]
    async fn fresh_entry_is_served_without_fetching() {
        let (cache, clock) = cache_at_start();
        let source = ScriptedSource::new(perms(&["quotes:read"]));
        let id = subject("u1");

        let first = cache.get_from(&id, &source).await.unwrap();
        clock.advance(TimeDelta::minutes(4));
        let second = cache.lookup(&id, || source.fetch_permissions(&id)).await.unwrap();

        assert_eq!(source.calls(), 1);
        assert_eq!(second.permissions, first);
        assert_eq!(second.freshness, Freshness::Fresh);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn expired_entry_is_refetched_exactly_once() {
        let (cache, clock) = cache_at_start();
        let source = ScriptedSource::new(perms(&["quotes:read"]));
        let id = subject("u1");

        cache.get_from(&id, &source).await.unwrap();
        clock.advance(TimeDelta::minutes(5));
        source.set_answer(perms(&["quotes:read", "billing:read"]));

        let refreshed = cache.lookup(&id, || source.fetch_permissions(&id)).await.unwrap();
        assert_eq!(source.calls(), 2);
        assert_eq!(refreshed.freshness, Freshness::Refreshed);
        assert!(refreshed.permissions.contains("billing:read"));

        // Timestamp moved to the refetch time: still fresh 4 minutes later.
        clock.advance(TimeDelta::minutes(4));
        cache.get_from(&id, &source).await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn failed_refresh_falls_back_to_stale_entry() {
        let (cache, clock) = cache_at_start();
        let source = ScriptedSource::new(perms(&["quotes:read"]));
        let id = subject("u1");

        cache.get_from(&id, &source).await.unwrap();
        clock.advance(TimeDelta::hours(2));
        source.set_failing(true);

        let served = cache.get_from(&id, &source).await.unwrap();
        assert_eq!(served, perms(&["quotes:read"]));

        let detailed = cache.lookup(&id, || source.fetch_permissions(&id)).await.unwrap();
        assert_eq!(detailed.freshness, Freshness::Stale);
        assert_eq!(cache.stats().stale_fallbacks, 2);
    }

    #[tokio::test]
    async fn failure_with_cold_cache_propagates() {
        let (cache, _clock) = cache_at_start();
        let source = ScriptedSource::new(perms(&[]));
        source.set_failing(true);

        let err = cache.get_from(&subject("u1"), &source).await.unwrap_err();
        assert_eq!(err, RemoteError::network("connection refused"));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn invalidation_during_fetch_disables_fallback() {
        let (cache, clock) = cache_at_start();
        let id = subject("u1");
        cache
            .get_permissions(&id, || async { Ok(perms(&["quotes:read"])) })
            .await
            .unwrap();
        clock.advance(TimeDelta::minutes(10));

        let result = cache
            .get_permissions(&id, || async {
                cache.invalidate(&id);
                Err(RemoteError::network("timeout"))
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn has_permission_is_a_pure_lookup() {
        let (cache, clock) = cache_at_start();
        let id = subject("u1");
        assert!(!cache.has_permission(&id, "quotes:read"));

        cache
            .get_permissions(&id, || async { Ok(perms(&["quotes:read"])) })
            .await
            .unwrap();
        assert!(cache.has_permission(&id, "quotes:read"));
        assert!(!cache.has_permission(&id, "billing:read"));

        clock.advance(TimeDelta::hours(1));
        assert!(cache.has_permission(&id, "quotes:read"));
    }

    #[tokio::test]
    async fn invalidate_and_invalidate_all() {
        let (cache, _clock) = cache_at_start();
        for name in ["u1", "u2", "u3"] {
            cache
                .get_permissions(&subject(name), || async { Ok(perms(&["quotes:read"])) })
                .await
                .unwrap();
        }

        cache.invalidate(&subject("u1"));
        cache.invalidate(&subject("u1"));
        cache.invalidate(&subject("missing"));
        assert_eq!(cache.len(), 2);

        cache.invalidate_all();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn cleanup_removes_entries_at_or_past_ttl() {
        let (cache, clock) = cache_at_start();
        cache
            .get_permissions(&subject("old"), || async { Ok(perms(&["a:b"])) })
            .await
            .unwrap();
        clock.advance(TimeDelta::minutes(2));
        cache
            .get_permissions(&subject("young"), || async { Ok(perms(&["a:b"])) })
            .await
            .unwrap();

        clock.advance(TimeDelta::minutes(3));
        assert_eq!(cache.cleanup(), 1);
        assert!(!cache.has_permission(&subject("old"), "a:b"));
        assert!(cache.has_permission(&subject("young"), "a:b"));
    }

    #[tokio::test(start_paused = true)]
    async fn background_cleanup_runs_on_interval() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = Arc::new(PermissionCache::with_clock(DEFAULT_PERMISSION_TTL, clock.clone()));
        cache
            .get_permissions(&subject("u1"), || async { Ok(perms(&["a:b"])) })
            .await
            .unwrap();

        let task = cache.spawn_cleanup(Duration::from_secs(300));
        clock.advance(TimeDelta::minutes(6));
        tokio::time::sleep(Duration::from_secs(301)).await;

        assert!(cache.is_empty());
        task.shutdown().await;
    }

    #[tokio::test]
    async fn cached_check_uses_remote_permissions() {
        let (cache, _clock) = cache_at_start();
        let source: Arc<dyn PermissionSource> = Arc::new(ScriptedSource::new(perms(&["billing:read"])));
        let check = CachedPermissionCheck::new(Arc::new(cache), source);
        let who = Subject::new(subject("u1"), crate::Role::User);

        let billing: Permission = "billing:read".parse().unwrap();
        let admin: Permission = "admin:access".parse().unwrap();
        assert!(check.has_permission(&who, &billing).await.unwrap());
        assert!(!check.has_permission(&who, &admin).await.unwrap());
    }

    proptest! {
        #[test]
        fn reads_within_ttl_never_fetch(ttl_secs in 1i64..86_400, frac in 0.0f64..1.0) {
            let delta_secs = ((ttl_secs as f64) * frac) as i64;
            prop_assume!(delta_secs < ttl_secs);

            let clock = Arc::new(ManualClock::new(Utc::now()));
            let cache = PermissionCache::with_clock(TimeDelta::seconds(ttl_secs), clock.clone());
            let source = ScriptedSource::new(perms(&["quotes:read", "billing:read"]));
            let id = subject("u1");

            let (first, second) = block_on(async {
                let first = cache.get_from(&id, &source).await.unwrap();
                clock.advance(TimeDelta::seconds(delta_secs));
                let second = cache.get_from(&id, &source).await.unwrap();
                (first, second)
            });

            prop_assert_eq!(source.calls(), 1);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn reads_after_ttl_fetch_once(ttl_secs in 1i64..86_400, extra_secs in 0i64..86_400) {
            let clock = Arc::new(ManualClock::new(Utc::now()));
            let cache = PermissionCache::with_clock(TimeDelta::seconds(ttl_secs), clock.clone());
            let source = ScriptedSource::new(perms(&["quotes:read"]));
            let id = subject("u1");

            block_on(async {
                cache.get_from(&id, &source).await.unwrap();
                clock.advance(TimeDelta::seconds(ttl_secs + extra_secs));
                cache.get_from(&id, &source).await.unwrap();
                // Same instant again: the refetched entry is fresh.
                cache.get_from(&id, &source).await.unwrap();
            });

            prop_assert_eq!(source.calls(), 2);
        }
    }
}
