//! Per-connection single-flight script upload cache
//!
//! Tracks which script hashes have been uploaded over one connection. The
//! first caller to ask for a hash registers an entry and starts the upload;
//! every later caller, concurrent or not, awaits that same entry.
//!
//! ## Entry lifecycle
//!
//! - Registered synchronously, under the map lock, before the upload starts
//! - Kept after a successful upload (positive cache)
//! - Removed after a failed upload so a later call can try again
//!
//! Uploads run on their own task: a waiter that gives up does not cancel the
//! upload for the others.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::config::LoadCacheConfig;
use crate::logging::{operations, services, status};
use crate::transport::{ConnectionId, TransportError};

type LoadFuture = Shared<BoxFuture<'static, Result<(), TransportError>>>;
type EntryMap = HashMap<String, LoadEntry>;

/// Retention policy for completed uploads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadCachePolicy {
    /// Keep every uploaded hash for the life of the connection
    #[default]
    Unbounded,
    /// Keep at most `max_entries` hashes, forgetting the least recently used
    /// completed upload first. In-flight uploads are never evicted.
    Lru { max_entries: usize },
}

struct LoadEntry {
    id: u64,
    future: LoadFuture,
    last_used: u64,
}

/// Counters for one connection's cache
#[derive(Debug, Default)]
pub struct LoadCacheStats {
    uploads: AtomicU64,
    hits: AtomicU64,
    failures: AtomicU64,
    evictions: AtomicU64,
}

impl LoadCacheStats {
    /// Uploads started
    pub fn uploads(&self) -> u64 {
        self.uploads.load(Ordering::Relaxed)
    }

    /// Calls that joined an existing entry
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Uploads that failed
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

fn lock(entries: &Mutex<EntryMap>) -> MutexGuard<'_, EntryMap> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Upload state for one connection
pub struct ConnectionLoadCache {
    connection: ConnectionId,
    policy: LoadCachePolicy,
    entries: Arc<Mutex<EntryMap>>,
    next_id: AtomicU64,
    clock: AtomicU64,
    stats: Arc<LoadCacheStats>,
}

impl ConnectionLoadCache {
    pub fn new(connection: ConnectionId, policy: LoadCachePolicy) -> Self {
        Self {
            connection,
            policy,
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            clock: AtomicU64::new(0),
            stats: Arc::new(LoadCacheStats::default()),
        }
    }

    /// Make sure `hash` is uploaded, running `upload` only if no entry for it
    /// exists yet
    ///
    /// Must be called from within a tokio runtime; the upload is spawned as
    /// its own task.
    pub async fn ensure_loaded<F, Fut>(&self, hash: &str, upload: F) -> Result<(), TransportError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), TransportError>> + Send + 'static,
    {
        let future = {
            let mut entries = lock(&self.entries);
            let tick = self.clock.fetch_add(1, Ordering::Relaxed);

            if let Some(entry) = entries.get_mut(hash) {
                entry.last_used = tick;
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                debug!(
                    service = services::LOAD_CACHE,
                    operation = operations::LOAD,
                    status = status::HIT,
                    connection = %self.connection,
                    hash = %hash,
                    "joining existing script upload"
                );
                entry.future.clone()
            } else {
                self.evict_if_full(&mut entries);

                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let future = self.spawn_upload(hash.to_string(), id, upload());
                entries.insert(
                    hash.to_string(),
                    LoadEntry {
                        id,
                        future: future.clone(),
                        last_used: tick,
                    },
                );
                self.stats.uploads.fetch_add(1, Ordering::Relaxed);
                debug!(
                    service = services::LOAD_CACHE,
                    operation = operations::LOAD,
                    status = status::MISS,
                    connection = %self.connection,
                    hash = %hash,
                    "uploading script"
                );
                future
            }
        };

        future.await
    }

    fn spawn_upload<Fut>(&self, hash: String, id: u64, upload: Fut) -> LoadFuture
    where
        Fut: Future<Output = Result<(), TransportError>> + Send + 'static,
    {
        let entries = Arc::clone(&self.entries);
        let stats = Arc::clone(&self.stats);
        let connection = self.connection;

        let handle = tokio::spawn(async move {
            let result = upload.await;
            if let Err(e) = &result {
                stats.failures.fetch_add(1, Ordering::Relaxed);
                let mut entries = lock(&entries);
                if entries.get(&hash).is_some_and(|entry| entry.id == id) {
                    entries.remove(&hash);
                }
                warn!(
                    service = services::LOAD_CACHE,
                    operation = operations::LOAD,
                    status = status::ERROR,
                    connection = %connection,
                    hash = %hash,
                    error = %e,
                    "script upload failed"
                );
            }
            result
        });

        async move {
            handle.await.unwrap_or_else(|join_err| {
                Err(TransportError::new(format!(
                    "script upload task aborted: {}",
                    join_err
                )))
            })
        }
        .boxed()
        .shared()
    }

    fn evict_if_full(&self, entries: &mut EntryMap) {
        let LoadCachePolicy::Lru { max_entries } = self.policy else {
            return;
        };

        while entries.len() >= max_entries.max(1) {
            let victim = entries
                .iter()
                .filter(|(_, entry)| matches!(entry.future.peek(), Some(Ok(()))))
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(hash, _)| hash.clone());

            match victim {
                Some(hash) => {
                    entries.remove(&hash);
                    self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        service = services::LOAD_CACHE,
                        operation = operations::EVICT,
                        connection = %self.connection,
                        hash = %hash,
                        "forgetting uploaded script"
                    );
                }
                // Everything left is still uploading
                None => break,
            }
        }
    }

    /// Whether an entry (in flight or completed) exists for `hash`
    pub fn contains(&self, hash: &str) -> bool {
        lock(&self.entries).contains_key(hash)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn stats(&self) -> &LoadCacheStats {
        &self.stats
    }
}

/// Explicit mapping from connection identity to its load cache
///
/// Caches are created by [`LoadCacheRegistry::register`] when a connection
/// opens and dropped by [`LoadCacheRegistry::discard`] when it closes.
#[derive(Clone, Default)]
pub struct LoadCacheRegistry {
    policy: LoadCachePolicy,
    caches: Arc<Mutex<HashMap<ConnectionId, Arc<ConnectionLoadCache>>>>,
}

impl LoadCacheRegistry {
    pub fn new(policy: LoadCachePolicy) -> Self {
        Self {
            policy,
            caches: Arc::default(),
        }
    }

    /// Build a registry whose caches follow the `[load_cache]` section
    pub fn from_config(config: &LoadCacheConfig) -> anyhow::Result<Self> {
        let policy = config.policy()?;
        debug!(
            service = services::LOAD_CACHE,
            policy = ?policy,
            "load cache registry configured"
        );
        Ok(Self::new(policy))
    }

    fn caches(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<ConnectionLoadCache>>> {
        self.caches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create (or return the existing) cache for `connection`
    pub fn register(&self, connection: ConnectionId) -> Arc<ConnectionLoadCache> {
        let cache = self
            .caches()
            .entry(connection)
            .or_insert_with(|| Arc::new(ConnectionLoadCache::new(connection, self.policy)))
            .clone();
        debug!(
            service = services::LOAD_CACHE,
            connection = %connection,
            "registered connection"
        );
        cache
    }

    pub fn get(&self, connection: ConnectionId) -> Option<Arc<ConnectionLoadCache>> {
        self.caches().get(&connection).cloned()
    }

    /// Forget everything about `connection`; returns whether it was known
    pub fn discard(&self, connection: ConnectionId) -> bool {
        let removed = self.caches().remove(&connection).is_some();
        if removed {
            debug!(
                service = services::LOAD_CACHE,
                connection = %connection,
                "discarded connection"
            );
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.caches().len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches().is_empty()
    }

    pub fn policy(&self) -> LoadCachePolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn cache(policy: LoadCachePolicy) -> ConnectionLoadCache {
        ConnectionLoadCache::new(ConnectionId::next(), policy)
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_upload() {
        let cache = Arc::new(cache(LoadCachePolicy::Unbounded));
        let uploads = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = Arc::clone(&cache);
            let uploads = Arc::clone(&uploads);
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                cache
                    .ensure_loaded("abc", move || async move {
                        uploads.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        Ok(())
                    })
                    .await
            }));
        }

        // Let every caller register or join before the upload completes
        while cache.stats().uploads() + cache.stats().hits() < 10 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(uploads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().uploads(), 1);
        assert!(cache.contains("abc"));
    }

    #[tokio::test]
    async fn test_successful_upload_is_remembered() {
        let cache = cache(LoadCachePolicy::Unbounded);
        let uploads = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let uploads = Arc::clone(&uploads);
            cache
                .ensure_loaded("abc", move || async move {
                    uploads.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .unwrap();
        }

        assert_eq!(uploads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits(), 2);
    }

    #[tokio::test]
    async fn test_failed_upload_is_forgotten() {
        let cache = cache(LoadCachePolicy::Unbounded);

        let err = cache
            .ensure_loaded("abc", || async { Err(TransportError::new("connection reset")) })
            .await
            .unwrap_err();
        assert_eq!(err.message, "connection reset");
        assert!(!cache.contains("abc"));
        assert_eq!(cache.stats().failures(), 1);

        cache
            .ensure_loaded("abc", || async { Ok(()) })
            .await
            .unwrap();
        assert!(cache.contains("abc"));
        assert_eq!(cache.stats().uploads(), 2);
    }

    #[tokio::test]
    async fn test_lru_policy_evicts_least_recently_used() {
        let cache = cache(LoadCachePolicy::Lru { max_entries: 2 });

        cache.ensure_loaded("a", || async { Ok(()) }).await.unwrap();
        cache.ensure_loaded("b", || async { Ok(()) }).await.unwrap();
        // Touch "a" so "b" becomes the oldest
        cache.ensure_loaded("a", || async { Ok(()) }).await.unwrap();
        cache.ensure_loaded("c", || async { Ok(()) }).await.unwrap();

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[tokio::test]
    async fn test_failed_shared_upload_fails_every_waiter() {
        let cache = Arc::new(cache(LoadCachePolicy::Unbounded));
        let uploads = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = Arc::clone(&cache);
            let uploads = Arc::clone(&uploads);
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                cache
                    .ensure_loaded("abc", move || async move {
                        uploads.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        Err(TransportError::new("connection reset"))
                    })
                    .await
            }));
        }

        while cache.stats().uploads() + cache.stats().hits() < 10 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert_eq!(err.message, "connection reset");
        }
        assert_eq!(uploads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().uploads(), 1);
        assert_eq!(cache.stats().failures(), 1);
        assert!(!cache.contains("abc"));
    }

    #[tokio::test]
    async fn test_aborted_waiter_does_not_cancel_shared_upload() {
        let cache = Arc::new(cache(LoadCachePolicy::Unbounded));
        let uploads = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let first = {
            let cache = Arc::clone(&cache);
            let uploads = Arc::clone(&uploads);
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                cache
                    .ensure_loaded("abc", move || async move {
                        uploads.fetch_add(1, Ordering::SeqCst);
                        gate.notified().await;
                        Ok(())
                    })
                    .await
            })
        };
        while cache.stats().uploads() < 1 {
            tokio::task::yield_now().await;
        }

        let second = {
            let cache = Arc::clone(&cache);
            let uploads = Arc::clone(&uploads);
            tokio::spawn(async move {
                cache
                    .ensure_loaded("abc", move || async move {
                        uploads.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            })
        };
        while cache.stats().hits() < 1 {
            tokio::task::yield_now().await;
        }

        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());
        gate.notify_one();

        second.await.unwrap().unwrap();
        assert_eq!(uploads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().uploads(), 1);
        assert!(cache.contains("abc"));
    }

    #[tokio::test]
    async fn test_registry_from_lru_config_bounds_caches() {
        let config = LoadCacheConfig {
            eviction_policy: "lru".to_string(),
            max_entries: Some(2),
        };
        let registry = LoadCacheRegistry::from_config(&config).unwrap();
        assert_eq!(registry.policy(), LoadCachePolicy::Lru { max_entries: 2 });

        let cache = registry.register(ConnectionId::next());
        for hash in ["a", "b", "c"] {
            cache.ensure_loaded(hash, || async { Ok(()) }).await.unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains("a"));
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn test_registry_from_config_rejects_bad_policy() {
        let config = LoadCacheConfig {
            eviction_policy: "lru".to_string(),
            max_entries: None,
        };
        assert!(LoadCacheRegistry::from_config(&config).is_err());

        let registry = LoadCacheRegistry::from_config(&LoadCacheConfig::default()).unwrap();
        assert_eq!(registry.policy(), LoadCachePolicy::Unbounded);
    }

    #[test]
    fn test_registry_register_and_discard() {
        let registry = LoadCacheRegistry::default();
        let id = ConnectionId::next();

        let first = registry.register(id);
        let second = registry.register(id);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry.get(id).is_some());

        assert!(registry.discard(id));
        assert!(registry.get(id).is_none());
        assert!(!registry.discard(id));
    }

    #[test]
    fn test_registry_keeps_connections_apart() {
        let registry = LoadCacheRegistry::new(LoadCachePolicy::Lru { max_entries: 8 });
        let a = registry.register(ConnectionId::next());
        let b = registry.register(ConnectionId::next());

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
        assert_ne!(a.connection(), b.connection());
    }
}
