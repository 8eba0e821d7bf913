use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OnceCell};

use crate::api::middleware::AppError;
use crate::models::{DatastoreDescriptor, Identity};
use crate::services::datastore::{Datastore, DatastoreConnector, DatastoreDirectory};

/// Bounds on what the datastore cache keeps.
/// The default keeps every handle for the life of the process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CachePolicy {
    /// Most resolved datastores kept at once; the oldest goes first
    pub max_entries: Option<usize>,
    /// Age after which a handle is resolved again on next use
    pub ttl: Option<Duration>,
}

impl CachePolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[derive(Clone)]
struct ResolvedDatastore {
    descriptor: Arc<DatastoreDescriptor>,
    handle: Arc<dyn Datastore>,
    resolved_at: Instant,
}

type Slot = Arc<OnceCell<ResolvedDatastore>>;

/// Maps datastore ids to connected handles.
///
/// Each id gets its own slot. The map lock is only held to find or create a
/// slot, and the metadata fetch and connect run inside the slot, so unrelated
/// datastores resolve in parallel while concurrent callers for the same id
/// share one fetch and one connect. A failed resolution leaves the slot empty
/// and the next caller retries.
pub struct DatastoreCache {
    directory: Arc<dyn DatastoreDirectory>,
    connector: Arc<dyn DatastoreConnector>,
    policy: CachePolicy,
    slots: Mutex<HashMap<u64, Slot>>,
}

impl DatastoreCache {
    pub fn new(directory: Arc<dyn DatastoreDirectory>, connector: Arc<dyn DatastoreConnector>) -> Self {
        Self::with_policy(directory, connector, CachePolicy::unbounded())
    }

    pub fn with_policy(
        directory: Arc<dyn DatastoreDirectory>,
        connector: Arc<dyn DatastoreConnector>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            directory,
            connector,
            policy,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Connected handle for `datastore_id`, resolving it on first use
    pub async fn resolve(&self, identity: &Identity, datastore_id: u64) -> Result<Arc<dyn Datastore>, AppError> {
        let slot = self.slot_for(datastore_id).await;

        if let Some(resolved) = slot.get() {
            tracing::debug!("Using cached datastore {}", datastore_id);
            return Ok(resolved.handle.clone());
        }

        let resolved = slot
            .get_or_try_init(|| self.open(identity, datastore_id))
            .await
            .map_err(|e| AppError::DatastoreUnavailable {
                datastore_id,
                reason: e.to_string(),
            })?;
        let handle = resolved.handle.clone();

        // Resolutions started together all found room; trim once they land
        if self.policy.max_entries.is_some() {
            let mut slots = self.slots.lock().await;
            self.trim_to_bound(&mut slots, datastore_id);
        }

        Ok(handle)
    }

    /// Metadata of a datastore that has already been resolved
    pub async fn descriptor(&self, datastore_id: u64) -> Option<Arc<DatastoreDescriptor>> {
        let slots = self.slots.lock().await;
        slots
            .get(&datastore_id)
            .and_then(|slot| slot.get())
            .map(|resolved| resolved.descriptor.clone())
    }

    pub async fn contains(&self, datastore_id: u64) -> bool {
        self.descriptor(datastore_id).await.is_some()
    }

    /// Number of resolved datastores
    pub async fn len(&self) -> usize {
        let slots = self.slots.lock().await;
        slots.values().filter(|slot| slot.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn slot_for(&self, datastore_id: u64) -> Slot {
        let mut slots = self.slots.lock().await;

        match slots.get(&datastore_id) {
            Some(slot) => match slot.get() {
                Some(resolved) if self.is_expired(resolved) => {
                    tracing::info!("Cached datastore {} expired, resolving again", datastore_id);
                }
                _ => return slot.clone(),
            },
            None => self.make_room(&mut slots),
        }

        let slot: Slot = Arc::new(OnceCell::new());
        slots.insert(datastore_id, slot.clone());
        slot
    }

    fn is_expired(&self, resolved: &ResolvedDatastore) -> bool {
        self.policy
            .ttl
            .is_some_and(|ttl| resolved.resolved_at.elapsed() >= ttl)
    }

    fn make_room(&self, slots: &mut HashMap<u64, Slot>) {
        // Empty slots nobody is waiting on are left over from failed resolutions
        slots.retain(|_, slot| slot.initialized() || Arc::strong_count(slot) > 1);

        let Some(max_entries) = self.policy.max_entries else {
            return;
        };

        loop {
            let resolved: Vec<(u64, Instant)> = slots
                .iter()
                .filter_map(|(id, slot)| slot.get().map(|r| (*id, r.resolved_at)))
                .collect();
            if resolved.is_empty() || resolved.len() < max_entries {
                return;
            }
            if let Some((oldest, _)) = resolved.iter().min_by_key(|(_, at)| *at) {
                tracing::info!("Evicting datastore {} to stay within {} entries", oldest, max_entries);
                slots.remove(oldest);
            }
        }
    }

    /// Evict the oldest resolved entries other than `keep` until the bound holds
    fn trim_to_bound(&self, slots: &mut HashMap<u64, Slot>, keep: u64) {
        let Some(max_entries) = self.policy.max_entries else {
            return;
        };

        loop {
            let resolved: Vec<(u64, Instant)> = slots
                .iter()
                .filter_map(|(id, slot)| slot.get().map(|r| (*id, r.resolved_at)))
                .collect();
            if resolved.len() <= max_entries {
                return;
            }
            let Some((oldest, _)) = resolved
                .iter()
                .filter(|(id, _)| *id != keep)
                .min_by_key(|(_, at)| *at)
            else {
                return;
            };
            tracing::info!("Evicting datastore {} to stay within {} entries", oldest, max_entries);
            slots.remove(oldest);
        }
    }

    async fn open(&self, identity: &Identity, datastore_id: u64) -> Result<ResolvedDatastore, AppError> {
        tracing::info!("Resolving datastore {} for user {}", datastore_id, identity.user_id);

        let descriptor = self.directory.describe(identity, datastore_id).await.map_err(|e| {
            tracing::error!("Failed to fetch details of datastore {}: {}", datastore_id, e);
            e
        })?;

        let handle = self.connector.connect(&descriptor).await.map_err(|e| {
            tracing::error!("Failed to connect to datastore {}: {}", datastore_id, e);
            e
        })?;

        Ok(ResolvedDatastore {
            descriptor: Arc::new(descriptor),
            handle,
            resolved_at: Instant::now(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{DatastoreKind, NativeStatement, QueryResult};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Barrier;

    /// Handle that answers every statement with its own datastore id
    pub(crate) struct FakeDatastore {
        pub id: u64,
        pub executed: std::sync::Mutex<Vec<NativeStatement>>,
    }

    #[async_trait]
    impl Datastore for FakeDatastore {
        async fn exec(&self, statement: &NativeStatement, _timeout_secs: u64) -> Result<QueryResult, AppError> {
            self.executed.lock().unwrap().push(statement.clone());
            Ok(QueryResult {
                rows: vec![json!({"datastore": self.id})],
                row_count: 1,
                execution_time_ms: 0,
            })
        }

        fn kind(&self) -> DatastoreKind {
            DatastoreKind::PostgreSQL
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeDirectory {
        pub fetches: AtomicUsize,
        /// Number of upcoming fetches that fail
        pub failures: AtomicUsize,
        pub delay: Option<Duration>,
        pub barrier: Option<Arc<Barrier>>,
    }

    #[async_trait]
    impl DatastoreDirectory for FakeDirectory {
        async fn describe(&self, _identity: &Identity, datastore_id: u64) -> Result<DatastoreDescriptor, AppError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(barrier) = &self.barrier {
                barrier.wait().await;
            }
            let should_fail = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if should_fail {
                return Err(AppError::Connection("directory down".to_string()));
            }
            Ok(DatastoreDescriptor {
                id: datastore_id,
                name: format!("store-{}", datastore_id),
                kind: DatastoreKind::PostgreSQL,
                connection_url: format!("postgresql://localhost/store{}", datastore_id),
            })
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeConnector {
        pub connects: AtomicUsize,
        /// Number of upcoming connects that fail
        pub failures: AtomicUsize,
    }

    #[async_trait]
    impl DatastoreConnector for FakeConnector {
        async fn connect(&self, descriptor: &DatastoreDescriptor) -> Result<Arc<dyn Datastore>, AppError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let should_fail = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if should_fail {
                return Err(AppError::Connection(format!("refused by {}", descriptor.name)));
            }
            Ok(Arc::new(FakeDatastore {
                id: descriptor.id,
                executed: std::sync::Mutex::new(Vec::new()),
            }))
        }
    }

    fn identity() -> Identity {
        Identity::new(1, Some("token".to_string()))
    }

    fn addr(handle: &Arc<dyn Datastore>) -> *const () {
        Arc::as_ptr(handle) as *const ()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolves_share_one_connection() {
        let directory = Arc::new(FakeDirectory {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let connector = Arc::new(FakeConnector::default());
        let cache = Arc::new(DatastoreCache::new(directory.clone(), connector.clone()));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.resolve(&identity(), 9).await.unwrap() })
            })
            .collect();
        let handles: Vec<Arc<dyn Datastore>> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(directory.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        let first = addr(&handles[0]);
        assert!(handles.iter().all(|h| addr(h) == first));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_resolution_is_not_cached() {
        let directory = Arc::new(FakeDirectory {
            failures: AtomicUsize::new(1),
            ..Default::default()
        });
        let connector = Arc::new(FakeConnector::default());
        let cache = DatastoreCache::new(directory.clone(), connector.clone());

        let err = cache.resolve(&identity(), 3).await.err().unwrap();
        assert!(matches!(err, AppError::DatastoreUnavailable { datastore_id: 3, .. }));
        assert!(cache.is_empty().await);
        assert!(!cache.contains(3).await);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 0);

        cache.resolve(&identity(), 3).await.unwrap();
        assert!(cache.contains(3).await);
        assert_eq!(directory.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_is_not_cached() {
        let directory = Arc::new(FakeDirectory::default());
        let connector = Arc::new(FakeConnector {
            failures: AtomicUsize::new(1),
            ..Default::default()
        });
        let cache = DatastoreCache::new(directory.clone(), connector.clone());

        let err = cache.resolve(&identity(), 6).await.err().unwrap();
        assert!(matches!(err, AppError::DatastoreUnavailable { datastore_id: 6, .. }));
        assert!(cache.is_empty().await);
        assert!(!cache.contains(6).await);
        assert!(cache.descriptor(6).await.is_none());

        cache.resolve(&identity(), 6).await.unwrap();
        assert!(cache.contains(6).await);
        assert_eq!(directory.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cached_handle_reused_without_fetch() {
        let directory = Arc::new(FakeDirectory::default());
        let connector = Arc::new(FakeConnector::default());
        let cache = DatastoreCache::new(directory.clone(), connector.clone());

        let a = cache.resolve(&identity(), 5).await.unwrap();
        let b = cache.resolve(&Identity::new(2, None), 5).await.unwrap();
        assert_eq!(addr(&a), addr(&b));
        assert_eq!(directory.fetches.load(Ordering::SeqCst), 1);

        let descriptor = cache.descriptor(5).await.unwrap();
        assert_eq!(descriptor.name, "store-5");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_distinct_ids_resolve_in_parallel() {
        // Each fetch waits for the other one; serialized resolution would never finish
        let directory = Arc::new(FakeDirectory {
            barrier: Some(Arc::new(Barrier::new(2))),
            ..Default::default()
        });
        let cache = Arc::new(DatastoreCache::new(directory.clone(), Arc::new(FakeConnector::default())));

        let id = identity();
        let both = async { tokio::join!(cache.resolve(&id, 1), cache.resolve(&id, 2)) };
        let (one, two) = tokio::time::timeout(Duration::from_secs(5), both)
            .await
            .expect("resolutions of different datastores must not block each other");

        assert!(one.is_ok());
        assert!(two.is_ok());
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_ttl_expiry_resolves_again() {
        let directory = Arc::new(FakeDirectory::default());
        let connector = Arc::new(FakeConnector::default());
        let cache = DatastoreCache::with_policy(
            directory.clone(),
            connector.clone(),
            CachePolicy::unbounded().with_ttl(Duration::ZERO),
        );

        cache.resolve(&identity(), 8).await.unwrap();
        cache.resolve(&identity(), 8).await.unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_max_entries_evicts_oldest() {
        let directory = Arc::new(FakeDirectory::default());
        let cache = DatastoreCache::with_policy(
            directory.clone(),
            Arc::new(FakeConnector::default()),
            CachePolicy::unbounded().with_max_entries(2),
        );

        for id in [1, 2, 3] {
            cache.resolve(&identity(), id).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(cache.len().await, 2);
        assert!(!cache.contains(1).await);
        assert!(cache.contains(2).await);
        assert!(cache.contains(3).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cold_resolves_respect_max_entries() {
        // All four fetches are in flight at once before any of them lands
        let directory = Arc::new(FakeDirectory {
            barrier: Some(Arc::new(Barrier::new(4))),
            ..Default::default()
        });
        let cache = Arc::new(DatastoreCache::with_policy(
            directory.clone(),
            Arc::new(FakeConnector::default()),
            CachePolicy::unbounded().with_max_entries(2),
        ));

        let tasks: Vec<_> = (1..=4)
            .map(|id| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.resolve(&identity(), id).await })
            })
            .collect();
        let results = tokio::time::timeout(Duration::from_secs(5), futures::future::join_all(tasks))
            .await
            .expect("resolutions of different datastores must not block each other");

        for result in results {
            assert!(result.unwrap().is_ok());
        }
        assert_eq!(directory.fetches.load(Ordering::SeqCst), 4);
        assert!(cache.len().await <= 2);
    }
}
