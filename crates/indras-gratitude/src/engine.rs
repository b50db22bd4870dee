//! The engine handle shared by every operation module.
//!
//! Operations are implemented as `impl GratitudeEngine` blocks in the module
//! that owns their domain (ledger, blessing, intention, token, offering, …).
//! This module holds the shared state: stores, clock, configuration, the
//! active-blessing index and the per-key write locks.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use crate::blessing::{Blessing, BlessingStatus};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{GratitudeError, Result};
use crate::ids::{ArtifactId, BlessingId, IntentionId, OfferingId, UserId};
use crate::intention::Intention;
use crate::offering::Offering;
use crate::store::GratitudeStores;

/// Async mutexes keyed by record id.
///
/// Read-modify-write sequences on the same key are serialized; different
/// keys proceed concurrently. An entry lives only while some task holds or
/// waits on it, so the map stays as small as the set of contended keys.
pub(crate) struct KeyedLocks<K: Eq + Hash> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

/// Guard returned by [`KeyedLocks::lock`]. Evicts the key's mutex on drop
/// when no other task references it.
pub(crate) struct KeyedGuard<'a, K: Eq + Hash> {
    locks: &'a DashMap<K, Arc<Mutex<()>>>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub(crate) fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    pub(crate) async fn lock(&self, key: &K) -> KeyedGuard<'_, K> {
        // Cloned under the shard lock, so eviction never races the clone.
        let mutex = Arc::clone(&self.locks.entry(key.clone()).or_default());
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            locks: &self.locks,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}

impl<K: Eq + Hash> Drop for KeyedGuard<'_, K> {
    fn drop(&mut self) {
        // Release first so the guard's own reference is not counted.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Gratitude accounting engine over a set of stores.
pub struct GratitudeEngine {
    pub(crate) stores: GratitudeStores,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: EngineConfig,
    /// `user → active blessing`. `None` records a known absence.
    active: DashMap<UserId, Option<BlessingId>>,
    pub(crate) user_locks: KeyedLocks<UserId>,
    pub(crate) blessing_locks: KeyedLocks<BlessingId>,
    pub(crate) intention_locks: KeyedLocks<IntentionId>,
    pub(crate) offering_locks: KeyedLocks<OfferingId>,
    pub(crate) artifact_locks: KeyedLocks<ArtifactId>,
    /// Serializes parent/child re-linking so cycle checks see a stable forest.
    pub(crate) tree_lock: Mutex<()>,
    /// Attention switches hold this shared; an index rebuild holds it
    /// exclusively.
    pub(crate) index_lock: RwLock<()>,
}

impl GratitudeEngine {
    pub fn new(stores: GratitudeStores, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            stores,
            clock,
            config,
            active: DashMap::new(),
            user_locks: KeyedLocks::new(),
            blessing_locks: KeyedLocks::new(),
            intention_locks: KeyedLocks::new(),
            offering_locks: KeyedLocks::new(),
            artifact_locks: KeyedLocks::new(),
            tree_lock: Mutex::new(()),
            index_lock: RwLock::new(()),
        }
    }

    /// Engine over in-memory stores with the system clock.
    pub fn in_memory() -> Self {
        Self::new(
            GratitudeStores::in_memory(),
            Arc::new(SystemClock),
            EngineConfig::default(),
        )
    }

    /// Engine over in-memory stores driven by the given clock.
    pub fn in_memory_with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::new(GratitudeStores::in_memory(), clock, EngineConfig::default())
    }

    pub fn stores(&self) -> &GratitudeStores {
        &self.stores
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    // -----------------------------------------------------------------------
    // Active blessing index
    // -----------------------------------------------------------------------

    /// The user's active blessing, hydrating the index from the store the
    /// first time a user is seen.
    ///
    /// Hydration never overwrites a slot: a scan that started before a
    /// concurrent switch may be stale, and the switch's entry wins.
    pub(crate) async fn active_blessing(&self, user: &UserId) -> Result<Option<BlessingId>> {
        let cached = self.active.get(user).map(|slot| *slot);
        if let Some(slot) = cached {
            return Ok(slot);
        }

        let found = self
            .stores
            .blessings
            .all()
            .await?
            .into_iter()
            .filter(|b| &b.user_id == user && b.status == BlessingStatus::Active)
            .max_by_key(|b| b.attention_index)
            .map(|b| b.id);
        let slot = *self.active.entry(*user).or_insert(found);
        Ok(slot)
    }

    pub(crate) fn set_active(&self, user: UserId, blessing: Option<BlessingId>) {
        self.active.insert(user, blessing);
    }

    /// Rebuild the active index from the blessing store.
    ///
    /// Returns the number of users with an active blessing. If the store
    /// holds more than one active blessing for a user, the most recent one
    /// (highest attention index) wins. Attention switches wait until the
    /// rebuild finishes.
    pub async fn rebuild_active_index(&self) -> Result<usize> {
        let _exclusive = self.index_lock.write().await;

        let mut latest: HashMap<UserId, (usize, BlessingId)> = HashMap::new();
        for blessing in self.stores.blessings.all().await? {
            if blessing.status != BlessingStatus::Active {
                continue;
            }
            let entry = latest
                .entry(blessing.user_id)
                .or_insert((blessing.attention_index, blessing.id));
            if blessing.attention_index > entry.0 {
                *entry = (blessing.attention_index, blessing.id);
            }
        }

        for (user, (_, id)) in &latest {
            self.active.insert(*user, Some(*id));
        }
        self.active.retain(|user, _| latest.contains_key(user));
        debug!(users = latest.len(), "rebuilt active blessing index");
        Ok(latest.len())
    }

    // -----------------------------------------------------------------------
    // Loading and get-modify-put helpers
    // -----------------------------------------------------------------------

    pub(crate) async fn load_blessing(&self, id: &BlessingId) -> Result<Blessing> {
        self.stores
            .blessings
            .get(id)
            .await?
            .ok_or_else(|| GratitudeError::not_found("blessing", id))
    }

    pub(crate) async fn load_intention(&self, id: &IntentionId) -> Result<Intention> {
        self.stores
            .intentions
            .get(id)
            .await?
            .ok_or_else(|| GratitudeError::not_found("intention", id))
    }

    pub(crate) async fn load_offering(&self, id: &OfferingId) -> Result<Offering> {
        self.stores
            .offerings
            .get(id)
            .await?
            .ok_or_else(|| GratitudeError::not_found("offering", id))
    }

    /// Load, mutate and store a blessing under its write lock.
    ///
    /// Nothing is written if `f` returns an error.
    pub(crate) async fn update_blessing<F, T>(&self, id: &BlessingId, f: F) -> Result<T>
    where
        F: FnOnce(&mut Blessing) -> Result<T> + Send,
        T: Send,
    {
        let _guard = self.blessing_locks.lock(id).await;
        let mut blessing = self.load_blessing(id).await?;
        let out = f(&mut blessing)?;
        self.stores.blessings.put(blessing).await?;
        Ok(out)
    }

    /// Load, mutate and store an intention under its write lock.
    pub(crate) async fn update_intention<F, T>(&self, id: &IntentionId, f: F) -> Result<T>
    where
        F: FnOnce(&mut Intention) -> Result<T> + Send,
        T: Send,
    {
        let _guard = self.intention_locks.lock(id).await;
        let mut intention = self.load_intention(id).await?;
        let out = f(&mut intention)?;
        self.stores.intentions.put(intention).await?;
        Ok(out)
    }
}

impl std::fmt::Debug for GratitudeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GratitudeEngine")
            .field("config", &self.config)
            .field("indexed_users", &self.active.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::error::StorageError;
    use crate::store::Collection;

    const ALICE: UserId = [1u8; 32];

    /// Blessing collection whose first full scan stalls.
    struct StalledScan {
        inner: Arc<dyn Collection<Blessing>>,
        stalled: AtomicBool,
    }

    #[async_trait]
    impl Collection<Blessing> for StalledScan {
        async fn get(&self, id: &BlessingId) -> std::result::Result<Option<Blessing>, StorageError> {
            self.inner.get(id).await
        }

        async fn put(&self, doc: Blessing) -> std::result::Result<(), StorageError> {
            self.inner.put(doc).await
        }

        async fn all(&self) -> std::result::Result<Vec<Blessing>, StorageError> {
            let snapshot = self.inner.all().await;
            if !self.stalled.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            snapshot
        }
    }

    #[tokio::test]
    async fn test_keyed_locks_serialize_same_key() {
        let locks = Arc::new(KeyedLocks::<u8>::new());
        let guard = locks.lock(&1).await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _g = locks.lock(&1).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // A different key is not blocked.
        let _other = locks.lock(&2).await;

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_keyed_locks_evict_released_keys() {
        let locks = Arc::new(KeyedLocks::<u8>::new());
        {
            let _a = locks.lock(&1).await;
            let _b = locks.lock(&2).await;
            assert_eq!(locks.len(), 2);
        }
        assert_eq!(locks.len(), 0);

        // A waiter keeps the entry alive past the holder's release.
        let guard = locks.lock(&3).await;
        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _g = locks.lock(&3).await;
                tokio::time::sleep(Duration::from_millis(20)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);
        assert_eq!(locks.len(), 1);
        contender.await.unwrap();
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_active_index_starts_empty() {
        let engine = GratitudeEngine::in_memory();
        assert_eq!(engine.active_blessing(&[7u8; 32]).await.unwrap(), None);
        assert_eq!(engine.rebuild_active_index().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_hydration_does_not_clobber_switch() {
        let writer = GratitudeEngine::in_memory();
        let first = writer.create_intention(ALICE, "first", None).await.unwrap();
        let second = writer.create_intention([2u8; 32], "second", None).await.unwrap();

        // A fresh engine over the same stores starts with an empty index.
        let mut stores = writer.stores().clone();
        stores.blessings = Arc::new(StalledScan {
            inner: Arc::clone(&stores.blessings),
            stalled: AtomicBool::new(false),
        });
        let engine = Arc::new(GratitudeEngine::new(
            stores,
            Arc::new(SystemClock),
            EngineConfig::testing(),
        ));

        let reader = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.current_focus(&ALICE).await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let switched = engine
            .switch_attention(ALICE, second.intention_id, None)
            .await
            .unwrap();
        assert_eq!(switched.previous_blessing_id, Some(first.switch.blessing_id));

        // The reader's scan predates the switch; its result must not win.
        assert_eq!(reader.await.unwrap(), Some(switched.blessing_id));
        assert_eq!(
            engine.active_blessing(&ALICE).await.unwrap(),
            Some(switched.blessing_id)
        );

        engine
            .switch_attention(ALICE, first.intention_id, None)
            .await
            .unwrap();
        let active: Vec<_> = engine
            .blessings_for_user(&ALICE)
            .await
            .unwrap()
            .into_iter()
            .filter(|b| b.status == BlessingStatus::Active)
            .map(|b| b.attention_index)
            .collect();
        assert_eq!(active, vec![2]);
    }

    #[tokio::test]
    async fn test_rebuild_waits_for_switches() {
        let engine = Arc::new(GratitudeEngine::in_memory());
        let intention = engine.create_intention(ALICE, "I", None).await.unwrap();

        let shared = engine.index_lock.read().await;
        let rebuild = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.rebuild_active_index().await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!rebuild.is_finished());

        drop(shared);
        assert_eq!(rebuild.await.unwrap(), 1);
        assert_eq!(
            engine.current_focus(&ALICE).await.unwrap(),
            Some(intention.switch.blessing_id)
        );
    }
}
