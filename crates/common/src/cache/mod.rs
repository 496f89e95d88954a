//! In-process lookup caches
//!
//! Provides:
//! - Natural key → identifier caches that shortcut repeated gateway searches
//! - A set-valued cache for (user, publication) → submissions
//! - Per-key async locks that serialize work on the same natural key
//!
//! Entries never expire. A miss only means "ask the gateway", never "absent".
//! Caches also remember identifiers the search index has not caught up with
//! yet, which is what lets resolution tolerate index lag.

use crate::metrics;
use crate::models::EntityId;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

/// Cache of one identifier per key
pub struct LookupCache<K> {
    name: &'static str,
    entries: RwLock<HashMap<K, EntityId>>,
}

impl<K> LookupCache<K>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get the identifier cached for a key
    pub async fn get(&self, key: &K) -> Option<EntityId> {
        let value = self.entries.read().await.get(key).cloned();
        metrics::record_cache(value.is_some(), self.name);
        match &value {
            Some(id) => debug!(cache = self.name, ?key, id = %id, "Cache hit"),
            None => debug!(cache = self.name, ?key, "Cache miss"),
        }
        value
    }

    /// Cache an identifier, replacing any previous one for the key
    pub async fn put(&self, key: K, id: EntityId) {
        debug!(cache = self.name, ?key, id = %id, "Cache set");
        self.entries.write().await.insert(key, id);
    }

    /// Drop the entry for a key, returning the identifier it held
    pub async fn remove(&self, key: &K) -> Option<EntityId> {
        let removed = self.entries.write().await.remove(key);
        if removed.is_some() {
            debug!(cache = self.name, ?key, "Cache evict");
        }
        removed
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
        debug!(cache = self.name, "Cache cleared");
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Cache of a set of identifiers per key
pub struct SetCache<K> {
    name: &'static str,
    entries: RwLock<HashMap<K, HashSet<EntityId>>>,
}

impl<K> SetCache<K>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Get every identifier cached for a key
    pub async fn get(&self, key: &K) -> Option<HashSet<EntityId>> {
        let value = self.entries.read().await.get(key).cloned();
        metrics::record_cache(value.is_some(), self.name);
        debug!(cache = self.name, ?key, hit = value.is_some(), "Cache lookup");
        value
    }

    /// Replace the set cached for a key
    pub async fn put(&self, key: K, ids: HashSet<EntityId>) {
        debug!(cache = self.name, ?key, count = ids.len(), "Cache set");
        self.entries.write().await.insert(key, ids);
    }

    /// Add one identifier to the set for a key, creating the entry if needed
    pub async fn add_to_or_create_entry(&self, key: K, id: EntityId) {
        debug!(cache = self.name, ?key, id = %id, "Cache add");
        self.entries
            .write()
            .await
            .entry(key)
            .or_default()
            .insert(id);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
        debug!(cache = self.name, "Cache cleared");
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Key of the repository copy cache
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryCopyKey {
    pub publication: EntityId,
    pub repository: EntityId,
}

/// Key of the submissions cache
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserPublicationKey {
    pub user: EntityId,
    pub publication: EntityId,
}

/// The five caches used by entity resolution, constructed together and
/// shared by every reconciliation run that holds them
pub struct LookupCaches {
    /// PMID → Publication
    pub publications: LookupCache<String>,
    /// (publication, repository) → RepositoryCopy
    pub repository_copies: LookupCache<RepositoryCopyKey>,
    /// award number as given → most recent Grant
    pub grants: LookupCache<String>,
    /// Submission → Deposit at the target repository
    pub deposits: LookupCache<EntityId>,
    /// (user, publication) → Submissions
    pub user_pub_submissions: SetCache<UserPublicationKey>,
}

impl LookupCaches {
    pub fn new() -> Self {
        Self {
            publications: LookupCache::new("publication"),
            repository_copies: LookupCache::new("repository_copy"),
            grants: LookupCache::new("grant"),
            deposits: LookupCache::new("deposit"),
            user_pub_submissions: SetCache::new("user_pub_submissions"),
        }
    }

    /// Remove all data from every cache
    pub async fn clear_all(&self) {
        self.publications.clear().await;
        self.repository_copies.clear().await;
        self.grants.clear().await;
        self.deposits.clear().await;
        self.user_pub_submissions.clear().await;
    }
}

impl Default for LookupCaches {
    fn default() -> Self {
        Self::new()
    }
}

/// Async mutex per string key.
///
/// Work holding the guard for a key runs exclusively with respect to other
/// holders of the same key; different keys never contend.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop locks nobody is holding or waiting on
    pub async fn prune(&self) {
        self.locks
            .lock()
            .await
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Number of keys with a lock entry
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.locks.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lookup_cache_put_get_clear() {
        let cache: LookupCache<String> = LookupCache::new("test");
        assert!(cache.get(&"9999999999".to_string()).await.is_none());

        cache.put("9999999999".into(), "pub:1".into()).await;
        cache.put("9999999999".into(), "pub:2".into()).await;
        assert_eq!(
            cache.get(&"9999999999".to_string()).await,
            Some(EntityId::from("pub:2"))
        );
        assert_eq!(cache.len().await, 1);

        assert_eq!(
            cache.remove(&"9999999999".to_string()).await,
            Some(EntityId::from("pub:2"))
        );
        assert!(cache.remove(&"9999999999".to_string()).await.is_none());

        cache.put("1111111111".into(), "pub:3".into()).await;
        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_set_cache_add_to_or_create_entry() {
        let cache: SetCache<UserPublicationKey> = SetCache::new("test");
        let key = UserPublicationKey {
            user: "user:55".into(),
            publication: "pub:1".into(),
        };

        cache.add_to_or_create_entry(key.clone(), "sub:1".into()).await;
        cache.add_to_or_create_entry(key.clone(), "sub:2".into()).await;
        cache.add_to_or_create_entry(key.clone(), "sub:1".into()).await;

        let ids = cache.get(&key).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&EntityId::from("sub:2")));
    }

    #[tokio::test]
    async fn test_clear_all_empties_every_cache() {
        let caches = LookupCaches::new();
        caches.publications.put("1".into(), "pub:1".into()).await;
        caches.grants.put("R01".into(), "grant:1".into()).await;
        caches.deposits.put("sub:1".into(), "dep:1".into()).await;
        caches
            .repository_copies
            .put(
                RepositoryCopyKey {
                    publication: "pub:1".into(),
                    repository: "repo:1".into(),
                },
                "copy:1".into(),
            )
            .await;

        caches.clear_all().await;

        assert!(caches.publications.is_empty().await);
        assert!(caches.grants.is_empty().await);
        assert!(caches.deposits.is_empty().await);
        assert!(caches.repository_copies.is_empty().await);
        assert_eq!(caches.user_pub_submissions.len().await, 0);
    }

    #[tokio::test]
    async fn test_keyed_lock_serializes_same_key() {
        let locks = Arc::new(KeyedLocks::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let guard = locks.lock("9999999999").await;

        let task = {
            let locks = locks.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("9999999999").await;
                order.lock().await.push("second");
            })
        };

        // A different key is not blocked by the held guard
        let _other = locks.lock("1111111111").await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        order.lock().await.push("first");
        drop(guard);

        task.await.unwrap();
        assert_eq!(*order.lock().await, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_prune_drops_released_locks_only() {
        let locks = KeyedLocks::new();
        let held = locks.lock("9999999999").await;
        drop(locks.lock("1111111111").await);
        assert_eq!(locks.len().await, 2);

        locks.prune().await;
        assert_eq!(locks.len().await, 1);

        drop(held);
        locks.prune().await;
        assert!(locks.is_empty().await);
    }
}
