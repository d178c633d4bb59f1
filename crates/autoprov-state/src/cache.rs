//! Local read caches fed by the cache mirror.
//!
//! Each `Cache` holds the latest copy of one kind of replicated object.
//! Consumers register update/delete callbacks to react to changes; the
//! update callback sees both the previous and the new copy, so a
//! consumer can diff them. Callbacks run after the cache lock has been
//! released, so a callback may read the cache it was fired from.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use tracing::trace;

use autoprov_core::{
    Alert, App, AppInst, AppZoneKey, AppKey, AutoProvPolicy, ClusterInst, ClusterInstKey,
    PolicyKey,
};

/// An object that can be stored in a [`Cache`].
pub trait Keyed: Clone + Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Ord + Send + Sync + std::fmt::Debug + 'static;

    fn cache_key(&self) -> Self::Key;
}

impl Keyed for App {
    type Key = AppKey;

    fn cache_key(&self) -> AppKey {
        self.key.clone()
    }
}

impl Keyed for AutoProvPolicy {
    type Key = PolicyKey;

    fn cache_key(&self) -> PolicyKey {
        self.key.clone()
    }
}

impl Keyed for AppInst {
    type Key = AppZoneKey;

    fn cache_key(&self) -> AppZoneKey {
        self.key()
    }
}

impl Keyed for ClusterInst {
    type Key = ClusterInstKey;

    fn cache_key(&self) -> ClusterInstKey {
        self.key.clone()
    }
}

impl Keyed for Alert {
    type Key = String;

    fn cache_key(&self) -> String {
        self.key()
    }
}

/// Invoked with (previous copy, new copy) after an update.
pub type UpdatedCallback<V> = Arc<dyn Fn(Option<&V>, &V) + Send + Sync>;

/// Invoked with the removed copy after a delete.
pub type DeletedCallback<V> = Arc<dyn Fn(&V) + Send + Sync>;

/// A keyed cache of replicated objects with change callbacks.
pub struct Cache<V: Keyed> {
    objs: RwLock<HashMap<V::Key, V>>,
    updated_cbs: RwLock<Vec<UpdatedCallback<V>>>,
    deleted_cbs: RwLock<Vec<DeletedCallback<V>>>,
}

impl<V: Keyed> Default for Cache<V> {
    fn default() -> Self {
        Self {
            objs: RwLock::new(HashMap::new()),
            updated_cbs: RwLock::new(Vec::new()),
            deleted_cbs: RwLock::new(Vec::new()),
        }
    }
}

impl<V: Keyed> Cache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback fired after every update.
    pub fn on_updated(&self, cb: impl Fn(Option<&V>, &V) + Send + Sync + 'static) {
        self.updated_cbs
            .write()
            .expect("cache callback lock")
            .push(Arc::new(cb));
    }

    /// Register a callback fired after every delete of an existing object.
    pub fn on_deleted(&self, cb: impl Fn(&V) + Send + Sync + 'static) {
        self.deleted_cbs
            .write()
            .expect("cache callback lock")
            .push(Arc::new(cb));
    }

    /// Insert or replace an object. Returns the previous copy.
    pub fn update(&self, obj: V) -> Option<V> {
        let key = obj.cache_key();
        let old = {
            let mut objs = self.objs.write().expect("cache lock");
            objs.insert(key.clone(), obj.clone())
        };
        trace!(?key, replaced = old.is_some(), "cache update");

        let cbs = self.updated_cbs.read().expect("cache callback lock").clone();
        for cb in &cbs {
            cb(old.as_ref(), &obj);
        }
        old
    }

    /// Remove an object. Returns the removed copy, if any.
    pub fn delete(&self, key: &V::Key) -> Option<V> {
        let old = {
            let mut objs = self.objs.write().expect("cache lock");
            objs.remove(key)
        };
        trace!(?key, existed = old.is_some(), "cache delete");

        if let Some(ref removed) = old {
            let cbs = self.deleted_cbs.read().expect("cache callback lock").clone();
            for cb in &cbs {
                cb(removed);
            }
        }
        old
    }

    pub fn get(&self, key: &V::Key) -> Option<V> {
        self.objs.read().expect("cache lock").get(key).cloned()
    }

    pub fn contains(&self, key: &V::Key) -> bool {
        self.objs.read().expect("cache lock").contains_key(key)
    }

    /// All objects, ordered by key.
    pub fn list(&self) -> Vec<V> {
        let objs = self.objs.read().expect("cache lock");
        let mut keys: Vec<&V::Key> = objs.keys().collect();
        keys.sort();
        keys.into_iter().filter_map(|k| objs.get(k).cloned()).collect()
    }

    /// Objects matching a predicate.
    pub fn filter(&self, pred: impl Fn(&V) -> bool) -> Vec<V> {
        self.list().into_iter().filter(|v| pred(v)).collect()
    }

    pub fn len(&self) -> usize {
        self.objs.read().expect("cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The caches consumed by the auto-provisioning service.
#[derive(Default)]
pub struct CacheData {
    pub apps: Cache<App>,
    pub policies: Cache<AutoProvPolicy>,
    pub app_insts: Cache<AppInst>,
    pub cluster_insts: Cache<ClusterInst>,
    pub alerts: Cache<Alert>,
}

impl CacheData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live instance of the app already runs in the zone.
    pub fn has_live_app_inst(&self, key: &AppZoneKey) -> bool {
        self.app_insts.get(key).is_some_and(|inst| inst.is_live())
    }

    /// Apps that reference the given policy.
    pub fn apps_using_policy(&self, key: &PolicyKey) -> Vec<App> {
        self.apps.filter(|app| app.uses_policy(key))
    }
}
