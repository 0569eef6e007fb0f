//! Weak-valued cache so neither an `Object` nor the handles it hands out
//! keep each other alive past the last external `Arc`.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, Weak};

/// Implemented by cached values so the cache can drop a stale entry the
/// moment the value is destroyed, rather than waiting for the next failed
/// `retrieve`.
pub trait AboutToBeDestroyed {
    /// Registers `f` to run once, right before this value is dropped.
    fn on_about_to_be_destroyed(&self, f: Box<dyn FnOnce() + Send + 'static>);
}

struct Entry<V> {
    weak: Weak<V>,
}

/// A mutex-guarded map `K -> Weak<V>`, used by `Object::get_signal` and
/// `Object::get_property` so repeated lookups of the same `(path, interface,
/// name)` return the same live handle instead of creating duplicate
/// subscriptions.
///
/// No entry keeps its value alive: dropping the last external `Arc<V>` is
/// enough to make the entry collectible. Both `retrieve` and `has` upgrade
/// the weak pointer and remove the entry themselves if the upgrade fails, as
/// a fallback for the case where the destruction hook hasn't run yet.
pub struct LifetimeConstrainedCache<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> Default for LifetimeConstrainedCache<K, V> {
    fn default() -> Self { LifetimeConstrainedCache { entries: Mutex::new(HashMap::new()) } }
}

impl<K, V> LifetimeConstrainedCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: AboutToBeDestroyed + Send + Sync + 'static,
{
    pub fn new() -> Self { Self::default() }

    /// Upgrades the cached weak reference, if any. Removes the entry on a failed upgrade.
    pub fn retrieve(&self, key: &K) -> Option<Arc<V>> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key).and_then(|e| e.weak.upgrade()) {
            Some(v) => Some(v),
            None => { entries.remove(key); None }
        }
    }

    /// Inserts `strong` under `key`. Returns `false` without modifying the
    /// cache if an entry already exists for `key`.
    ///
    /// Must be called on an `Arc<Self>` so the destruction hook can remove
    /// the entry without the cache needing to outlive itself.
    pub fn insert(self: &Arc<Self>, key: K, strong: Arc<V>) -> bool {
        {
            let mut entries = self.entries.lock().unwrap();
            if entries.contains_key(&key) { return false; }
            entries.insert(key.clone(), Entry { weak: Arc::downgrade(&strong) });
        }
        let weak_self = Arc::downgrade(self);
        strong.on_about_to_be_destroyed(Box::new(move || {
            if let Some(cache) = weak_self.upgrade() { cache.remove(&key); }
        }));
        true
    }

    pub fn remove(&self, key: &K) {
        self.entries.lock().unwrap().remove(key);
    }

    pub fn has(&self, key: &K) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key).map(|e| e.weak.upgrade().is_some()) {
            Some(true) => true,
            Some(false) => { entries.remove(key); false }
            None => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct Thing(StdMutex<Vec<Box<dyn FnOnce() + Send>>>);

    impl AboutToBeDestroyed for Thing {
        fn on_about_to_be_destroyed(&self, f: Box<dyn FnOnce() + Send + 'static>) {
            self.0.lock().unwrap().push(f);
        }
    }

    impl Drop for Thing {
        fn drop(&mut self) {
            for f in self.0.lock().unwrap().drain(..) { f() }
        }
    }

    #[test]
    fn insert_retrieve_and_expire() {
        let cache: Arc<LifetimeConstrainedCache<&'static str, Thing>> = Arc::new(Default::default());
        let strong = Arc::new(Thing(StdMutex::new(vec![])));
        assert!(cache.insert("a", strong.clone()));
        assert!(!cache.insert("a", strong.clone()));
        assert!(cache.has(&"a"));
        assert!(cache.retrieve(&"a").is_some());

        drop(strong);
        assert!(!cache.has(&"a"));
        assert!(cache.retrieve(&"a").is_none());
    }
}
