use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot = Arc<AsyncMutex<()>>;

/// One async lock per key. Entries exist only while some task holds or waits on them.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Slot>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self { slots: Mutex::new(HashMap::new()) }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: K) -> KeyedGuard<'_, K> {
        let slot = {
            let mut slots = self.slots();
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        // Registered before waiting so a cancelled wait still releases the entry.
        let mut pending = KeyedGuard { owner: self, key, guard: None };
        pending.guard = Some(slot.lock_owned().await);
        pending
    }

    /// Number of keys currently held or waited on.
    pub fn active_keys(&self) -> usize {
        self.slots().len()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<K, Slot>> {
        match self.slots.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub struct KeyedGuard<'a, K>
where
    K: Eq + Hash + Clone,
{
    owner: &'a KeyedLocks<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K> Drop for KeyedGuard<'_, K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut slots = self.owner.slots();
        let idle = slots.get(&self.key).is_some_and(|slot| Arc::strong_count(slot) == 1);
        if idle {
            slots.remove(&self.key);
        }
    }
}
