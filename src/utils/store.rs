use std::sync::Arc;

use dashmap::DashMap;

use super::Handle;
use crate::state_bug;

/// Concurrent registry mapping raw handles to shared state objects.
///
/// `get` on a missing handle is not an error: the object may have raced a
/// destroy on another thread, or never existed. `destroy` only removes the
/// entry from the registry; holders of an `Arc` obtained earlier keep the
/// state alive until they release it. Un-discoverability, not deallocation.
pub struct Registry<T> {
    map: DashMap<u64, Arc<T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            map: DashMap::new(),
        }
    }
}

impl<T> Registry<T> {
    /// Insert a freshly constructed state object. A duplicate raw handle is a
    /// tracker bug (handles are never reused while an owner remains); the new
    /// state replaces the stale entry so tracking continues.
    pub fn add(&self, handle: Handle<T>, state: T) -> Arc<T> {
        let state = Arc::new(state);
        if self
            .map
            .insert(handle.raw, Arc::clone(&state))
            .is_some()
        {
            state_bug!("duplicate insert for handle {:#x}", handle.raw);
        }
        state
    }

    pub fn get(&self, handle: Handle<T>) -> Option<Arc<T>> {
        self.map.get(&handle.raw).map(|entry| Arc::clone(&entry))
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.map.contains_key(&handle.raw)
    }

    /// Remove the entry, returning the state so callers can finish
    /// destruction bookkeeping with it.
    pub fn destroy(&self, handle: Handle<T>) -> Option<Arc<T>> {
        self.map.remove(&handle.raw).map(|(_, state)| state)
    }

    /// Point-in-time copy of every live entry, safe to iterate while other
    /// threads insert and remove.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.map.iter().map(|entry| Arc::clone(&entry)).collect()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_get_returns_inserted_state() {
        let reg: Registry<u32> = Registry::default();
        let h = Handle::new(7);
        reg.add(h, 42);
        assert_eq!(*reg.get(h).unwrap(), 42);
    }

    #[test]
    fn destroy_hides_entry_but_shared_refs_stay_valid() {
        let reg: Registry<String> = Registry::default();
        let h = Handle::new(9);
        reg.add(h, "alive".to_string());

        let held = reg.get(h).unwrap();
        reg.destroy(h);

        assert!(reg.get(h).is_none());
        assert_eq!(*held, "alive");
    }

    #[test]
    fn snapshot_is_stable_under_mutation() {
        let reg: Registry<u64> = Registry::default();
        for raw in 1..=8u64 {
            reg.add(Handle::new(raw), raw * 10);
        }

        let snap = reg.snapshot();
        for raw in 1..=8u64 {
            reg.destroy(Handle::<u64>::new(raw));
        }

        assert_eq!(snap.len(), 8);
        assert!(reg.is_empty());
    }

    #[test]
    fn concurrent_insert_and_get_across_threads() {
        let reg = std::sync::Arc::new(Registry::<u64>::default());
        let mut joins = Vec::new();
        for t in 0..4u64 {
            let reg = std::sync::Arc::clone(&reg);
            joins.push(std::thread::spawn(move || {
                for i in 0..64u64 {
                    let raw = t * 1000 + i + 1;
                    reg.add(Handle::new(raw), raw);
                    assert_eq!(*reg.get(Handle::new(raw)).unwrap(), raw);
                }
            }));
        }
        for j in joins {
            j.join().unwrap();
        }
        assert_eq!(reg.len(), 4 * 64);
    }
}
