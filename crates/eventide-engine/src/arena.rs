//! Keyed slot table with generation-checked handles.
//!
//! Streams, snapshots, subscriptions and sagas are owned by a [`Registry`].
//! Cross references (a stream's active snapshot) are stored as [`Handle`]s
//! rather than shared pointers; a handle to a removed or replaced entry
//! resolves to `None` because its generation no longer matches the slot.

use std::collections::HashMap;
use std::hash::Hash;

/// Index into a [`Registry`] plus the generation it was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: usize,
    generation: u64,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u64,
    value: Option<T>,
}

/// Owning table keyed by `K`.
#[derive(Debug)]
pub struct Registry<K, T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    index: HashMap<K, Handle>,
}

impl<K, T> Default for Registry<K, T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<K, T> Registry<K, T>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` under `key`. An existing entry for `key` is evicted
    /// and returned; handles to it become stale.
    pub fn insert(&mut self, key: K, value: T) -> (Handle, Option<T>) {
        let evicted = self.remove(&key);
        let handle = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.value = Some(value);
                Handle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    value: Some(value),
                });
                Handle {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        };
        self.index.insert(key, handle);
        (handle, evicted)
    }

    /// Removes the entry for `key`.
    pub fn remove(&mut self, key: &K) -> Option<T> {
        let handle = self.index.remove(key)?;
        let slot = self.slots.get_mut(handle.index)?;
        let value = slot.value.take();
        slot.generation += 1;
        self.free.push(handle.index);
        value
    }

    /// Current handle for `key`.
    pub fn handle_of(&self, key: &K) -> Option<Handle> {
        self.index.get(key).copied()
    }

    /// Resolves a handle, `None` if it is stale.
    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Resolves a handle mutably, `None` if it is stale.
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Looks up by key.
    pub fn get_by_key(&self, key: &K) -> Option<&T> {
        self.handle_of(key).and_then(|handle| self.get(handle))
    }

    /// Looks up by key mutably.
    pub fn get_by_key_mut(&mut self, key: &K) -> Option<&mut T> {
        let handle = self.handle_of(key)?;
        self.get_mut(handle)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Keys of all live entries, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.index.keys()
    }

    /// All live values, in slot order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(|slot| slot.value.as_ref())
    }

    /// All live values mutably, in slot order.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(|slot| slot.value.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_resolve_by_handle_and_key() {
        let mut registry = Registry::new();

        let (handle, evicted) = registry.insert("a", 1);

        assert!(evicted.is_none());
        assert_eq!(registry.get(handle), Some(&1));
        assert_eq!(registry.get_by_key(&"a"), Some(&1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_replacing_a_key_invalidates_the_old_handle() {
        let mut registry = Registry::new();
        let (old, _) = registry.insert("stream", "v2");

        let (new, evicted) = registry.insert("stream", "v4");

        assert_eq!(evicted, Some("v2"));
        assert_eq!(registry.get(old), None);
        assert_eq!(registry.get(new), Some(&"v4"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_removed_slot_is_reused_with_new_generation() {
        let mut registry = Registry::new();
        let (first, _) = registry.insert(1, "one");
        registry.remove(&1);

        let (second, _) = registry.insert(2, "two");

        assert_eq!(registry.get(first), None);
        assert_eq!(registry.get(second), Some(&"two"));
        assert_eq!(registry.values().count(), 1);
    }

    #[test]
    fn test_get_by_key_mut_updates_in_place() {
        let mut registry = Registry::new();
        registry.insert("counter", 0);

        if let Some(value) = registry.get_by_key_mut(&"counter") {
            *value += 5;
        }

        assert_eq!(registry.get_by_key(&"counter"), Some(&5));
    }
}
