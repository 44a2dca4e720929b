//! Bounded least-recently-used map.
//!
//! The recency list is an index-based intrusive list inside a slab, so
//! there are no pointer cycles and eviction is O(1). Slots freed by
//! removal or eviction are recycled through a free list.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug)]
struct Slot<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Ordered map of at most `capacity` entries; lookups promote to the
/// most-recently-used end, eviction takes the least-recently-used.
///
/// Single-threaded internally — callers serialize access.
#[derive(Debug)]
pub struct Lru<K, V> {
    capacity: usize,
    map: HashMap<K, usize>,
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K: Eq + Hash + Clone, V> Lru<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity. Takes effect on the next mutation.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    /// Existence test. Does NOT update the access order.
    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Fetch without updating the access order.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.slots[idx].as_ref().map(|slot| &slot.value)
    }

    /// Fetch a value and promote its entry to most-recently-used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.detach(idx);
        self.attach_front(idx);
        self.slots[idx].as_ref().map(|slot| &slot.value)
    }

    /// Insert or overwrite; the entry becomes most-recently-used and the
    /// map is pruned back to capacity from the LRU end.
    pub fn insert(&mut self, key: K, value: V) {
        if let Some(&idx) = self.map.get(&key) {
            if let Some(slot) = self.slots[idx].as_mut() {
                slot.value = value;
            }
            self.detach(idx);
            self.attach_front(idx);
        } else {
            let idx = self.alloc(Slot {
                key: key.clone(),
                value,
                prev: None,
                next: None,
            });
            self.map.insert(key, idx);
            self.attach_front(idx);
        }
        self.evict_over_capacity();
    }

    /// Remove an entry. Does nothing when the key is absent.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.map.remove(key)?;
        self.detach(idx);
        let slot = self.slots[idx].take()?;
        self.free.push(idx);
        self.evict_over_capacity();
        Some(slot.value)
    }

    /// The key currently at the LRU end (test hook).
    pub fn lru_key(&self) -> Option<&K> {
        let idx = self.tail?;
        self.slots[idx].as_ref().map(|slot| &slot.key)
    }

    fn alloc(&mut self, slot: Slot<K, V>) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Some(slot);
            idx
        } else {
            self.slots.push(Some(slot));
            self.slots.len() - 1
        }
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = match self.slots[idx].as_ref() {
            Some(slot) => (slot.prev, slot.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(slot) = self.slots[p].as_mut() {
                    slot.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(slot) = self.slots[n].as_mut() {
                    slot.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.prev = None;
            slot.next = None;
        }
    }

    fn attach_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.prev = None;
            slot.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(slot) = self.slots[h].as_mut() {
                slot.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn evict_over_capacity(&mut self) {
        while self.map.len() > self.capacity {
            let Some(idx) = self.tail else { break };
            self.detach(idx);
            if let Some(slot) = self.slots[idx].take() {
                self.map.remove(&slot.key);
                self.free.push(idx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get() {
        let mut lru = Lru::new(4);
        lru.insert("a", 1);
        lru.insert("b", 2);
        assert_eq!(lru.get(&"a"), Some(&1));
        assert_eq!(lru.get(&"missing"), None);
        assert_eq!(lru.len(), 2);
    }

    #[test]
    fn overwrite_keeps_single_entry() {
        let mut lru = Lru::new(4);
        lru.insert("a", 1);
        lru.insert("a", 2);
        assert_eq!(lru.len(), 1);
        assert_eq!(lru.get(&"a"), Some(&2));
    }

    #[test]
    fn never_exceeds_capacity() {
        let mut lru = Lru::new(3);
        for i in 0..50 {
            lru.insert(i, i);
            assert!(lru.len() <= 3);
        }
        assert_eq!(lru.len(), 3);
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut lru = Lru::new(2);
        lru.insert("a", 1);
        lru.insert("b", 2);
        lru.insert("c", 3);
        // a was least recently touched
        assert!(!lru.contains_key(&"a"));
        assert!(lru.contains_key(&"b"));
        assert!(lru.contains_key(&"c"));
    }

    #[test]
    fn get_promotes_entry() {
        // capacity 2: insert a,b,c -> {b,c}; get(b); insert d -> {b,d}
        let mut lru = Lru::new(2);
        lru.insert("a", 1);
        lru.insert("b", 2);
        lru.insert("c", 3);
        assert_eq!(lru.get(&"b"), Some(&2));
        lru.insert("d", 4);
        assert!(lru.contains_key(&"b"));
        assert!(lru.contains_key(&"d"));
        assert!(!lru.contains_key(&"c"));
    }

    #[test]
    fn contains_does_not_promote() {
        let mut lru = Lru::new(2);
        lru.insert("a", 1);
        lru.insert("b", 2);
        assert!(lru.contains_key(&"a"));
        lru.insert("c", 3);
        // the membership test must not have refreshed "a"
        assert!(!lru.contains_key(&"a"));
    }

    #[test]
    fn remove_missing_is_noop() {
        let mut lru: Lru<&str, i32> = Lru::new(2);
        assert_eq!(lru.remove(&"nope"), None);
        lru.insert("a", 1);
        assert_eq!(lru.remove(&"a"), Some(1));
        assert_eq!(lru.remove(&"a"), None);
        assert!(lru.is_empty());
    }

    #[test]
    fn removal_relinks_list() {
        let mut lru = Lru::new(3);
        lru.insert("a", 1);
        lru.insert("b", 2);
        lru.insert("c", 3);
        lru.remove(&"b");
        assert_eq!(lru.lru_key(), Some(&"a"));
        lru.insert("d", 4);
        lru.insert("e", 5);
        // a evicted first, then c
        assert!(!lru.contains_key(&"a"));
        assert!(lru.contains_key(&"c"));
    }

    #[test]
    fn slots_are_recycled() {
        let mut lru = Lru::new(2);
        for i in 0..100 {
            lru.insert(i, i);
        }
        // slab holds at most capacity + the transiently-over slot
        assert!(lru.slots.len() <= 3);
    }

    #[test]
    fn capacity_change_applies_on_next_mutation() {
        let mut lru = Lru::new(4);
        for key in ["a", "b", "c", "d"] {
            lru.insert(key, 0);
        }
        lru.set_capacity(2);
        // no mutation yet: still 4 entries
        assert_eq!(lru.len(), 4);
        lru.insert("e", 0);
        assert_eq!(lru.len(), 2);
        assert!(lru.contains_key(&"e"));
        assert!(lru.contains_key(&"d"));
    }

    #[test]
    fn zero_capacity_holds_nothing() {
        let mut lru = Lru::new(0);
        lru.insert("a", 1);
        assert!(lru.is_empty());
        assert_eq!(lru.get(&"a"), None);
    }
}
