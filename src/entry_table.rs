//! An [EntryTable] is a keyed table which remembers insertion order and can be swept a few entries at a time.
//!
//! This is implemented as a vec-backed linked list where removed slots go onto a free list, plus an auxiliary
//! hash-based index.  Slot indices are stable for as long as an entry lives, which is what lets the sweep cursor survive
//! arbitrary removals between (and during) sweeps without skipping or revisiting anything.
//!
//! The cache uses one of these for the ready files (swept for expiry) and one for the request queue (popped from the
//! front in feed order).
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use ahash::RandomState;

struct OccupiedSlot<K, V> {
    key: Arc<K>,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

struct VacantSlot {
    next_vacant: Option<usize>,
}

enum Slot<K, V> {
    /// This slot is vacant, possibly with a pointer at the next vacant slot.
    Vacant(VacantSlot),
    /// This slot is occupied, and doubly linked to the previous and next slot in insertion order.
    Occupied(OccupiedSlot<K, V>),
}

impl<K, V> Slot<K, V> {
    fn as_occupied_mut(&mut self) -> &mut OccupiedSlot<K, V> {
        match self {
            Self::Occupied(ref mut x) => x,
            _ => panic!("Slot should be occupied"),
        }
    }

    fn as_occupied(&self) -> &OccupiedSlot<K, V> {
        match self {
            Self::Occupied(ref x) => x,
            _ => panic!("Slot should be occupied"),
        }
    }

    fn as_vacant_mut(&mut self) -> &mut VacantSlot {
        match self {
            Slot::Vacant(ref mut x) => x,
            _ => panic!("Slot should be vacant"),
        }
    }
}

pub struct EntryTable<K: Hash + Eq, V> {
    slots: Vec<Slot<K, V>>,
    /// Points at the slot of the key.
    index: HashMap<Arc<K>, usize, RandomState>,
    head: Option<usize>,
    tail: Option<usize>,
    vacant_head: Option<usize>,
    /// Where the next sweep starts.  `None` means the head.
    cursor: Option<usize>,
}

impl<K: Hash + Eq, V> Default for EntryTable<K, V> {
    fn default() -> Self {
        EntryTable::new()
    }
}

impl<K: Hash + Eq, V> EntryTable<K, V> {
    pub fn new() -> EntryTable<K, V> {
        EntryTable {
            slots: Default::default(),
            index: Default::default(),
            head: None,
            tail: None,
            vacant_head: None,
            cursor: None,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        Arc<K>: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.contains_key(key)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        Arc<K>: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let ind = *self.index.get(key)?;
        Some(&self.slots[ind].as_occupied().value)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        Arc<K>: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let ind = *self.index.get(key)?;
        Some(&mut self.slots[ind].as_occupied_mut().value)
    }

    /// The oldest entry.
    pub fn front(&self) -> Option<(&K, &V)> {
        let ind = self.head?;
        let slot = self.slots[ind].as_occupied();
        Some((&*slot.key, &slot.value))
    }

    /// Entirely unlink an occupied slot from the list, fixing up the head, the tail and the sweep cursor.
    fn unlink_slot(&mut self, ind: usize) {
        let (prev, next) = {
            let slot = self.slots[ind].as_occupied();
            (slot.prev, slot.next)
        };

        if self.cursor == Some(ind) {
            self.cursor = next;
        }

        match prev {
            Some(p) => self.slots[p].as_occupied_mut().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].as_occupied_mut().prev = prev,
            None => self.tail = prev,
        }
    }

    /// Make a specific slot of the table become vacant, returning what was in it.
    fn vacate(&mut self, ind: usize) -> (Arc<K>, V) {
        self.unlink_slot(ind);
        let mut old = Slot::Vacant(VacantSlot {
            next_vacant: self.vacant_head,
        });
        std::mem::swap(&mut old, &mut self.slots[ind]);
        self.vacant_head = Some(ind);
        match old {
            Slot::Occupied(OccupiedSlot { key, value, .. }) => {
                self.index.remove(&key);
                (key, value)
            }
            _ => panic!("Should have been occupied"),
        }
    }

    /// Find an available vacant slot, or make one if necessary.
    fn find_vacant(&mut self) -> usize {
        if let Some(e) = self.vacant_head {
            self.vacant_head = self.slots[e].as_vacant_mut().next_vacant;
            return e;
        }

        self.slots.push(Slot::Vacant(VacantSlot { next_vacant: None }));
        self.slots.len() - 1
    }

    /// Add an entry at the back of the table.
    ///
    /// If the key was already present the value is replaced in place, keeping its position, and the old value is
    /// returned.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(&ind) = self.index.get(&key) {
            return Some(std::mem::replace(
                &mut self.slots[ind].as_occupied_mut().value,
                value,
            ));
        }

        let key_arc = Arc::new(key);
        let ind = self.find_vacant();
        self.slots[ind] = Slot::Occupied(OccupiedSlot {
            key: key_arc.clone(),
            value,
            prev: self.tail,
            next: None,
        });
        self.index.insert(key_arc, ind);

        match self.tail {
            Some(t) => self.slots[t].as_occupied_mut().next = Some(ind),
            None => self.head = Some(ind),
        }
        self.tail = Some(ind);
        None
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        Arc<K>: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let ind = *self.index.get(key)?;
        Some(self.vacate(ind).1)
    }

    /// Remove and return the oldest entry.
    pub fn pop_front(&mut self) -> Option<V> {
        let ind = self.head?;
        Some(self.vacate(ind).1)
    }

    /// Remove everything, returning the values in insertion order.
    pub fn drain(&mut self) -> Vec<V> {
        let mut out = Vec::with_capacity(self.len());
        while let Some(v) = self.pop_front() {
            out.push(v);
        }
        self.slots.clear();
        self.vacant_head = None;
        self.cursor = None;
        out
    }

    /// Visit at most `budget` entries starting where the last sweep stopped, wrapping around to the front, and remove
    /// every visited entry for which `should_remove` returns true.
    ///
    /// A sweep never visits the same entry twice, and successive sweeps visit every entry that stays in the table
    /// within `ceil(len / budget)` calls.
    pub fn sweep<F>(&mut self, budget: usize, mut should_remove: F) -> Vec<V>
    where
        F: FnMut(&K, &V) -> bool,
    {
        let mut removed = vec![];
        let visits = budget.min(self.len());
        let mut pos = self.cursor;

        for _ in 0..visits {
            let ind = match pos.or(self.head) {
                Some(i) => i,
                None => break,
            };
            let (next, remove) = {
                let slot = self.slots[ind].as_occupied();
                (slot.next, should_remove(&*slot.key, &slot.value))
            };
            if remove {
                removed.push(self.vacate(ind).1);
            }
            pos = next;
        }

        self.cursor = pos;
        removed
    }

    /// Iterator visiting entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        let mut ind = self.head;
        std::iter::from_fn(move || {
            let next = ind?;
            let ret = self.slots[next].as_occupied();
            ind = ret.next;
            Some((&*ret.key, &ret.value))
        })
    }
}
