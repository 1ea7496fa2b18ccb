//! Index-based entry storage for the bounded tier
//!
//! Entries live in a `Vec` of slots addressed by stable integer handles. A
//! `HashMap` maps keys to handles, vacated slots are recycled through a free
//! list, and recency order is an intrusive doubly-linked list threaded through
//! the slots by index (head = least recently used).

use super::entry::CacheEntry;
use std::collections::HashMap;

/// Stable handle to an occupied slot. Valid until the entry is removed.
pub type SlotId = usize;

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    sequence: u64,
    prev: Option<SlotId>,
    next: Option<SlotId>,
}

/// Read-only view of one stored entry, handed to eviction policies.
#[derive(Debug, Clone, Copy)]
pub struct SlotView<'a> {
    pub id: SlotId,
    pub entry: &'a CacheEntry,
    /// Monotonic insertion number, unique within the arena's lifetime.
    pub sequence: u64,
}

#[derive(Debug, Default)]
pub struct EntryArena {
    slots: Vec<Option<Slot>>,
    free: Vec<SlotId>,
    index: HashMap<String, SlotId>,
    head: Option<SlotId>,
    tail: Option<SlotId>,
    next_sequence: u64,
}

impl EntryArena {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn slot_id(&self, key: &str) -> Option<SlotId> {
        self.index.get(key).copied()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn entry(&self, id: SlotId) -> Option<&CacheEntry> {
        self.slot(id).map(|slot| &slot.entry)
    }

    pub(crate) fn entry_mut(&mut self, id: SlotId) -> Option<&mut CacheEntry> {
        self.slot_mut(id).map(|slot| &mut slot.entry)
    }

    /// Least recently inserted or accessed entry.
    pub fn least_recent(&self) -> Option<SlotId> {
        self.head
    }

    pub fn most_recent(&self) -> Option<SlotId> {
        self.tail
    }

    /// Iterate over occupied slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = SlotView<'_>> + '_ {
        self.slots.iter().enumerate().filter_map(|(id, slot)| {
            slot.as_ref().map(|slot| SlotView {
                id,
                entry: &slot.entry,
                sequence: slot.sequence,
            })
        })
    }

    /// Keys from least to most recently used.
    pub fn keys_by_recency(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(id) = cursor {
            match self.slot(id) {
                Some(slot) => {
                    keys.push(slot.entry.key.clone());
                    cursor = slot.next;
                }
                None => break,
            }
        }
        keys
    }

    /// Store an entry as the most recently used. A previous entry under the
    /// same key is dropped first.
    pub fn insert(&mut self, entry: CacheEntry) -> SlotId {
        if let Some(existing) = self.slot_id(&entry.key) {
            self.remove(existing);
        }

        let key = entry.key.clone();
        let slot = Slot {
            entry,
            sequence: self.next_sequence,
            prev: None,
            next: None,
        };
        self.next_sequence += 1;

        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id] = Some(slot);
                id
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };

        self.index.insert(key, id);
        self.link_back(id);
        id
    }

    pub fn remove(&mut self, id: SlotId) -> Option<CacheEntry> {
        self.slot(id)?;
        self.unlink(id);
        let slot = self.slots.get_mut(id).and_then(Option::take)?;
        self.index.remove(&slot.entry.key);
        self.free.push(id);
        Some(slot.entry)
    }

    pub fn remove_key(&mut self, key: &str) -> Option<CacheEntry> {
        let id = self.slot_id(key)?;
        self.remove(id)
    }

    /// Move an entry to the most-recently-used end.
    pub fn mark_recent(&mut self, id: SlotId) {
        if self.tail == Some(id) || self.slot(id).is_none() {
            return;
        }
        self.unlink(id);
        self.link_back(id);
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }

    fn slot(&self, id: SlotId) -> Option<&Slot> {
        self.slots.get(id).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, id: SlotId) -> Option<&mut Slot> {
        self.slots.get_mut(id).and_then(Option::as_mut)
    }

    fn link_back(&mut self, id: SlotId) {
        let old_tail = self.tail;
        if let Some(slot) = self.slot_mut(id) {
            slot.prev = old_tail;
            slot.next = None;
        }
        match old_tail.and_then(|tail| self.slot_mut(tail)) {
            Some(tail) => tail.next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
    }

    fn unlink(&mut self, id: SlotId) {
        let (prev, next) = match self.slot(id) {
            Some(slot) => (slot.prev, slot.next),
            None => return,
        };

        match prev.and_then(|p| self.slot_mut(p)) {
            Some(prev_slot) => prev_slot.next = next,
            None => self.head = next,
        }
        match next.and_then(|n| self.slot_mut(n)) {
            Some(next_slot) => next_slot.prev = prev,
            None => self.tail = prev,
        }

        if let Some(slot) = self.slot_mut(id) {
            slot.prev = None;
            slot.next = None;
        }
    }
}
