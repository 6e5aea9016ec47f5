//! # Ordered Class Lists
//!
//! Two kinds of list keep classes sorted by a time key:
//!
//! ```text
//!   EligibleList   one per scheduler   key = eligible_time   leaves with rsc
//!   ActiveList     one per interior    key = virtual_time    active children
//! ```
//!
//! Entries are `(key, class id, slot)` in a `BTreeSet`, so iteration order is
//! key order with ties broken by class id. A class's key changes only through
//! [`OrderedList::reposition`], which needs the old key to find the entry.

use std::collections::BTreeSet;
use std::marker::PhantomData;

use crate::class::ClassId;

/// One list member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Entry {
    pub key: u64,
    pub id: ClassId,
    pub slot: usize,
}

impl Entry {
    pub const fn new(key: u64, id: ClassId, slot: usize) -> Self {
        Entry { key, id, slot }
    }
}

/// Marker for the eligible-time list.
#[derive(Debug, Default)]
pub struct ByEligibleTime;

/// Marker for a virtual-time list.
#[derive(Debug, Default)]
pub struct ByVirtualTime;

/// Set of classes ordered by `(key, id)`.
#[derive(Debug)]
pub struct OrderedList<K> {
    entries: BTreeSet<Entry>,
    _kind: PhantomData<K>,
}

pub type EligibleList = OrderedList<ByEligibleTime>;
pub type ActiveList = OrderedList<ByVirtualTime>;

impl<K> Default for OrderedList<K> {
    fn default() -> Self {
        OrderedList {
            entries: BTreeSet::new(),
            _kind: PhantomData,
        }
    }
}

impl<K> OrderedList<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, entry: &Entry) -> bool {
        self.entries.contains(entry)
    }

    /// # Panics
    /// If an entry with the same key and id is already present.
    pub fn insert(&mut self, entry: Entry) {
        let fresh = self.entries.insert(entry);
        assert!(fresh, "class {} inserted twice at key {}", entry.id, entry.key);
    }

    /// # Panics
    /// If the entry is not present: the caller's membership flag and the
    /// list disagree.
    pub fn remove(&mut self, entry: &Entry) {
        let found = self.entries.remove(entry);
        assert!(
            found,
            "class {} not found at key {} (list out of sync)",
            entry.id, entry.key
        );
    }

    /// Move a member from `old_key` to `new_key`.
    pub fn reposition(&mut self, old_key: u64, new_key: u64, id: ClassId, slot: usize) {
        if old_key == new_key {
            debug_assert!(self.contains(&Entry::new(old_key, id, slot)));
            return;
        }
        self.remove(&Entry::new(old_key, id, slot));
        self.insert(Entry::new(new_key, id, slot));
    }

    pub fn first(&self) -> Option<&Entry> {
        self.entries.first()
    }

    pub fn last(&self) -> Option<&Entry> {
        self.entries.last()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Entry> + '_ {
        self.entries.iter()
    }
}

impl OrderedList<ByEligibleTime> {
    /// Earliest eligible time, the next moment real-time service can start.
    pub fn head(&self) -> Option<&Entry> {
        self.first()
    }

    /// Among members eligible at `now`, the one with the smallest deadline
    /// (ties by class id).
    pub fn min_by_deadline_before(
        &self,
        now: u64,
        deadline: impl Fn(usize) -> u64,
    ) -> Option<Entry> {
        self.entries
            .iter()
            .take_while(|e| e.key <= now)
            .min_by_key(|e| (deadline(e.slot), e.id))
            .copied()
    }
}

impl OrderedList<ByVirtualTime> {
    /// First member in virtual-time order whose fit time has passed.
    pub fn first_fit(&self, now: u64, fit: impl Fn(usize) -> u64) -> Option<Entry> {
        self.entries.iter().find(|e| fit(e.slot) <= now).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e(key: u64, id: u32) -> Entry {
        Entry::new(key, ClassId(id), id as usize)
    }

    #[test]
    fn orders_by_key_then_id() {
        let mut list = EligibleList::new();
        list.insert(e(20, 1));
        list.insert(e(10, 3));
        list.insert(e(10, 2));
        let ids: Vec<u32> = list.iter().map(|e| e.id.0).collect();
        assert_eq!(ids, vec![2, 3, 1]);
        assert_eq!(list.head().map(|e| e.id), Some(ClassId(2)));
        assert_eq!(list.last().map(|e| e.id), Some(ClassId(1)));
    }

    #[test]
    fn reposition_moves_entry() {
        let mut list = ActiveList::new();
        list.insert(e(5, 1));
        list.insert(e(7, 2));
        list.reposition(5, 9, ClassId(1), 1);
        assert_eq!(list.first().map(|e| e.id), Some(ClassId(2)));
        assert_eq!(list.last().map(|e| (e.key, e.id)), Some((9, ClassId(1))));
        assert_eq!(list.len(), 2);
    }

    #[test]
    #[should_panic(expected = "out of sync")]
    fn reposition_with_stale_key_panics() {
        let mut list = ActiveList::new();
        list.insert(e(5, 1));
        list.reposition(6, 9, ClassId(1), 1);
    }

    #[test]
    fn min_deadline_only_considers_eligible() {
        let mut list = EligibleList::new();
        list.insert(e(0, 1));
        list.insert(e(5, 2));
        list.insert(e(50, 3));
        // deadlines: 1 → 100, 2 → 40, 3 → 10
        let deadline = |slot: usize| match slot {
            1 => 100,
            2 => 40,
            _ => 10,
        };
        assert_eq!(
            list.min_by_deadline_before(10, deadline).map(|e| e.id),
            Some(ClassId(2))
        );
        assert_eq!(
            list.min_by_deadline_before(50, deadline).map(|e| e.id),
            Some(ClassId(3))
        );
        assert!(EligibleList::new().min_by_deadline_before(50, deadline).is_none());
        let mut late = EligibleList::new();
        late.insert(e(60, 4));
        assert!(late.min_by_deadline_before(50, deadline).is_none());
    }

    #[test]
    fn equal_deadlines_break_by_id() {
        let mut list = EligibleList::new();
        list.insert(e(3, 9));
        list.insert(e(1, 4));
        let pick = list.min_by_deadline_before(10, |_| 7);
        assert_eq!(pick.map(|e| e.id), Some(ClassId(4)));
    }

    #[test]
    fn first_fit_skips_capped_classes() {
        let mut list = ActiveList::new();
        list.insert(e(1, 1));
        list.insert(e(2, 2));
        let fit = |slot: usize| if slot == 1 { 100 } else { 0 };
        assert_eq!(list.first_fit(10, fit).map(|e| e.id), Some(ClassId(2)));
        assert_eq!(list.first_fit(100, fit).map(|e| e.id), Some(ClassId(1)));
        assert!(list.first_fit(10, |_| 11).is_none());
    }
}
