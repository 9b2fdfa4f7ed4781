//! Indexed binary min-heap keyed by next-fire timestamp.
//!
//! Entries are ordered by `(score, seq)`: `seq` is a monotonically increasing
//! insertion counter, so two tasks due at the same millisecond come out in the
//! order they were first inserted. A side index `key -> position` makes
//! `remove` and `update` by key O(log n).

use std::collections::HashMap;
use std::hash::Hash;

use recur_core::Timestamp;

/// One heap entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapItem<K> {
    pub key: K,
    pub score: Timestamp,
    pub seq: u64,
}

impl<K> HeapItem<K> {
    fn precedes(&self, other: &HeapItem<K>) -> bool {
        (self.score, self.seq) < (other.score, other.seq)
    }
}

#[derive(Debug, Clone)]
pub struct IndexedHeap<K> {
    items: Vec<HeapItem<K>>,
    index: HashMap<K, usize>,
    next_seq: u64,
}

impl<K: Eq + Hash + Clone> Default for IndexedHeap<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> IndexedHeap<K> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Build a heap from `(key, score)` pairs with an O(n) heapify.
    ///
    /// Sequence numbers follow input order. A key appearing twice keeps its
    /// first position in the tie-break order and its last score.
    pub fn from_items<I>(items: I) -> Self
    where
        I: IntoIterator<Item = (K, Timestamp)>,
    {
        let mut heap = Self::new();
        for (key, score) in items {
            if let Some(&pos) = heap.index.get(&key) {
                heap.items[pos].score = score;
                continue;
            }
            let seq = heap.bump_seq();
            heap.index.insert(key.clone(), heap.items.len());
            heap.items.push(HeapItem { key, score, seq });
        }
        for pos in (0..heap.items.len() / 2).rev() {
            heap.sift_down(pos);
        }
        heap
    }

    /// Insert `key` at `score`. An existing entry for `key` is rescheduled in
    /// place, so the heap never holds two entries for one key.
    pub fn insert(&mut self, key: K, score: Timestamp) {
        if self.update(&key, score) {
            return;
        }
        let seq = self.bump_seq();
        let pos = self.items.len();
        self.index.insert(key.clone(), pos);
        self.items.push(HeapItem { key, score, seq });
        self.sift_up(pos);
    }

    pub fn peek(&self) -> Option<&HeapItem<K>> {
        self.items.first()
    }

    pub fn extract_min(&mut self) -> Option<HeapItem<K>> {
        self.take_at(0)
    }

    /// Remove the entry for `key`. Returns `false` when the key is absent.
    pub fn remove(&mut self, key: &K) -> bool {
        match self.index.get(key) {
            Some(&pos) => self.take_at(pos).is_some(),
            None => false,
        }
    }

    /// Move `key` to `score`, keeping its original tie-break sequence.
    /// Returns `false` when the key is absent.
    pub fn update(&mut self, key: &K, score: Timestamp) -> bool {
        let Some(&pos) = self.index.get(key) else {
            return false;
        };
        self.items[pos].score = score;
        let pos = self.sift_up(pos);
        self.sift_down(pos);
        true
    }

    pub fn has(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn score_of(&self, key: &K) -> Option<Timestamp> {
        self.index.get(key).map(|&pos| self.items[pos].score)
    }

    /// Drain every entry with `score <= now`, in `(score, seq)` order.
    pub fn pop_due(&mut self, now: Timestamp) -> Vec<HeapItem<K>> {
        let mut due = Vec::new();
        while self.peek().is_some_and(|item| item.score <= now) {
            if let Some(item) = self.extract_min() {
                due.push(item);
            }
        }
        due
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    // --- private helpers ---------------------------------------------------

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Remove and return the item at `pos`, restoring the heap property.
    fn take_at(&mut self, pos: usize) -> Option<HeapItem<K>> {
        let last = self.items.len().checked_sub(1)?;
        self.swap(pos, last);
        let item = self.items.pop()?;
        self.index.remove(&item.key);
        if pos < self.items.len() {
            let pos = self.sift_up(pos);
            self.sift_down(pos);
        }
        Some(item)
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.items.swap(a, b);
        if let Some(slot) = self.index.get_mut(&self.items[a].key) {
            *slot = a;
        }
        if let Some(slot) = self.index.get_mut(&self.items[b].key) {
            *slot = b;
        }
    }

    fn sift_up(&mut self, mut pos: usize) -> usize {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.items[pos].precedes(&self.items[parent]) {
                break;
            }
            self.swap(pos, parent);
            pos = parent;
        }
        pos
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.items.len();
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut smallest = pos;
            if left < len && self.items[left].precedes(&self.items[smallest]) {
                smallest = left;
            }
            if right < len && self.items[right].precedes(&self.items[smallest]) {
                smallest = right;
            }
            if smallest == pos {
                break;
            }
            self.swap(pos, smallest);
            pos = smallest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(heap: &mut IndexedHeap<&'static str>) -> Vec<&'static str> {
        std::iter::from_fn(|| heap.extract_min().map(|i| i.key)).collect()
    }

    #[test]
    fn extracts_in_score_order() {
        let mut heap = IndexedHeap::new();
        heap.insert("A", 100);
        heap.insert("B", 50);
        heap.insert("C", 150);
        assert_eq!(drain(&mut heap), vec!["B", "A", "C"]);
        assert!(heap.is_empty());
    }

    #[test]
    fn equal_scores_come_out_in_insertion_order() {
        let mut heap = IndexedHeap::new();
        for key in ["first", "second", "third", "fourth"] {
            heap.insert(key, 500);
        }
        heap.insert("early", 10);
        assert_eq!(drain(&mut heap), vec!["early", "first", "second", "third", "fourth"]);
    }

    #[test]
    fn update_changes_peek_immediately() {
        let mut heap = IndexedHeap::new();
        heap.insert("a", 100);
        heap.insert("b", 200);
        assert_eq!(heap.peek().map(|i| i.key), Some("a"));
        assert!(heap.update(&"b", 50));
        assert_eq!(heap.peek().map(|i| i.key), Some("b"));
        assert!(heap.update(&"b", 300));
        assert_eq!(heap.peek().map(|i| i.key), Some("a"));
    }

    #[test]
    fn update_keeps_registration_tie_break() {
        let mut heap = IndexedHeap::new();
        heap.insert("x", 10);
        heap.insert("y", 20);
        // y moves onto x's score but was registered later, so x still wins
        heap.update(&"y", 10);
        assert_eq!(drain(&mut heap), vec!["x", "y"]);
    }

    #[test]
    fn remove_by_key_keeps_relative_order() {
        let mut heap = IndexedHeap::new();
        heap.insert("a", 30);
        heap.insert("b", 10);
        heap.insert("c", 20);
        heap.insert("d", 40);
        assert!(heap.remove(&"c"));
        assert!(!heap.has(&"c"));
        assert_eq!(heap.len(), 3);
        assert_eq!(drain(&mut heap), vec!["b", "a", "d"]);
    }

    #[test]
    fn absent_keys_are_reported_not_panicked() {
        let mut heap: IndexedHeap<&str> = IndexedHeap::new();
        assert!(!heap.remove(&"ghost"));
        assert!(!heap.update(&"ghost", 5));
        assert!(heap.extract_min().is_none());
        assert!(heap.peek().is_none());
    }

    #[test]
    fn insert_existing_key_reschedules_instead_of_duplicating() {
        let mut heap = IndexedHeap::new();
        heap.insert("a", 100);
        heap.insert("a", 5);
        assert_eq!(heap.len(), 1);
        assert_eq!(heap.score_of(&"a"), Some(5));
    }

    #[test]
    fn from_items_heapifies_and_dedups() {
        let mut heap =
            IndexedHeap::from_items(vec![("a", 40), ("b", 10), ("c", 30), ("b", 35), ("d", 10)]);
        assert_eq!(heap.len(), 4);
        assert_eq!(drain(&mut heap), vec!["d", "c", "b", "a"]);
    }

    #[test]
    fn pop_due_drains_everything_up_to_now() {
        let mut heap = IndexedHeap::new();
        heap.insert("late", 1_000);
        heap.insert("due-2", 90);
        heap.insert("due-1", 90);
        heap.insert("overdue", 10);
        let due: Vec<_> = heap.pop_due(100).into_iter().map(|i| i.key).collect();
        assert_eq!(due, vec!["overdue", "due-2", "due-1"]);
        assert_eq!(heap.peek().map(|i| i.key), Some("late"));
    }

    #[test]
    fn clear_empties_heap_and_index() {
        let mut heap = IndexedHeap::from_items(vec![("a", 1), ("b", 2)]);
        heap.clear();
        assert!(heap.is_empty());
        assert!(!heap.has(&"a"));
    }

    #[test]
    fn mixed_operations_extract_non_decreasing() {
        // Deterministic LCG keeps the sequence reproducible without extra deps.
        let mut state: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = || {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            state >> 33
        };

        let mut heap: IndexedHeap<u64> = IndexedHeap::new();
        for round in 0..2_000u64 {
            match next() % 4 {
                0 | 1 => heap.insert(round, (next() % 100) as Timestamp),
                2 => {
                    heap.update(&(next() % (round + 1)), (next() % 100) as Timestamp);
                }
                _ => {
                    heap.remove(&(next() % (round + 1)));
                }
            }
            if round % 50 == 0 {
                // whatever comes out must precede everything still inside
                if let Some(item) = heap.extract_min() {
                    if let Some(rest) = heap.peek() {
                        assert!((item.score, item.seq) <= (rest.score, rest.seq));
                    }
                }
            }
        }

        for key in 0..2_000u64 {
            assert_eq!(heap.has(&key), heap.score_of(&key).is_some());
        }

        let mut last: Option<(Timestamp, u64)> = None;
        while let Some(item) = heap.extract_min() {
            let key = (item.score, item.seq);
            if let Some(prev) = last {
                assert!(prev <= key, "{prev:?} extracted before {key:?}");
            }
            last = Some(key);
        }
    }
}
