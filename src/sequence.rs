//! Ordered, rotatable holder container behind each live address.
//!
//! A [`CyclicSequence`] is an immutable snapshot: `add` and `remove_first`
//! return new sequences, while the rotation cursor is shared across
//! generations so round-robin position survives membership changes. The
//! registry swaps whole sequences atomically per address key; readers that
//! cloned a sequence keep iterating their snapshot.

use core::slice;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;

pub struct CyclicSequence<T> {
    cursor: Arc<AtomicUsize>,
    items: SmallVec<[T; 4]>,
}

impl<T: Clone> Default for CyclicSequence<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Clone for CyclicSequence<T> {
    fn clone(&self) -> Self {
        Self {
            cursor: self.cursor.clone(),
            items: self.items.clone(),
        }
    }
}

impl<T: Clone> CyclicSequence<T> {
    pub fn new() -> Self {
        Self {
            cursor: Arc::new(AtomicUsize::new(0)),
            items: SmallVec::new(),
        }
    }

    pub fn with(item: T) -> Self {
        let mut items = SmallVec::new();
        items.push(item);
        Self {
            cursor: Arc::new(AtomicUsize::new(0)),
            items,
        }
    }

    /// New sequence with `item` appended, preserving insertion order and the
    /// shared cursor.
    #[must_use]
    pub fn add(&self, item: T) -> Self {
        let mut items = self.items.clone();
        items.push(item);
        Self {
            cursor: self.cursor.clone(),
            items,
        }
    }

    /// New sequence without the first item matching `pred`. The cursor keeps
    /// counting; positions past the removed element shift modulo the new
    /// size.
    #[must_use]
    pub fn remove_first(&self, pred: impl Fn(&T) -> bool) -> Self {
        let mut items = self.items.clone();
        if let Some(idx) = items.iter().position(&pred) {
            items.remove(idx);
        }
        Self {
            cursor: self.cursor.clone(),
            items,
        }
    }

    /// Advances the cursor and returns the element it pointed at, or `None`
    /// on an empty sequence. Safe under concurrent callers; the cursor is a
    /// monotonic counter taken modulo the current size.
    pub fn next(&self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let pos = self.cursor.fetch_add(1, Ordering::Relaxed);
        Some(self.items[pos % self.items.len()].clone())
    }

    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    /// Snapshot iteration for publish fan-out.
    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sequence_yields_nothing() {
        let seq: CyclicSequence<u32> = CyclicSequence::new();
        assert!(seq.is_empty());
        assert_eq!(seq.next(), None);
        assert_eq!(seq.first(), None);
    }

    #[test]
    fn add_preserves_insertion_order() {
        let seq = CyclicSequence::with(1).add(2).add(3);
        assert_eq!(seq.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(seq.first(), Some(&1));
    }

    #[test]
    fn next_rotates_round_robin() {
        let seq = CyclicSequence::with(1).add(2).add(3);
        let picks: Vec<_> = (0..6).map(|_| seq.next().unwrap()).collect();
        assert_eq!(picks, vec![1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn remove_first_drops_single_occurrence() {
        let seq = CyclicSequence::with(1).add(2).add(2).add(3);
        let seq = seq.remove_first(|x| *x == 2);
        assert_eq!(seq.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn remove_missing_is_noop() {
        let seq = CyclicSequence::with(1).add(2);
        let seq = seq.remove_first(|x| *x == 9);
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn cursor_survives_membership_changes() {
        let seq = CyclicSequence::with(1).add(2).add(3);
        assert_eq!(seq.next(), Some(1));
        assert_eq!(seq.next(), Some(2));

        // cursor now at 2; removal shrinks to [1, 3] and position wraps
        let seq = seq.remove_first(|x| *x == 2);
        assert_eq!(seq.next(), Some(1));
        assert_eq!(seq.next(), Some(3));
        assert_eq!(seq.next(), Some(1));
    }

    #[test]
    fn clone_shares_cursor_with_snapshot() {
        let seq = CyclicSequence::with(1).add(2);
        let snapshot = seq.clone();
        assert_eq!(seq.next(), Some(1));
        // the clone observes the advanced cursor
        assert_eq!(snapshot.next(), Some(2));
    }
}
