use alloc::collections::VecDeque;
use alloc::vec::Vec;

/// A bounded ring that stamps every entry with a monotonically increasing
/// sequence number.
///
/// When full, a push overwrites the oldest entry. Readers page through the
/// ring with `since`, so a reader that falls behind simply observes a gap in
/// sequence numbers instead of blocking the writer.
#[derive(Debug, Clone)]
pub struct SequencedRing<T> {
    entries: VecDeque<(u64, T)>,
    capacity: usize,
    next_seq: u64,
}

impl<T> SequencedRing<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "SequencedRing capacity must be non-zero");
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            next_seq: 0,
        }
    }

    /// Appends an entry built from its sequence number; returns that number.
    pub fn push_with(&mut self, build: impl FnOnce(u64) -> T) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((seq, build(seq)));
        seq
    }

    pub fn push(&mut self, item: T) -> u64 {
        self.push_with(|_| item)
    }

    /// Total number of entries ever pushed, including overwritten ones.
    pub fn total(&self) -> u64 {
        self.next_seq
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The newest `limit` entries whose sequence number is `>= since`,
    /// oldest first.
    pub fn since(&self, since: u64, limit: usize) -> Vec<(u64, &T)> {
        let fresh = self.entries.iter().filter(|(seq, _)| *seq >= since).count();
        let skip = fresh.saturating_sub(limit);
        self.entries
            .iter()
            .filter(|(seq, _)| *seq >= since)
            .skip(skip)
            .map(|(seq, item)| (*seq, item))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &T)> {
        self.entries.iter().map(|(seq, item)| (*seq, item))
    }
}
