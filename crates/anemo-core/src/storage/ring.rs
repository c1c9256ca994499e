//! Fixed-capacity, time-ordered history rings.
//!
//! The arena is allocated once at construction. Writes advance a cursor that
//! wraps modulo capacity and silently overwrite the oldest entry. Every push is
//! also numbered with a monotonically increasing sequence so that a streaming
//! reader can remember "where it was" across loop iterations and detect
//! entries that were evicted in the meantime.

use alloc::boxed::Box;
use alloc::vec::Vec;

use thiserror_no_std::Error;

use super::{Bucket, DayRollup};

/// Records that carry their own ordering key.
pub trait Timestamped {
    fn epoch(&self) -> i64;
}

impl Timestamped for Bucket {
    fn epoch(&self) -> i64 {
        self.start_epoch
    }
}

impl Timestamped for DayRollup {
    fn epoch(&self) -> i64 {
        self.day_start_epoch
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    #[error("entry at {got} is not newer than the newest entry at {newest}")]
    OutOfOrder { newest: i64, got: i64 },
}

pub struct HistoryRing<T> {
    slots: Box<[Option<T>]>,
    /// Total pushes since construction; the next write lands at `pushed % capacity`
    pushed: u64,
}

impl<T: Timestamped> HistoryRing<T> {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity.max(1));
        slots.resize_with(capacity.max(1), || None);
        Self {
            slots: slots.into_boxed_slice(),
            pushed: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.pushed.min(self.slots.len() as u64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.pushed == 0
    }

    /// Sequence number the next push will receive.
    pub fn write_seq(&self) -> u64 {
        self.pushed
    }

    /// Sequence number of the oldest live entry.
    pub fn oldest_seq(&self) -> u64 {
        self.pushed - self.len() as u64
    }

    fn slot(&self, seq: u64) -> usize {
        (seq % self.slots.len() as u64) as usize
    }

    /// Append an entry, evicting the oldest one when full.
    ///
    /// Entries must be strictly newer than the current newest one.
    pub fn push(&mut self, item: T) -> Result<(), RingError> {
        if let Some(newest) = self.newest() {
            let newest = newest.epoch();
            if item.epoch() <= newest {
                return Err(RingError::OutOfOrder {
                    newest,
                    got: item.epoch(),
                });
            }
        }
        let index = self.slot(self.pushed);
        self.slots[index] = Some(item);
        self.pushed += 1;
        Ok(())
    }

    /// Entry with sequence `seq`, if it has been written and not yet evicted.
    pub fn get_seq(&self, seq: u64) -> Option<&T> {
        if seq >= self.pushed || seq < self.oldest_seq() {
            return None;
        }
        self.slots[self.slot(seq)].as_ref()
    }

    pub fn newest(&self) -> Option<&T> {
        self.pushed.checked_sub(1).and_then(|seq| self.get_seq(seq))
    }

    pub fn oldest(&self) -> Option<&T> {
        self.get_seq(self.oldest_seq())
    }

    /// Live entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (self.oldest_seq()..self.pushed).filter_map(move |seq| self.get_seq(seq))
    }

    /// Live entries with `epoch >= since`, oldest first.
    pub fn query(&self, since: i64) -> impl Iterator<Item = &T> + '_ {
        self.iter().skip_while(move |item| item.epoch() < since)
    }

    /// First sequence whose entry has `epoch >= since`, or `write_seq()` if none.
    pub fn seq_since(&self, since: i64) -> u64 {
        (self.oldest_seq()..self.pushed)
            .find(|&seq| self.get_seq(seq).is_some_and(|item| item.epoch() >= since))
            .unwrap_or(self.pushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(epoch: i64) -> Bucket {
        Bucket::new(epoch)
    }

    fn epochs(ring: &HistoryRing<Bucket>, since: i64) -> Vec<i64> {
        ring.query(since).map(|b| b.start_epoch).collect()
    }

    #[test]
    fn test_partially_filled_ring_skips_unwritten_slots() {
        let mut ring = HistoryRing::new(5);
        ring.push(bucket(60)).unwrap();
        ring.push(bucket(120)).unwrap();
        assert_eq!(ring.len(), 2);
        assert_eq!(epochs(&ring, 0), vec![60, 120]);
        assert_eq!(ring.oldest().unwrap().start_epoch, 60);
    }

    #[test]
    fn test_overflow_evicts_exactly_oldest() {
        let capacity = 4;
        let mut ring = HistoryRing::new(capacity);
        for i in 0..=capacity as i64 {
            ring.push(bucket(i * 60)).unwrap();
        }
        assert_eq!(ring.len(), capacity);
        assert_eq!(epochs(&ring, 0), vec![60, 120, 180, 240]);
        assert!(ring.get_seq(0).is_none());
        assert_eq!(ring.get_seq(1).unwrap().start_epoch, 60);
    }

    #[test]
    fn test_query_since_is_ascending_after_wrap() {
        let mut ring = HistoryRing::new(3);
        for i in 1..=7 {
            ring.push(bucket(i * 60)).unwrap();
        }
        assert_eq!(epochs(&ring, 330), vec![360, 420]);
        assert_eq!(ring.seq_since(330), 5);
        assert_eq!(ring.seq_since(10_000), ring.write_seq());
    }

    #[test]
    fn test_rejects_duplicate_and_older_entries() {
        let mut ring = HistoryRing::new(3);
        ring.push(bucket(120)).unwrap();
        assert_eq!(
            ring.push(bucket(120)),
            Err(RingError::OutOfOrder {
                newest: 120,
                got: 120
            })
        );
        assert!(ring.push(bucket(60)).is_err());
        assert_eq!(ring.len(), 1);
    }
}
