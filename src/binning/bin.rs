//! Bin - a bounded batch-in-progress.

use crate::record::Record;
use crate::traits::Session;
use std::time::{Duration, Instant};

/// One record together with the session that pulled it from upstream.
///
/// The session stays attached to its record for the record's whole journey
/// through the engine so the driver loop can commit or roll back each input
/// independently once the bin is processed.
pub struct BinEntry {
    pub record: Record,
    pub session: Box<dyn Session>,
}

impl BinEntry {
    pub fn new(record: Record, session: Box<dyn Session>) -> Self {
        Self { record, session }
    }
}

impl std::fmt::Debug for BinEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinEntry")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

/// A single mutable container of records being grouped into one batch.
///
/// Bounds are captured at construction time from the manager's settings at
/// that moment; later reconfiguration of the manager never affects an
/// existing bin. Insertion order is significant and preserved end to end.
///
/// A bin has no concurrency control of its own: it is exclusively owned by
/// its manager until evicted, then by the ready queue, then by the single
/// driver tick that dequeues it. Ownership transfer is total.
pub struct Bin {
    contents: Vec<BinEntry>,
    size: u64,
    min_size: u64,
    max_size: u64,
    min_entries: usize,
    max_entries: usize,
    max_age: Option<Duration>,
    created_at: Instant,
    sealed: bool,
}

impl Bin {
    /// Create a bin with the given bounds
    pub fn new(
        min_size: u64,
        max_size: Option<u64>,
        min_entries: usize,
        max_entries: Option<usize>,
        max_age: Option<Duration>,
    ) -> Self {
        Self {
            contents: Vec::new(),
            size: 0,
            min_size,
            max_size: max_size.unwrap_or(u64::MAX),
            min_entries,
            max_entries: max_entries.unwrap_or(usize::MAX),
            max_age,
            created_at: Instant::now(),
            sealed: false,
        }
    }

    /// The dedicated bin for records that fit no configured bin: unbounded
    /// maximums, zero minimums, so it is eviction-eligible the moment it is
    /// created. This is intentional forward-progress behavior for oversized
    /// inputs, never a holding area.
    pub fn unbounded() -> Self {
        Self::new(0, None, 0, None, None)
    }

    /// Offer an entry to this bin.
    ///
    /// Returns the entry back on rejection, with no side effect. A bin rejects
    /// when accepting would exceed `max_entries` or `max_size`, or when it has
    /// been sealed. Minimum bounds never cause rejection; they only gate
    /// eviction readiness.
    pub fn offer(&mut self, entry: BinEntry) -> Result<(), BinEntry> {
        if self.sealed {
            return Err(entry);
        }
        if self.contents.len() + 1 > self.max_entries {
            return Err(entry);
        }
        // checked so a huge record can never overflow the running sum
        let new_size = match self.size.checked_add(entry.record.size()) {
            Some(s) if s <= self.max_size => s,
            _ => return Err(entry),
        };

        self.size = new_size;
        self.contents.push(entry);
        Ok(())
    }

    /// True when no further entry can possibly be accepted
    pub fn is_full(&self) -> bool {
        self.contents.len() >= self.max_entries || self.size >= self.max_size
    }

    /// True when the bin has met its completion predicate: both minimum
    /// bounds satisfied, or older than its maximum age. The age path lets a
    /// partially-filled bin flush instead of waiting indefinitely for more
    /// arrivals.
    pub fn is_eligible_for_eviction(&self, now: Instant) -> bool {
        if self.contents.len() >= self.min_entries && self.size >= self.min_size {
            return true;
        }
        match self.max_age {
            Some(max_age) => now.duration_since(self.created_at) >= max_age,
            None => false,
        }
    }

    /// Mark the bin read-only; all further offers are rejected
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Number of entries in the bin
    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Running sum of the contained record sizes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Creation timestamp, used for age-based and forced-oldest eviction
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Contents in insertion order
    pub fn contents(&self) -> &[BinEntry] {
        &self.contents
    }

    /// Mutable access to the contents, preserving insertion order
    pub fn contents_mut(&mut self) -> &mut [BinEntry] {
        &mut self.contents
    }

    /// Consume the bin, yielding its contents in insertion order
    pub fn into_contents(self) -> Vec<BinEntry> {
        self.contents
    }
}

impl std::fmt::Debug for Bin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bin")
            .field("entries", &self.contents.len())
            .field("size", &self.size)
            .field("sealed", &self.sealed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Destination;
    use crate::EngineResult;
    use async_trait::async_trait;

    struct NoopSession;

    #[async_trait]
    impl Session for NoopSession {
        async fn next(&mut self) -> EngineResult<Option<Record>> {
            Ok(None)
        }
        async fn transfer(&mut self, _: &Record, _: Destination) -> EngineResult<()> {
            Ok(())
        }
        async fn commit(&mut self) -> EngineResult<()> {
            Ok(())
        }
        async fn rollback(&mut self) -> EngineResult<()> {
            Ok(())
        }
    }

    fn entry(id: u64, size: u64) -> BinEntry {
        BinEntry::new(Record::new(id, size), Box::new(NoopSession))
    }

    #[test]
    fn test_offer_respects_max_entries() {
        let mut bin = Bin::new(0, None, 1, Some(2), None);

        assert!(bin.offer(entry(1, 10)).is_ok());
        assert!(bin.offer(entry(2, 10)).is_ok());
        assert!(bin.is_full());

        let rejected = bin.offer(entry(3, 10));
        assert!(rejected.is_err());
        // rejection has no side effect
        assert_eq!(bin.len(), 2);
        assert_eq!(bin.size(), 20);
    }

    #[test]
    fn test_offer_respects_max_size() {
        let mut bin = Bin::new(0, Some(100), 1, None, None);

        assert!(bin.offer(entry(1, 60)).is_ok());
        assert!(bin.offer(entry(2, 50)).is_err());
        assert!(bin.offer(entry(3, 40)).is_ok());
        assert_eq!(bin.size(), 100);
        assert!(bin.is_full());
    }

    #[test]
    fn test_minimum_bounds_never_reject() {
        // minimums gate eviction, not admission
        let mut bin = Bin::new(1000, None, 50, None, None);
        assert!(bin.offer(entry(1, 1)).is_ok());
        assert!(!bin.is_eligible_for_eviction(Instant::now()));
    }

    #[test]
    fn test_size_additivity() {
        let mut bin = Bin::new(0, None, 1, None, None);
        let sizes = [5u64, 17, 42, 100];
        for (i, s) in sizes.iter().enumerate() {
            bin.offer(entry(i as u64, *s)).unwrap();
        }
        assert_eq!(bin.size(), sizes.iter().sum::<u64>());
    }

    #[test]
    fn test_eviction_by_fill_level() {
        let mut bin = Bin::new(20, None, 2, None, None);
        let now = Instant::now();

        bin.offer(entry(1, 15)).unwrap();
        assert!(!bin.is_eligible_for_eviction(now)); // 1 < 2 entries

        bin.offer(entry(2, 3)).unwrap();
        assert!(!bin.is_eligible_for_eviction(now)); // 18 < 20 bytes

        bin.offer(entry(3, 2)).unwrap();
        assert!(bin.is_eligible_for_eviction(now));
    }

    #[test]
    fn test_eviction_by_age() {
        let mut bin = Bin::new(0, None, 100, None, Some(Duration::from_secs(30)));
        bin.offer(entry(1, 1)).unwrap();

        let now = Instant::now();
        assert!(!bin.is_eligible_for_eviction(now));
        // a partially-filled bin flushes once it ages out
        assert!(bin.is_eligible_for_eviction(now + Duration::from_secs(31)));
    }

    #[test]
    fn test_sealed_bin_rejects() {
        let mut bin = Bin::new(0, None, 1, None, None);
        bin.offer(entry(1, 10)).unwrap();
        bin.seal();

        assert!(bin.is_sealed());
        assert!(bin.offer(entry(2, 10)).is_err());
        assert_eq!(bin.len(), 1);
    }

    #[test]
    fn test_offer_size_overflow_rejected() {
        let mut bin = Bin::new(0, None, 1, None, None);
        bin.offer(entry(1, u64::MAX)).unwrap();

        // the running sum would wrap; the offer is rejected, not corrupted
        assert!(bin.offer(entry(2, 2)).is_err());
        assert_eq!(bin.len(), 1);
        assert_eq!(bin.size(), u64::MAX);
    }

    #[test]
    fn test_unbounded_bin_immediately_eligible() {
        let mut bin = Bin::unbounded();
        bin.offer(entry(1, u64::MAX / 2)).unwrap();
        assert!(bin.is_eligible_for_eviction(Instant::now()));
    }

    #[test]
    fn test_insertion_order_preserved() {
        let mut bin = Bin::new(0, None, 1, None, None);
        for id in 0..5 {
            bin.offer(entry(id, 1)).unwrap();
        }
        let ids: Vec<u64> = bin.contents().iter().map(|e| e.record.id()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }
}
