//! BinManager - owns the set of active bins and implements admission and eviction.

use super::bin::{Bin, BinEntry};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Owns the active bins of one engine instance, indexed by group key.
///
/// Multiple concurrent bins per key are allowed so that bin size stays
/// bounded. Only the instance's single driver tick mutates the manager, but
/// status and metrics reporting may read it concurrently, so the internal
/// structure sits behind a read/write lock and all methods take `&self`.
///
/// Bound setters affect bins created thereafter; pre-existing bins keep the
/// bounds captured at their construction.
pub struct BinManager {
    state: RwLock<ManagerState>,
}

struct ManagerState {
    groups: HashMap<String, Vec<Bin>>,
    bin_count: usize,
    min_size: u64,
    max_size: Option<u64>,
    min_entries: usize,
    max_entries: Option<usize>,
    max_bin_count: usize,
    max_bin_age: Option<Duration>,
}

impl BinManager {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ManagerState {
                groups: HashMap::new(),
                bin_count: 0,
                min_size: 0,
                max_size: None,
                min_entries: 1,
                max_entries: None,
                max_bin_count: 100,
                max_bin_age: None,
            }),
        }
    }

    pub fn set_minimum_size(&self, bytes: u64) {
        self.state.write().min_size = bytes;
    }

    pub fn set_maximum_size(&self, bytes: Option<u64>) {
        self.state.write().max_size = bytes;
    }

    pub fn set_minimum_entries(&self, entries: usize) {
        self.state.write().min_entries = entries;
    }

    pub fn set_maximum_entries(&self, entries: Option<usize>) {
        self.state.write().max_entries = entries;
    }

    pub fn set_max_bin_count(&self, count: usize) {
        self.state.write().max_bin_count = count;
    }

    pub fn set_max_bin_age(&self, age: Option<Duration>) {
        self.state.write().max_bin_age = age;
    }

    /// Offer an entry to the bins of `group_key`.
    ///
    /// Candidates are tried oldest-first, so older bins fill up before newer
    /// ones and age-based eviction wastes as little capacity as possible. If
    /// no existing bin accepts and the manager is below its bin-count limit, a
    /// new bin is created with the current bounds and registered under the
    /// key. Returns the entry back when no bin accepts and none can be
    /// created; the caller then owns forward progress for the record.
    pub fn offer(&self, group_key: &str, entry: BinEntry) -> Result<(), BinEntry> {
        let mut state = self.state.write();

        let mut entry = entry;
        if let Some(bins) = state.groups.get_mut(group_key) {
            for bin in bins.iter_mut() {
                if bin.is_full() {
                    continue;
                }
                match bin.offer(entry) {
                    Ok(()) => return Ok(()),
                    Err(rejected) => entry = rejected,
                }
            }
        }

        if state.bin_count >= state.max_bin_count {
            return Err(entry);
        }

        let mut bin = Bin::new(
            state.min_size,
            state.max_size,
            state.min_entries,
            state.max_entries,
            state.max_bin_age,
        );
        match bin.offer(entry) {
            Ok(()) => {
                debug!(group_key, "Created new bin");
                state.groups.entry(group_key.to_string()).or_default().push(bin);
                state.bin_count += 1;
                Ok(())
            }
            // a record too large for even a fresh bin with current bounds
            Err(rejected) => Err(rejected),
        }
    }

    /// Remove and return every bin that has met its completion predicate.
    ///
    /// Returned bins are fully detached: they are no longer reachable via
    /// `offer`. When `seal` is set each returned bin is also made read-only,
    /// which is what the driver loop wants before handing bins to the ready
    /// queue. Order of the returned list is unspecified.
    pub fn remove_ready_bins(&self, seal: bool) -> Vec<Bin> {
        let mut state = self.state.write();
        let now = Instant::now();
        let mut ready = Vec::new();

        for bins in state.groups.values_mut() {
            let mut i = 0;
            while i < bins.len() {
                if bins[i].is_eligible_for_eviction(now) {
                    let mut bin = bins.remove(i);
                    if seal {
                        bin.seal();
                    }
                    ready.push(bin);
                } else {
                    i += 1;
                }
            }
        }

        state.groups.retain(|_, bins| !bins.is_empty());
        state.bin_count -= ready.len();
        ready
    }

    /// Forcibly evict the single bin with the earliest creation moment.
    ///
    /// Used when the manager is at capacity and nothing naturally became
    /// ready: without this, a full manager whose bins never meet their
    /// minimum thresholds would never free a slot for new group keys.
    pub fn remove_oldest_bin(&self) -> Option<Bin> {
        let mut state = self.state.write();

        let oldest_key = state
            .groups
            .iter()
            .flat_map(|(key, bins)| bins.iter().map(move |bin| (key, bin.created_at())))
            .min_by_key(|(_, created_at)| *created_at)
            .map(|(key, _)| key.clone())?;

        let bins = state.groups.get_mut(&oldest_key)?;
        let idx = bins
            .iter()
            .enumerate()
            .min_by_key(|(_, bin)| bin.created_at())
            .map(|(i, _)| i)?;

        let mut bin = bins.remove(idx);
        bin.seal();
        if bins.is_empty() {
            state.groups.remove(&oldest_key);
        }
        state.bin_count -= 1;
        debug!(group_key = %oldest_key, "Force-evicted oldest bin");
        Some(bin)
    }

    /// Number of active bins
    pub fn bin_count(&self) -> usize {
        self.state.read().bin_count
    }

    /// Number of distinct group keys with at least one active bin
    pub fn group_count(&self) -> usize {
        self.state.read().groups.len()
    }

    /// Drop all active bins without returning them.
    ///
    /// Used at shutdown/reset. Any sessions referenced by purged bins are
    /// rolled back by their owners, not by the manager.
    pub fn purge(&self) {
        let mut state = self.state.write();
        state.groups.clear();
        state.bin_count = 0;
    }
}

impl Default for BinManager {
    fn default() -> Self {
        Self::new()
    }
}
