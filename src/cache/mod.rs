//! In-memory cache layer in front of a storage backend.
//!
//! The storefront asks for the same handful of thumbnails over and over, and
//! reading them from the working directory on every request is wasted I/O.
//! [`CacheLayer`] keeps a bounded pool of records in memory and falls
//! through to the wrapped backend on a miss.
//!
//! # Design
//!
//! The layer is a decorator by composition: it holds an
//! `Arc<dyn StorageBackend>` and implements [`StorageBackend`] itself, so the
//! provider cannot tell whether it was handed a bare backend or a cached one.
//!
//! ## Keys
//!
//! Resident entries are keyed by image id. Lookups by subject go through the
//! [`ImageIndex`] first; the cache never owns mappings and eviction never
//! touches them.
//!
//! ## Slot lifecycle
//!
//! ```text
//! absent ──(miss filled / put / cache_data)──▶ resident ──(chosen as victim)──▶ evicted
//! ```
//!
//! An evicted entry is simply absent again: the next read refetches it from
//! the backend if the backend still has it.
//!
//! ## Atomicity
//!
//! Insertion and the eviction it may trigger happen under one lock, so no
//! reader ever sees more than `max_entries` residents, and replacing a
//! resident id swaps the payload in place rather than removing it first.
//! Backend reads on a miss happen outside the lock.

mod policy;

pub use policy::{CacheMode, EvictionPolicy, ResidentSet, Slot};

use crate::index::ImageIndex;
use crate::rules::{AdmissionRule, CacheRule};
use crate::storage::{StorageBackend, StorageError, resolve};
use crate::types::{ImageId, ImageRecord, SizeVariant, SubjectKey};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Default maximum number of resident images.
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Hit/miss/eviction counters for one cache layer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.evictions > 0 {
            write!(
                f,
                "{} hits, {} misses, {} evicted ({} lookups)",
                self.hits,
                self.misses,
                self.evictions,
                self.lookups()
            )
        } else {
            write!(f, "{} hits, {} misses ({} lookups)", self.hits, self.misses, self.lookups())
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    resident: ResidentSet,
    stats: CacheStats,
}

pub struct CacheLayer {
    backend: Arc<dyn StorageBackend>,
    index: Arc<ImageIndex>,
    policy: EvictionPolicy,
    rule: CacheRule,
    max_entries: usize,
    state: Mutex<CacheState>,
}

impl CacheLayer {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        index: Arc<ImageIndex>,
        policy: EvictionPolicy,
        max_entries: usize,
        rule: CacheRule,
    ) -> Self {
        Self {
            backend,
            index,
            policy,
            rule,
            max_entries,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Insert `record` without consulting the backend. Used to pre-warm the
    /// cache with images setup already has in hand.
    pub fn cache_data(&self, record: Arc<ImageRecord>) -> bool {
        self.admit(record, false)
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn resident_count(&self) -> usize {
        self.lock().resident.len()
    }

    /// Resident ids, ascending.
    pub fn resident_ids(&self) -> Vec<ImageId> {
        self.lock().resident.ids()
    }

    pub fn is_resident(&self, id: ImageId) -> bool {
        self.lock().resident.contains(id)
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    /// Make `record` resident if the cache rule allows it, evicting one
    /// victim first when full.
    fn admit(&self, record: Arc<ImageRecord>, accessed: bool) -> bool {
        if self.max_entries == 0 || !self.rule.admits(&record) {
            return false;
        }

        let mut state = self.lock();
        if !state.resident.contains(record.id)
            && state.resident.len() >= self.max_entries
            && let Some(victim) = self.policy.select_victim(&state.resident)
        {
            state.resident.remove(victim);
            state.stats.evictions += 1;
            tracing::trace!(victim, policy = ?self.policy, "evicted cached image");
        }
        state.resident.insert(record, accessed);
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().expect("cache state lock poisoned")
    }
}

impl StorageBackend for CacheLayer {
    /// Write through to the backend and keep a resident copy. Only records
    /// the backend stored are cached, and the result is the backend's.
    fn put(&self, record: Arc<ImageRecord>) -> Result<bool, StorageError> {
        let stored = self.backend.put(Arc::clone(&record))?;
        if stored {
            self.admit(record, false);
        }
        Ok(stored)
    }

    fn get(&self, subject: &SubjectKey, variant: SizeVariant) -> Result<Arc<ImageRecord>, StorageError> {
        let id = resolve(&self.index, subject, variant)?;
        self.load(id)
    }

    fn load(&self, id: ImageId) -> Result<Arc<ImageRecord>, StorageError> {
        {
            let mut state = self.lock();
            if let Some(record) = state.resident.touch(id) {
                state.stats.hits += 1;
                return Ok(record);
            }
            state.stats.misses += 1;
        }

        let record = self.backend.load(id)?;
        self.admit(Arc::clone(&record), true);
        Ok(record)
    }

    fn contains(&self, subject: &SubjectKey, variant: SizeVariant) -> bool {
        match self.index.image_id(subject, variant) {
            Some(id) => self.is_resident(id) || self.backend.contains(subject, variant),
            None => false,
        }
    }
}
