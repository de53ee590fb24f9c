//! Resident-set bookkeeping and victim selection.
//!
//! [`ResidentSet`] only records *when* each entry was inserted and used;
//! [`EvictionPolicy`] only decides *which* entry goes. Keeping the two apart
//! lets every policy run over the same data structure.
//!
//! Time is a logical clock that ticks on every insert and every hit, so
//! orderings are strict and a scripted access trace always evicts the same
//! key.

use crate::types::{ImageId, ImageRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Bookkeeping for one resident entry.
#[derive(Debug, Clone)]
pub struct Slot {
    record: Arc<ImageRecord>,
    /// Clock value when the entry became resident.
    pub inserted_at: u64,
    /// Clock value of the most recent insert or hit.
    pub last_access: u64,
    /// Number of reads served for this entry.
    pub accesses: u64,
}

/// Entries currently held in memory, keyed by image id.
#[derive(Debug, Default)]
pub struct ResidentSet {
    slots: HashMap<ImageId, Slot>,
    clock: u64,
}

impl ResidentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: ImageId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn slots(&self) -> impl Iterator<Item = (ImageId, &Slot)> {
        self.slots.iter().map(|(id, slot)| (*id, slot))
    }

    pub fn ids(&self) -> Vec<ImageId> {
        let mut ids: Vec<ImageId> = self.slots.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Record a read of `id` and return its record.
    pub fn touch(&mut self, id: ImageId) -> Option<Arc<ImageRecord>> {
        let now = self.tick();
        let slot = self.slots.get_mut(&id)?;
        slot.last_access = now;
        slot.accesses += 1;
        Some(Arc::clone(&slot.record))
    }

    /// Make `record` resident. `accessed` marks an insert that also served a
    /// read (a miss being filled). Re-inserting a resident id swaps the
    /// payload in place and keeps its insertion time.
    pub fn insert(&mut self, record: Arc<ImageRecord>, accessed: bool) {
        let now = self.tick();
        let reads = u64::from(accessed);
        match self.slots.get_mut(&record.id) {
            Some(slot) => {
                slot.record = record;
                slot.last_access = now;
                slot.accesses += reads;
            }
            None => {
                self.slots.insert(
                    record.id,
                    Slot {
                        record,
                        inserted_at: now,
                        last_access: now,
                        accesses: reads,
                    },
                );
            }
        }
    }

    pub fn remove(&mut self, id: ImageId) -> Option<Arc<ImageRecord>> {
        self.slots.remove(&id).map(|slot| slot.record)
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// How the cache picks the entry to drop when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Earliest inserted, regardless of use.
    Fifo,
    /// Most recently inserted.
    Lifo,
    /// Least recently used.
    Lru,
    /// Most recently used.
    Mru,
    /// Fewest reads; ties go to the earliest inserted.
    Lfu,
    /// Uniformly random resident entry.
    Random,
}

impl EvictionPolicy {
    /// The id to evict from `resident`, or `None` if it is empty.
    pub fn select_victim(&self, resident: &ResidentSet) -> Option<ImageId> {
        let mut slots = resident.slots();
        match self {
            EvictionPolicy::Fifo => slots.min_by_key(|(_, s)| s.inserted_at).map(|(id, _)| id),
            EvictionPolicy::Lifo => slots.max_by_key(|(_, s)| s.inserted_at).map(|(id, _)| id),
            EvictionPolicy::Lru => slots.min_by_key(|(_, s)| s.last_access).map(|(id, _)| id),
            EvictionPolicy::Mru => slots.max_by_key(|(_, s)| s.last_access).map(|(id, _)| id),
            EvictionPolicy::Lfu => slots
                .min_by_key(|(_, s)| (s.accesses, s.inserted_at))
                .map(|(id, _)| id),
            EvictionPolicy::Random => {
                if resident.is_empty() {
                    return None;
                }
                let pick = fastrand::usize(..resident.len());
                slots.nth(pick).map(|(id, _)| id)
            }
        }
    }
}

/// Configured cache mode: no cache, or a cache with one eviction policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    None,
    Fifo,
    Lifo,
    Random,
    #[default]
    Lfu,
    Lru,
    Mru,
}

impl CacheMode {
    pub fn policy(self) -> Option<EvictionPolicy> {
        match self {
            CacheMode::None => None,
            CacheMode::Fifo => Some(EvictionPolicy::Fifo),
            CacheMode::Lifo => Some(EvictionPolicy::Lifo),
            CacheMode::Random => Some(EvictionPolicy::Random),
            CacheMode::Lfu => Some(EvictionPolicy::Lfu),
            CacheMode::Lru => Some(EvictionPolicy::Lru),
            CacheMode::Mru => Some(EvictionPolicy::Mru),
        }
    }
}

impl FromStr for CacheMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CacheMode::None),
            "fifo" => Ok(CacheMode::Fifo),
            "lifo" => Ok(CacheMode::Lifo),
            "random" | "rr" => Ok(CacheMode::Random),
            "lfu" => Ok(CacheMode::Lfu),
            "lru" => Ok(CacheMode::Lru),
            "mru" => Ok(CacheMode::Mru),
            other => Err(format!("unknown cache mode '{other}'")),
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CacheMode::None => "none",
            CacheMode::Fifo => "fifo",
            CacheMode::Lifo => "lifo",
            CacheMode::Random => "random",
            CacheMode::Lfu => "lfu",
            CacheMode::Lru => "lru",
            CacheMode::Mru => "mru",
        })
    }
}
