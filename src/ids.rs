//! Process-wide image identifier allocation.

use crate::types::ImageId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out strictly increasing image identifiers.
///
/// One factory is created by the entry point and shared (`Arc`) between the
/// setup controller, the generation worker and pre-existing ingestion, so ids
/// stay unique across every generation run and reconfiguration of the
/// process. Wraparound is not handled.
#[derive(Debug)]
pub struct ImageIdFactory {
    next: AtomicU64,
}

impl ImageIdFactory {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Factory whose first id is `first`. Used when ids below it are already
    /// taken, e.g. by files left in the working directory.
    pub fn starting_at(first: ImageId) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn next_id(&self) -> ImageId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The id the next call will return, without consuming it.
    pub fn peek(&self) -> ImageId {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for ImageIdFactory {
    fn default() -> Self {
        Self::new()
    }
}
