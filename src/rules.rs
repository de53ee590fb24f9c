//! Admission rules: may this record enter a tier?
//!
//! Storage and cache each take a rule at construction. Both rule families
//! are closed enums selected by configuration, implementing the same
//! [`AdmissionRule`] seam so a tier never cares which family it was given.

use crate::types::{ImageRecord, SizeVariant};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub trait AdmissionRule: Send + Sync {
    fn admits(&self, record: &ImageRecord) -> bool;
}

/// Which records the drive storage persists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageRule {
    /// Persist everything.
    #[default]
    All,
    /// Persist only images at the largest variant; smaller ones live in
    /// memory at most.
    FullSize,
}

impl AdmissionRule for StorageRule {
    fn admits(&self, record: &ImageRecord) -> bool {
        match self {
            StorageRule::All => true,
            StorageRule::FullSize => record.variant == SizeVariant::largest(),
        }
    }
}

impl FromStr for StorageRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "all" => Ok(StorageRule::All),
            "full-size" | "full" => Ok(StorageRule::FullSize),
            other => Err(format!("unknown storage rule '{other}'")),
        }
    }
}

impl fmt::Display for StorageRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorageRule::All => "all",
            StorageRule::FullSize => "full-size",
        })
    }
}

/// Which records the in-memory cache keeps resident.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheRule {
    #[default]
    All,
}

impl AdmissionRule for CacheRule {
    fn admits(&self, _record: &ImageRecord) -> bool {
        match self {
            CacheRule::All => true,
        }
    }
}

impl FromStr for CacheRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(CacheRule::All),
            other => Err(format!("unknown cache rule '{other}'")),
        }
    }
}

impl fmt::Display for CacheRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("all")
    }
}
