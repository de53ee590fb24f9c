//! # Storefront Images
//!
//! The generated-image cache and storage engine behind a web storefront.
//! It supplies product images at three sizes while a background worker keeps
//! synthesizing new ones, bounds memory with a pluggable eviction policy,
//! bounds disk with a pluggable admission rule, and re-syncs with a changed
//! product catalogue at runtime without losing images that are still in use.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────── SetupController ────────────────────┐
//!                 │ config · ImageIndex · ImageIdFactory · StorageSlot      │
//!                 └───────┬───────────────────┬──────────────────┬──────────┘
//!                         │ spawns            │ builds           │ injects
//!                         ▼                   ▼                  ▼
//!               GenerationWorker ──put──▶ CacheLayer ──▶ Drive/LimitedDrive ──▶ <workdir>/<id>
//!                         │                   ▲
//!                         └──set_mapping──▶ ImageIndex ◀──get── StoreImageProvider
//! ```
//!
//! A record is always stored before its mapping is registered, so any id a
//! reader can resolve already has its payload on disk.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`types`] | `SizeVariant`, `SubjectKey`, `ImageRecord` and friends |
//! | [`ids`] | Process-wide, strictly increasing image ids |
//! | [`index`] | `(subject, variant) → id` mapping with reverse lookup |
//! | [`rules`] | Storage and cache admission rules |
//! | [`storage`] | Drive-backed backends, the working directory, the swappable slot |
//! | [`cache`] | Bounded in-memory layer with six eviction policies |
//! | [`imaging`] | Synthetic image drawing and asset re-encoding |
//! | [`worker`] | Background generation thread with cooperative stop |
//! | [`setup`] | Orchestration: ingestion, generation, finalize, reconfiguration |
//! | [`provider`] | Product sources and the read-side image provider |
//! | [`config`] | `config.toml` loading, merging, and validation |
//! | [`output`] | CLI output formatting |
//! | [`logging`] | `tracing` subscriber setup for the binary |
//!
//! # Design Decisions
//!
//! ## One File Per Image Id
//!
//! The working directory is flat: the file name is the decimal image id and
//! nothing else. Mappings live in memory only, so a restart sees stray files
//! as garbage; setup continues id allocation above them so it never
//! overwrites one, and the next reconfiguration prunes them.
//!
//! ## Composition Over Inheritance For The Cache
//!
//! [`cache::CacheLayer`] wraps an `Arc<dyn StorageBackend>` and implements the
//! same trait. Readers hold one `Arc<dyn StorageBackend>` and never know
//! whether a cache is in front.
//!
//! ## Cooperative Cancellation
//!
//! The worker checks a stop flag between images and signals a condition
//! variable on exit. Reconfiguration waits on that signal with a timeout
//! instead of polling, and gives up without touching anything if the worker
//! does not stop in time.

pub mod cache;
pub mod config;
pub mod ids;
pub mod imaging;
pub mod index;
pub mod logging;
pub mod output;
pub mod provider;
pub mod rules;
pub mod setup;
pub mod storage;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_helpers;
