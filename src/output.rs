//! CLI output formatting.
//!
//! # Subject-First Display
//!
//! Every line leads with *whose* image it is (product or web label) and
//! positional index; image ids, sizes and timings follow as detail. The
//! output reads as an inventory of what the storefront can now show.
//!
//! # Output Format
//!
//! ## Ingestion
//!
//! ```text
//! Pre-existing images
//!     2 ingested from assets/
//! ```
//!
//! ## Generation
//!
//! ```text
//! Generating 3 full images
//!     001 product 10 → image 4 (1.2 KiB, 35ms)
//!     002 product 20 → refused by storage rule (image 5)
//!     003 product 30 → failed: Encoding failed: out of memory
//! Generated 1, refused 1, failed 1 (avg 35ms)
//! ```
//!
//! ## Reconfiguration
//!
//! ```text
//! Reconfiguration
//!     kept: 12 product images
//!     new: 3 products queued
//!     deleted: 4 files
//!     web images: 2 retained
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for
//! testability and, where the binary needs one, a `print_*` wrapper that
//! writes to stdout. Format functions are pure: no I/O, no side effects.

use crate::index::ImageIndex;
use crate::setup::ReconfigurationReport;
use crate::worker::{GenerationEvent, GenerationStats};
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Human-readable payload size.
fn format_bytes(bytes: usize) -> String {
    match bytes {
        0..1024 => format!("{} B", bytes),
        1024..1_048_576 => format!("{:.1} KiB", bytes as f64 / 1024.0),
        _ => format!("{:.1} MiB", bytes as f64 / 1_048_576.0),
    }
}

/// Whole milliseconds, or microseconds below one millisecond.
fn format_duration(d: Duration) -> String {
    if d.as_millis() == 0 {
        format!("{}µs", d.as_micros())
    } else {
        format!("{}ms", d.as_millis())
    }
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{} {}", n, word)
    } else {
        format!("{} {}s", n, word)
    }
}

// ============================================================================
// Ingestion
// ============================================================================

pub fn format_ingest_output(ingested: usize, assets_dir: &Path) -> Vec<String> {
    vec![
        "Pre-existing images".to_string(),
        format!("{}{} ingested from {}/", indent(1), ingested, assets_dir.display()),
    ]
}

pub fn print_ingest_output(ingested: usize, assets_dir: &Path) {
    for line in format_ingest_output(ingested, assets_dir) {
        println!("{}", line);
    }
}

// ============================================================================
// Generation
// ============================================================================

/// Format a single generation event as it arrives from the worker.
pub fn format_generation_event(event: &GenerationEvent) -> Vec<String> {
    match event {
        GenerationEvent::Started { planned, variant } => {
            vec![format!("Generating {} {} {}", planned, variant, if *planned == 1 { "image" } else { "images" })]
        }
        GenerationEvent::ImageStored {
            position,
            product_id,
            image_id,
            bytes,
            elapsed,
        } => vec![format!(
            "{}{} product {} → image {} ({}, {})",
            indent(1),
            format_index(*position),
            product_id,
            image_id,
            format_bytes(*bytes),
            format_duration(*elapsed)
        )],
        GenerationEvent::ImageRejected {
            position,
            product_id,
            image_id,
        } => vec![format!(
            "{}{} product {} → refused by storage rule (image {})",
            indent(1),
            format_index(*position),
            product_id,
            image_id
        )],
        GenerationEvent::ImageFailed {
            position,
            product_id,
            error,
        } => vec![format!(
            "{}{} product {} → failed: {}",
            indent(1),
            format_index(*position),
            product_id,
            error
        )],
        GenerationEvent::Finished { stats, stopped } => {
            let mut lines = vec![format_generation_stats(stats)];
            if *stopped {
                lines.push(format!("{}stopped before the last product", indent(1)));
            }
            lines
        }
    }
}

/// One-line summary of a generation run.
pub fn format_generation_stats(stats: &GenerationStats) -> String {
    let mut line = format!("Generated {}", stats.generated);
    if stats.rejected > 0 {
        line.push_str(&format!(", refused {}", stats.rejected));
    }
    if stats.failed > 0 {
        line.push_str(&format!(", failed {}", stats.failed));
    }
    if stats.generated > 0 {
        line.push_str(&format!(" (avg {})", format_duration(stats.average())));
    }
    line
}

// ============================================================================
// Reconfiguration and final state
// ============================================================================

pub fn format_reconfiguration_report(report: Option<&ReconfigurationReport>) -> Vec<String> {
    let Some(report) = report else {
        return vec![
            "Reconfiguration".to_string(),
            format!("{}skipped: product list unavailable", indent(1)),
        ];
    };
    vec![
        "Reconfiguration".to_string(),
        format!("{}kept: {}", indent(1), plural(report.kept, "product image")),
        format!("{}new: {} queued", indent(1), plural(report.new, "product")),
        format!("{}deleted: {}", indent(1), plural(report.deleted, "file")),
        format!("{}web images: {} retained", indent(1), report.web_retained),
    ]
}

pub fn print_reconfiguration_report(report: Option<&ReconfigurationReport>) {
    for line in format_reconfiguration_report(report) {
        println!("{}", line);
    }
}

/// Mapping and file counts after a run.
pub fn format_index_summary(index: &ImageIndex, stored_files: usize, working_dir: &Path) -> Vec<String> {
    vec![
        format!(
            "Index: {}, {}",
            plural(index.product_mapping_count(), "product image"),
            plural(index.web_mapping_count(), "web image")
        ),
        format!(
            "Stored: {} in {}/",
            plural(stored_files, "file"),
            working_dir.display()
        ),
    ]
}

pub fn print_index_summary(index: &ImageIndex, stored_files: usize, working_dir: &Path) {
    for line in format_index_summary(index, stored_files, working_dir) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================
