//! Service configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. A user config file
//! is sparse: its values are merged over the stock defaults, so it only needs
//! the keys it wants to change.
//!
//! ## Config File Location
//!
//! `config.toml` lives in the config directory given by `--config` (the
//! current directory by default). Relative paths inside it are resolved
//! against the process working directory.
//!
//! ## Configuration Options
//!
//! ```toml
//! # Every key is optional; these are the defaults
//!
//! working_dir = "images"    # Where id-named image files are written
//! # assets_dir = "assets"   # Pre-shipped <label>.png web images (optional)
//!
//! [storage]
//! mode = "drive"            # drive | drive-limited
//! rule = "all"              # all | full-size
//!
//! [cache]
//! mode = "lfu"              # none | fifo | lifo | random | lfu | lru | mru
//! rule = "all"
//! size = 1000               # Maximum resident images
//!
//! [generation]
//! variant = "full"          # icon | preview | full
//! shapes_per_image = 15
//! seed = 5
//!
//! [reconfiguration]
//! stop_timeout_secs = 60    # Give up waiting for the worker after this
//! ```
//!
//! Unknown keys are an error.

use crate::cache::{CacheMode, DEFAULT_MAX_ENTRIES};
use crate::rules::{CacheRule, StorageRule};
use crate::storage::StorageMode;
use crate::types::SizeVariant;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("Invalid {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Service configuration loaded from `config.toml`.
///
/// All fields have defaults. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Directory holding one file per stored image.
    pub working_dir: String,
    /// Directory of pre-shipped `<label>.png` web images.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets_dir: Option<String>,
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub generation: GenerationConfig,
    pub reconfiguration: ReconfigurationConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            working_dir: "images".to_string(),
            assets_dir: None,
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            generation: GenerationConfig::default(),
            reconfiguration: ReconfigurationConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.working_dir.trim().is_empty() {
            return Err(ConfigError::Validation("working_dir must not be empty".into()));
        }
        if self.cache.size == 0 {
            return Err(ConfigError::Validation("cache.size must be at least 1".into()));
        }
        if !(1..=200).contains(&self.generation.shapes_per_image) {
            return Err(ConfigError::Validation(
                "generation.shapes_per_image must be 1-200".into(),
            ));
        }
        if self.reconfiguration.stop_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "reconfiguration.stop_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Durable storage settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub mode: StorageMode,
    pub rule: StorageRule,
}

/// In-memory cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub mode: CacheMode,
    pub rule: CacheRule,
    /// Maximum number of resident images.
    pub size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::default(),
            rule: CacheRule::default(),
            size: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// Background generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    pub variant: SizeVariant,
    pub shapes_per_image: u32,
    pub seed: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            variant: SizeVariant::Full,
            shapes_per_image: 15,
            seed: 5,
        }
    }
}

/// Live reconfiguration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconfigurationConfig {
    /// How long to wait for the running worker to stop.
    pub stop_timeout_secs: u64,
}

impl Default for ReconfigurationConfig {
    fn default() -> Self {
        Self { stop_timeout_secs: 60 }
    }
}

impl ReconfigurationConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

// =============================================================================
// Loading and merging
// =============================================================================

/// `ServiceConfig::default()` as a TOML table, the layer every user file is
/// merged onto.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(ServiceConfig::default()).expect("default config must serialize")
}

/// Deep-merge `overlay` onto `base`. Nested tables merge per key, any other
/// overlay value wins outright, and keys only `base` has are kept.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Parse `<dir>/config.toml` without interpreting it. A missing file is
/// `Ok(None)`; a malformed one is an error.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = path.join("config.toml");
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Apply the user layer (if any) to `base` and produce a checked config.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<ServiceConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ServiceConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// The effective configuration for the config directory `root`.
pub fn load_config(root: &Path) -> Result<ServiceConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(root)?;
    resolve_config(base, overlay)
}

/// Documented stock `config.toml`, printed by `gen-config`.
pub fn stock_config_toml() -> &'static str {
    r##"# Storefront Images Configuration
# ===============================
# Every key is optional and shows its default value.
# Delete what you don't change. Misspelled keys are rejected.

# Directory holding generated images, one file per image id.
working_dir = "images"

# Directory of pre-shipped <label>.png web images (logos, icons).
# Each one is ingested at startup and survives reconfiguration.
# assets_dir = "assets"

# ---------------------------------------------------------------------------
# Durable storage
# ---------------------------------------------------------------------------
[storage]
# "drive" keeps every stored image.
# "drive-limited" keeps at most (images to generate + pre-existing images),
# dropping the earliest stored file first.
mode = "drive"

# Which images reach the disk: "all", or "full-size" for the largest
# variant only.
rule = "all"

# ---------------------------------------------------------------------------
# In-memory cache
# ---------------------------------------------------------------------------
[cache]
# Eviction policy: none, fifo, lifo, random, lfu, lru, mru.
# "none" reads straight from storage.
mode = "lfu"

# Which images may become resident.
rule = "all"

# Maximum number of resident images.
size = 1000

# ---------------------------------------------------------------------------
# Background generation
# ---------------------------------------------------------------------------
[generation]
# Size generated for each product: icon (64px), preview (125px), full (500px).
variant = "full"

# Shapes drawn per synthetic image (1-200).
shapes_per_image = 15

# Seed for the generator. Equal seeds reproduce equal images.
seed = 5

# ---------------------------------------------------------------------------
# Reconfiguration
# ---------------------------------------------------------------------------
[reconfiguration]
# Seconds to wait for a running generation to stop before giving up.
stop_timeout_secs = 60
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = ServiceConfig::default();
        assert_eq!(config.working_dir, "images");
        assert_eq!(config.assets_dir, None);
        assert_eq!(config.storage.mode, StorageMode::Drive);
        assert_eq!(config.storage.rule, StorageRule::All);
        assert_eq!(config.cache.mode, CacheMode::Lfu);
        assert_eq!(config.cache.size, 1000);
        assert_eq!(config.generation.variant, SizeVariant::Full);
        assert_eq!(config.generation.shapes_per_image, 15);
        assert_eq!(config.generation.seed, 5);
        assert_eq!(config.reconfiguration.stop_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
[cache]
mode = "lru"
"#;
        let config: ServiceConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.cache.mode, CacheMode::Lru);
        // Defaults preserved
        assert_eq!(config.cache.size, 1000);
        assert_eq!(config.storage.mode, StorageMode::Drive);
    }

    #[test]
    fn parse_kebab_case_enums() {
        let toml = r#"
[storage]
mode = "drive-limited"
rule = "full-size"

[generation]
variant = "preview"
"#;
        let config: ServiceConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.storage.mode, StorageMode::DriveLimited);
        assert_eq!(config.storage.rule, StorageRule::FullSize);
        assert_eq!(config.generation.variant, SizeVariant::Preview);
    }

    // =========================================================================
    // load_config tests
    // =========================================================================

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("config.toml"),
            r#"
working_dir = "/var/lib/storefront/images"
assets_dir = "web"

[cache]
mode = "none"
"#,
        )
        .unwrap();

        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.working_dir, "/var/lib/storefront/images");
        assert_eq!(config.assets_dir.as_deref(), Some("web"));
        assert_eq!(config.cache.mode, CacheMode::None);
        assert_eq!(config.cache.size, 1000);
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("config.toml"), "this is not [valid toml").unwrap();

        let result = load_config(tmp.path());
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn load_config_validates_values() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("config.toml"), "[cache]\nsize = 0\n").unwrap();

        let result = load_config(tmp.path());
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn unknown_policy_string_rejected() {
        let toml = r#"
[cache]
mode = "arc"
"#;
        let result: Result<ServiceConfig, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    // =========================================================================
    // merge_toml tests
    // =========================================================================

    #[test]
    fn merge_toml_scalar_override() {
        let base: toml::Value = toml::from_str("a = 1\nb = 2").unwrap();
        let overlay: toml::Value = toml::from_str("b = 3").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["a"].as_integer(), Some(1));
        assert_eq!(merged["b"].as_integer(), Some(3));
    }

    #[test]
    fn merge_toml_table_merge() {
        let base: toml::Value = toml::from_str("[cache]\nmode = \"lfu\"\nsize = 1000").unwrap();
        let overlay: toml::Value = toml::from_str("[cache]\nsize = 10").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["cache"]["mode"].as_str(), Some("lfu"));
        assert_eq!(merged["cache"]["size"].as_integer(), Some(10));
    }

    #[test]
    fn merge_toml_adds_missing_keys() {
        let base = stock_defaults_value();
        let overlay: toml::Value = toml::from_str("assets_dir = \"assets\"").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["assets_dir"].as_str(), Some("assets"));
        assert_eq!(merged["working_dir"].as_str(), Some("images"));
    }

    // =========================================================================
    // Unknown keys and validation
    // =========================================================================

    #[test]
    fn unknown_key_rejected() {
        let result: Result<ServiceConfig, _> = toml::from_str("workdir = \"x\"");
        assert!(result.is_err());
    }

    #[test]
    fn unknown_nested_key_rejected() {
        let result: Result<ServiceConfig, _> = toml::from_str("[cache]\ncapacity = 5");
        assert!(result.is_err());
    }

    #[test]
    fn unknown_key_rejected_via_load_config() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("config.toml"), "[storage]\nceiling = 5\n").unwrap();
        assert!(matches!(load_config(tmp.path()), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn validate_default_config_passes() {
        assert!(ServiceConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = ServiceConfig::default();
        config.generation.shapes_per_image = 0;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.working_dir = "  ".into();
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.reconfiguration.stop_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    // =========================================================================
    // Stock config
    // =========================================================================

    #[test]
    fn stock_config_toml_is_valid_toml() {
        let _: toml::Value = toml::from_str(stock_config_toml()).unwrap();
    }

    #[test]
    fn stock_config_toml_roundtrips_to_defaults() {
        let config: ServiceConfig = toml::from_str(stock_config_toml()).unwrap();
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn stock_defaults_value_has_all_sections() {
        let value = stock_defaults_value();
        for section in ["storage", "cache", "generation", "reconfiguration"] {
            assert!(value.get(section).is_some(), "missing section {section}");
        }
        assert!(value.get("assets_dir").is_none());
    }
}
