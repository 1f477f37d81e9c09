//! Run configuration.
//!
//! Configuration is resolved once at startup into an immutable [`SiteConfig`]
//! and passed explicitly to everything that needs it. Three layers are merged,
//! later ones winning:
//!
//! 1. Stock defaults ([`SiteConfig::default`])
//! 2. Environment variables (see below)
//! 3. `config.toml` in the config directory
//!
//! The environment is read through a lookup function handed to
//! [`load_config`], so nothing else in the crate touches it.
//!
//! ## Environment Variables
//!
//! | Variable           | Config key      |
//! |--------------------|-----------------|
//! | `TEMPLATES_FOLDER` | `templates_dir` |
//! | `BUCKET_NAME`      | `bucket.name`   |
//! | `S3_REGION`        | `bucket.region` |
//! | `LOCAL_VIDEO_PATH` | `staging_dir`   |
//!
//! ## Configuration Options
//!
//! ```toml
//! templates_dir = "templates"   # video.html and index.html
//! staging_dir = "staging"       # local copies of videos for probing
//! index_document = "index.html"
//! pages_prefix = "pages"
//!
//! [bucket]
//! name = "my-videos"            # required
//! region = "eu-west-1"          # required
//! # endpoint_url = "http://localhost:9000"
//! # public_base_url = "https://videos.example.com"
//!
//! [storage]
//! timeout_secs = 30
//! transfer_timeout_secs = 600
//! max_retries = 3
//! retry_base_delay_ms = 100
//! retry_max_delay_ms = 5000
//!
//! [probe]
//! ffprobe = "ffprobe"
//! timeout_secs = 60
//!
//! [processing]
//! # max_workers = 4
//! ```
//!
//! Relative paths are resolved against the working directory. Unknown keys
//! are rejected to catch typos early.

use crate::retry::RetryPolicy;
use crate::storage::S3StoreConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Hard cap on concurrent workers, whatever the machine size.
pub const MAX_WORKERS: usize = 8;

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Complete run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Directory holding `video.html` and `index.html`.
    pub templates_dir: PathBuf,
    /// Directory videos are downloaded into before probing.
    pub staging_dir: PathBuf,
    /// Key of the index page, also the website's entry document.
    pub index_document: String,
    /// Key prefix video pages are published under.
    pub pages_prefix: String,
    pub bucket: BucketConfig,
    pub storage: StorageConfig,
    pub probe: ProbeConfig,
    pub processing: ProcessingConfig,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            templates_dir: PathBuf::from("templates"),
            staging_dir: PathBuf::from("staging"),
            index_document: "index.html".to_string(),
            pages_prefix: "pages".to_string(),
            bucket: BucketConfig::default(),
            storage: StorageConfig::default(),
            probe: ProbeConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

/// The bucket the site is built from and published to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BucketConfig {
    pub name: String,
    pub region: String,
    /// Endpoint of an S3-compatible store; unset for AWS.
    pub endpoint_url: Option<String>,
    /// Base URL videos are served from instead of the S3 virtual-hosted URL.
    pub public_base_url: Option<String>,
}

/// Storage call timeouts and retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Bound on each list/head/put/ACL request.
    pub timeout_secs: u64,
    /// Bound on downloading one video or copying it in place.
    pub transfer_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            transfer_timeout_secs: 600,
            max_retries: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    /// `ffprobe` executable: a name looked up on `PATH`, or a path.
    pub ffprobe: String,
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ffprobe: "ffprobe".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of assets processed at once.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count (or [`MAX_WORKERS`]) are clamped down.
    pub max_workers: Option<usize>,
}

/// Resolve the effective worker count.
///
/// - `None` → `min(cores, MAX_WORKERS)`
/// - `Some(n)` → `min(n, cores, MAX_WORKERS)` (user can constrain down, not up)
pub fn effective_workers(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_workers
        .map(|n| n.min(cores))
        .unwrap_or(cores)
        .min(MAX_WORKERS)
}

impl SiteConfig {
    /// Validate required settings and value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.name.trim().is_empty() {
            return Err(ConfigError::Missing("bucket.name"));
        }
        if self.bucket.region.trim().is_empty() {
            return Err(ConfigError::Missing("bucket.region"));
        }
        if self.index_document.is_empty() || self.index_document.contains('/') {
            return Err(ConfigError::Validation(
                "index_document must be a plain file name".into(),
            ));
        }
        if self.storage.timeout_secs == 0 || self.storage.transfer_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "storage timeouts must be non-zero".into(),
            ));
        }
        if self.storage.retry_base_delay_ms > self.storage.retry_max_delay_ms {
            return Err(ConfigError::Validation(
                "storage.retry_base_delay_ms must not exceed retry_max_delay_ms".into(),
            ));
        }
        if self.probe.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "probe.timeout_secs must be non-zero".into(),
            ));
        }
        if self.probe.ffprobe.trim().is_empty() {
            return Err(ConfigError::Validation("probe.ffprobe must not be empty".into()));
        }
        if self.processing.max_workers == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_workers must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.storage.max_retries,
            base_delay: Duration::from_millis(self.storage.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.storage.retry_max_delay_ms),
        }
    }

    pub fn store_config(&self) -> S3StoreConfig {
        S3StoreConfig {
            bucket: self.bucket.name.clone(),
            region: self.bucket.region.clone(),
            endpoint_url: self.bucket.endpoint_url.clone(),
            request_timeout: Duration::from_secs(self.storage.timeout_secs),
            transfer_timeout: Duration::from_secs(self.storage.transfer_timeout_secs),
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe.timeout_secs)
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(SiteConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
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

/// Environment variables and the config key each one sets.
const ENV_KEYS: &[(&str, &str)] = &[
    ("TEMPLATES_FOLDER", "templates_dir"),
    ("BUCKET_NAME", "bucket.name"),
    ("S3_REGION", "bucket.region"),
    ("LOCAL_VIDEO_PATH", "staging_dir"),
];

/// Build a sparse config table from environment variables.
///
/// Unset and blank variables are ignored.
pub fn env_overlay(lookup: impl Fn(&str) -> Option<String>) -> toml::Value {
    let mut root = toml::Table::new();
    for (var, key) in ENV_KEYS {
        let Some(value) = lookup(var).filter(|v| !v.trim().is_empty()) else {
            continue;
        };
        match key.split_once('.') {
            Some((section, leaf)) => {
                let entry = root
                    .entry(section)
                    .or_insert_with(|| toml::Value::Table(toml::Table::new()));
                if let toml::Value::Table(table) = entry {
                    table.insert(leaf.to_string(), toml::Value::String(value));
                }
            }
            None => {
                root.insert(key.to_string(), toml::Value::String(value));
            }
        }
    }
    toml::Value::Table(root)
}

/// Load a `config.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if no `config.toml` exists in the directory.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = path.join(CONFIG_FILE);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<SiteConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: SiteConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the run configuration.
///
/// Layers stock defaults, the environment as seen through `env`, and
/// `config.toml` in `dir`, then validates the result.
pub fn load_config(
    dir: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<SiteConfig, ConfigError> {
    let base = merge_toml(stock_defaults_value()?, env_overlay(env));
    let overlay = load_raw_config(dir)?;
    resolve_config(base, overlay)
}

// =============================================================================
// First-run prompting
// =============================================================================

/// Answers collected by [`prompt_config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitAnswers {
    pub templates_dir: String,
    pub bucket_name: String,
    pub bucket_region: String,
    pub staging_dir: String,
}

impl InitAnswers {
    /// Sparse `config.toml` holding just the answered keys.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let mut bucket = toml::Table::new();
        bucket.insert("name".into(), self.bucket_name.clone().into());
        bucket.insert("region".into(), self.bucket_region.clone().into());

        let mut root = toml::Table::new();
        root.insert("templates_dir".into(), self.templates_dir.clone().into());
        root.insert("staging_dir".into(), self.staging_dir.clone().into());
        root.insert("bucket".into(), toml::Value::Table(bucket));
        Ok(toml::to_string(&root)?)
    }
}

fn ask(
    input: &mut impl BufRead,
    output: &mut impl Write,
    question: &str,
    default: &str,
) -> Result<String, ConfigError> {
    if default.is_empty() {
        write!(output, "{question}: ")?;
    } else {
        write!(output, "{question} [{default}]: ")?;
    }
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    let answer = line.trim();
    Ok(if answer.is_empty() {
        default.to_string()
    } else {
        answer.to_string()
    })
}

/// Ask for the four settings a first run needs.
///
/// `defaults` supplies the bracketed suggestions (usually the config as
/// resolved from defaults and the environment). An empty answer keeps the
/// suggestion; bucket name and region must end up non-empty.
pub fn prompt_config(
    input: &mut impl BufRead,
    output: &mut impl Write,
    defaults: &SiteConfig,
) -> Result<InitAnswers, ConfigError> {
    let answers = InitAnswers {
        templates_dir: ask(
            input,
            output,
            "Templates folder",
            &defaults.templates_dir.to_string_lossy(),
        )?,
        bucket_name: ask(input, output, "Bucket name", &defaults.bucket.name)?,
        bucket_region: ask(input, output, "Bucket region", &defaults.bucket.region)?,
        staging_dir: ask(
            input,
            output,
            "Local video staging folder",
            &defaults.staging_dir.to_string_lossy(),
        )?,
    };

    if answers.bucket_name.is_empty() {
        return Err(ConfigError::Missing("bucket.name"));
    }
    if answers.bucket_region.is_empty() {
        return Err(ConfigError::Missing("bucket.region"));
    }
    Ok(answers)
}

/// Write `config.toml` into `dir`, creating the directory.
pub fn write_config_file(dir: &Path, contents: &str) -> Result<PathBuf, ConfigError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(CONFIG_FILE);
    fs::write(&path, contents)?;
    Ok(path)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# vidsite Configuration
# =====================
# Values shown below are the defaults. Only [bucket] name and region must be
# set, here or through BUCKET_NAME / S3_REGION. Settings in this file win over
# environment variables. Unknown keys will cause an error.

# Directory holding video.html and index.html (env: TEMPLATES_FOLDER).
templates_dir = "templates"

# Where videos are downloaded for probing (env: LOCAL_VIDEO_PATH).
# A staged copy with the listed size is reused on the next run.
staging_dir = "staging"

# Key of the index page; also the website's entry document.
index_document = "index.html"

# Video pages are published as <pages_prefix>/<slug>.html.
pages_prefix = "pages"

# ---------------------------------------------------------------------------
# Bucket
# ---------------------------------------------------------------------------
[bucket]
# Bucket name (env: BUCKET_NAME). Required.
name = ""

# Bucket region (env: S3_REGION). Required.
region = ""

# Endpoint of an S3-compatible store. Enables path-style addressing.
# endpoint_url = "http://localhost:9000"

# Serve videos from this base URL instead of
# https://<bucket>.s3.<region>.amazonaws.com.
# public_base_url = "https://videos.example.com"

# ---------------------------------------------------------------------------
# Storage calls
# ---------------------------------------------------------------------------
[storage]
# Timeout for list, head, put and ACL requests.
timeout_secs = 30

# Timeout for downloading one video or copying it in place.
transfer_timeout_secs = 600

# Throttling and timeouts are retried with exponential backoff.
max_retries = 3
retry_base_delay_ms = 100
retry_max_delay_ms = 5000

# ---------------------------------------------------------------------------
# Probing
# ---------------------------------------------------------------------------
[probe]
# ffprobe executable, looked up on PATH unless a path is given.
ffprobe = "ffprobe"

# A probe running longer than this is killed and the video skipped.
timeout_secs = 60

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum videos processed at once. Omit to use the number of CPU cores.
# Never more than the core count, and never more than 8.
# max_workers = 4
"##
}
