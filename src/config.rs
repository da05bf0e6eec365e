//! Store configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration rooted at `./data`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, ValidationError, WealthResult};
use crate::snapshot::SnapshotFormat;

/// Queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of pending items per lane.
    pub max_size: usize,
    /// Priority used when an item carries none.
    pub default_priority: i64,
    /// Queue file, relative to the store root.
    pub file: PathBuf,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            default_priority: 0,
            file: PathBuf::from("queue.json"),
        }
    }
}

/// Follow-up enqueue policy of the resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Priority of follow-ups for newly created profiles.
    pub new_priority: i64,
    /// Priority of follow-ups after a rename.
    pub merge_priority: i64,
    /// Priority for stale verified updates; `None` uses the queue default.
    pub stale_priority: Option<i64>,
    /// Verified updates are re-enqueued once their entity is older than this.
    pub stale_after_hours: u32,
    /// Lane follow-ups are queued on.
    pub lane: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            new_priority: 100,
            merge_priority: 50,
            stale_priority: None,
            stale_after_hours: 24,
            lane: "profile".to_string(),
        }
    }
}

/// Similarity thresholds of the deduplicator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Minimum Dice score of the uri as given.
    pub forward_threshold: f64,
    /// Minimum Dice score of the token-reversed uri.
    pub reversed_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            forward_threshold: 0.90,
            reversed_threshold: 0.80,
        }
    }
}

/// Top-level configuration of a store root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding indexes, snapshots and the queue file.
    pub root: PathBuf,
    /// Encoding of profile snapshots.
    pub profile_format: SnapshotFormat,
    /// Encoding of list snapshots.
    pub list_format: SnapshotFormat,
    /// Queue file and bounds.
    pub queue: QueueConfig,
    /// Follow-up policy.
    pub resolver: ResolverConfig,
    /// Similarity thresholds.
    pub dedup: DedupConfig,
    /// Batch jobs log and count item errors instead of aborting.
    pub safe_mode: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            profile_format: SnapshotFormat::Json,
            list_format: SnapshotFormat::Csv,
            queue: QueueConfig::default(),
            resolver: ResolverConfig::default(),
            dedup: DedupConfig::default(),
            safe_mode: true,
        }
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidConfig {
        field: field.to_string(),
        reason: reason.into(),
    }
}

impl StoreConfig {
    /// Configuration with defaults rooted at `root`.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ValidationError> {
        let config: Self = toml::from_str(text).map_err(|e| invalid("toml", e.to_string()))?;
        config.validate()
    }

    /// Reads and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> WealthResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| StorageError::io(path, e))?;
        Ok(Self::from_toml_str(&text)?)
    }

    /// Checks bounds and thresholds, returning the config unchanged when valid.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.root.as_os_str().is_empty() {
            return Err(invalid("root", "must not be empty"));
        }
        if self.queue.max_size == 0 {
            return Err(invalid("queue.max_size", "must be at least 1"));
        }
        if self.queue.file.as_os_str().is_empty() {
            return Err(invalid("queue.file", "must not be empty"));
        }
        if self.resolver.lane.trim().is_empty() {
            return Err(invalid("resolver.lane", "must not be empty"));
        }
        for (field, value) in [
            ("dedup.forward_threshold", self.dedup.forward_threshold),
            ("dedup.reversed_threshold", self.dedup.reversed_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(invalid(field, format!("{value} is outside (0, 1]")));
            }
        }
        Ok(self)
    }

    /// Priority for re-enqueueing stale verified entities.
    #[must_use]
    pub fn stale_priority(&self) -> i64 {
        self.resolver
            .stale_priority
            .unwrap_or(self.queue.default_priority)
    }
}
