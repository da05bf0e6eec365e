//! Domain records stored by wealthdex.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod list;
pub mod profile;

pub use list::{ListEntry, ListFields, ListSnapshot};
pub use profile::{
    Asset, HistoryRow, Media, Place, ProfileFields, ProfileInfo, ProfileRecord, ProfileSnapshot,
    Ranking, Relation,
};

/// Version of the on-disk snapshot layout.
pub const SCHEMA_VERSION: u32 = 1;

/// Metadata block embedded in every snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    /// Always [`SCHEMA_VERSION`] when written.
    pub schema_version: u32,
    /// When the snapshot was written.
    pub last_modified: DateTime<Utc>,
}
