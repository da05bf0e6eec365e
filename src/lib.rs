//! # wealthdex - Entity Resolution for Wealth Rankings
//!
//! wealthdex ingests records about wealthy individuals, resolves each record
//! to a stable entity identity and keeps a dated history of every entity on
//! a plain directory tree.
//!
//! ## Core Concepts
//!
//! - **Index**: uri-keyed catalog of entity summaries with aliases and token search
//! - **Snapshot**: immutable, date-keyed full record of an entity
//! - **Deduplicator**: fuzzy uri matching plus attribute compatibility checks
//! - **Resolver**: decides whether a record is verified, similar or new, and applies it
//! - **PriorityQueue**: persisted, bounded backlog of uris per lane
//!
//! ## Usage
//!
//! ```rust,ignore
//! use wealthdex::{ProfileRecord, Store, StoreConfig};
//!
//! let mut store = Store::open(StoreConfig::with_root("data"))?;
//!
//! let record = ProfileRecord::new("jane-doe")
//!     .with_id("h1")
//!     .with_gender("f")
//!     .with_date("2024-04-01")
//!     .with_ranking(12, 5400.0);
//! let resolution = store.resolver().resolve(&record)?;
//!
//! let summary = store.profiles().get(&resolution.uri).unwrap();
//! let history = store.profile_snapshots().history(summary)?;
//! let snapshot = history.get_snapshot("2024-06-30", false)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Foundations
pub mod config;
pub mod error;
pub mod merge;
pub mod storage;
pub mod uri;

// Entity storage
pub mod index;
pub mod model;
pub mod snapshot;

// Resolution pipeline
pub mod dedup;
pub mod fetch;
pub mod jobs;
pub mod queue;
pub mod resolver;
pub mod store;

// Re-export primary types at crate root for convenience
pub use config::{DedupConfig, QueueConfig, ResolverConfig, StoreConfig};
pub use dedup::{dice_coefficient, mergeable, Deduplicator, IdentityAttributes, MergeCandidate};
pub use error::{ConflictError, StorageError, ValidationError, WealthError, WealthResult};
pub use fetch::{FetchResult, Fetcher, JsonRecordParser, RecordParser};
pub use index::{Index, Summary, SummaryFields, SummaryPatch};
pub use jobs::{IngestJob, JobReport};
pub use merge::Merge;
pub use model::{
    HistoryRow, ListEntry, ListFields, ListSnapshot, ProfileFields, ProfileInfo, ProfileRecord,
    ProfileSnapshot,
};
pub use queue::{PriorityQueue, QueueItem};
pub use resolver::{Classification, Resolution, ResolutionOutcome, Resolver};
pub use snapshot::{EntityHistory, EntityMeta, SnapshotFormat, SnapshotLookup, SnapshotRecord, SnapshotStore};
pub use store::Store;
pub use uri::{normalize_date, normalize_uri, IdentityHash};
