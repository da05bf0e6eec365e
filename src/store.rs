//! Aggregate entry point over one store root.
//!
//! A [`Store`] owns every component of a root: the exclusive lock, the
//! profile and list indexes, their snapshot stores and the work queue.
//! Components are plain fields handed out by reference, so tests can open
//! isolated stores against temporary directories.

use chrono::Utc;

use crate::config::StoreConfig;
use crate::error::{ConflictError, WealthError, WealthResult};
use crate::index::{Index, SummaryPatch};
use crate::model::{ListFields, ListSnapshot, ProfileFields, ProfileSnapshot};
use crate::queue::PriorityQueue;
use crate::resolver::Resolver;
use crate::snapshot::{SnapshotRecord, SnapshotStore};
use crate::storage::{FlatStore, StoreLock};
use crate::uri::canonical_uri;

/// Every component of an opened store root.
#[derive(Debug)]
pub struct Store {
    config: StoreConfig,
    profiles: Index<ProfileFields>,
    lists: Index<ListFields>,
    profile_snapshots: SnapshotStore<ProfileSnapshot>,
    list_snapshots: SnapshotStore<ListSnapshot>,
    queue: PriorityQueue,
    _lock: StoreLock,
}

impl Store {
    /// Validates `config`, creates the root and loads every component.
    ///
    /// Fails with `StorageError::Locked` if another process holds the root.
    pub fn open(config: StoreConfig) -> WealthResult<Self> {
        let config = config.validate()?;
        let flat = FlatStore::new(&config.root);
        flat.ensure_dir("")?;
        let lock = StoreLock::acquire(flat.root())?;

        let profiles = Index::open(flat.clone(), ProfileSnapshot::KIND)?;
        let lists = Index::open(flat.clone(), ListSnapshot::KIND)?;
        let profile_snapshots = SnapshotStore::new(flat.clone(), config.profile_format)?;
        let list_snapshots = SnapshotStore::new(flat.clone(), config.list_format)?;
        let queue = PriorityQueue::open(
            flat.path(&config.queue.file),
            config.queue.max_size,
            config.queue.default_priority,
        )?;

        tracing::info!(
            root = %flat.root().display(),
            profiles = profiles.len(),
            lists = lists.len(),
            "store opened"
        );
        Ok(Self {
            config,
            profiles,
            lists,
            profile_snapshots,
            list_snapshots,
            queue,
            _lock: lock,
        })
    }

    /// Validated configuration.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Profile index.
    #[must_use]
    pub const fn profiles(&self) -> &Index<ProfileFields> {
        &self.profiles
    }

    /// Profile index, mutable.
    pub fn profiles_mut(&mut self) -> &mut Index<ProfileFields> {
        &mut self.profiles
    }

    /// List index.
    #[must_use]
    pub const fn lists(&self) -> &Index<ListFields> {
        &self.lists
    }

    /// Profile snapshot trees.
    #[must_use]
    pub const fn profile_snapshots(&self) -> &SnapshotStore<ProfileSnapshot> {
        &self.profile_snapshots
    }

    /// List snapshot trees.
    #[must_use]
    pub const fn list_snapshots(&self) -> &SnapshotStore<ListSnapshot> {
        &self.list_snapshots
    }

    /// Work queue.
    #[must_use]
    pub const fn queue(&self) -> &PriorityQueue {
        &self.queue
    }

    /// Work queue, mutable.
    pub fn queue_mut(&mut self) -> &mut PriorityQueue {
        &mut self.queue
    }

    /// Resolver over this store's profile components.
    pub fn resolver(&mut self) -> Resolver<'_> {
        Resolver::new(&mut self.profiles, &self.profile_snapshots, &mut self.queue, &self.config)
    }

    /// Deletes a profile summary and purges its snapshot tree.
    ///
    /// Only canonical uris are accepted; returns false if there is no such
    /// profile.
    pub fn remove_profile(&mut self, uri: &str) -> WealthResult<bool> {
        let uri = canonical_uri(uri)?;
        if self.profiles.get(&uri).is_none() {
            return Ok(false);
        }
        self.profiles.delete(&uri)?;
        self.profile_snapshots.remove_entity(&uri)?;
        tracing::info!(uri = %uri, "profile removed");
        Ok(true)
    }

    /// Stores a dated ranking list and queues fetches for ranked people
    /// that are not indexed yet.
    ///
    /// Returns the number of newly queued profiles.
    pub fn record_list(
        &mut self,
        uri: &str,
        title: Option<&str>,
        snapshot: &ListSnapshot,
        force: bool,
    ) -> WealthResult<usize> {
        let fields = ListFields {
            title: title.map(str::to_string),
            entry_count: Some(snapshot.entries.len() as u64),
            last_modified: Some(Utc::now()),
        };
        let mut patch = SummaryPatch::new().fields(fields);
        patch.name = title.map(str::to_string);

        let summary = self
            .lists
            .update(uri, patch, true)?
            .ok_or_else(|| WealthError::internal(format!("list '{uri}' missing after update")))?;
        let mut history = self.list_snapshots.history(summary)?;
        match history.save_snapshot(snapshot, force) {
            Ok(()) => {}
            Err(WealthError::Conflict(ConflictError::DuplicateSnapshot { uri, date })) => {
                tracing::warn!(uri = %uri, date = %date, "list snapshot exists, not overwritten");
            }
            Err(e) => return Err(e),
        }

        let lane = self.config.resolver.lane.clone();
        let mut queued = 0;
        for entry in &snapshot.entries {
            if !self.profiles.find(&entry.uri).is_empty() || self.queue.contains(&lane, &entry.uri) {
                continue;
            }
            match self.queue.add(&lane, &entry.uri, None, None) {
                Ok(()) => queued += 1,
                Err(WealthError::Conflict(ConflictError::QueueFull { .. })) => {
                    tracing::warn!(list = %uri, lane = %lane, "queue full, remaining entries skipped");
                    break;
                }
                Err(e) if e.is_validation() => {
                    tracing::warn!(list = %uri, entry = %entry.uri, error = %e, "unusable list entry uri");
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!(list = %uri, date = %snapshot.date, entries = snapshot.entries.len(), queued, "list recorded");
        Ok(queued)
    }
}
