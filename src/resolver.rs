//! Resolution orchestrator.
//!
//! Every incoming record is classified against the profile index:
//!
//! - **Verified**: its uri (canonical or alias) belongs to an entity with a
//!   compatible identity hash, or some entity carries the same hash. The
//!   entity is updated and, when the incoming uri differs, renamed to it.
//! - **Similar**: no verified owner, but the deduplicator finds a mergeable
//!   candidate. The first candidate is updated and renamed to the incoming
//!   uri, keeping its old uri as an alias.
//! - **New**: a fresh entity is created under the incoming uri.
//!
//! The resolver decides, the index and snapshot store mutate. Renames move
//! the index entry first and the snapshot tree second.

use chrono::{DateTime, Duration, Utc};

use crate::config::{ResolverConfig, StoreConfig};
use crate::dedup::{Deduplicator, MergeCandidate};
use crate::error::{ConflictError, WealthError, WealthResult};
use crate::index::{Index, Summary};
use crate::model::{ProfileFields, ProfileRecord, ProfileSnapshot};
use crate::queue::PriorityQueue;
use crate::snapshot::{EntityMeta, SnapshotStore};
use crate::uri::{canonical_uri, normalize_date};

/// Which entity a record belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// The uri or one of its aliases names a compatible entity.
    Verified {
        /// Canonical uri of that entity.
        uri: String,
    },
    /// Unknown uri, but lookalike entities exist.
    Similar {
        /// Lookalikes in index order, each with its merge verdict.
        candidates: Vec<MergeCandidate>,
    },
    /// No matching entity.
    New,
}

/// Mutation applied for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionOutcome {
    /// A new entity was added.
    Created,
    /// An existing entity was updated in place.
    Updated,
    /// The record was folded into a lookalike entity.
    Merged,
}

/// Result of [`Resolver::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Kind of mutation.
    pub outcome: ResolutionOutcome,
    /// Canonical uri after resolution.
    pub uri: String,
    /// Set when the entity was renamed.
    pub previous_uri: Option<String>,
    /// Date of the snapshot written, if any.
    pub snapshot_date: Option<String>,
    /// Whether a follow-up item was queued.
    pub enqueued: bool,
}

/// Classifies records and applies the resulting mutation.
pub struct Resolver<'a> {
    profiles: &'a mut Index<ProfileFields>,
    snapshots: &'a SnapshotStore<ProfileSnapshot>,
    queue: &'a mut PriorityQueue,
    dedup: Deduplicator,
    policy: ResolverConfig,
    stale_priority: i64,
    follow_up: bool,
}

impl<'a> Resolver<'a> {
    /// Resolver over the given components, configured by `config`.
    pub fn new(
        profiles: &'a mut Index<ProfileFields>,
        snapshots: &'a SnapshotStore<ProfileSnapshot>,
        queue: &'a mut PriorityQueue,
        config: &StoreConfig,
    ) -> Self {
        Self {
            profiles,
            snapshots,
            queue,
            dedup: Deduplicator::from(config.dedup),
            policy: config.resolver.clone(),
            stale_priority: config.stale_priority(),
            follow_up: true,
        }
    }

    /// Enables or disables follow-up enqueueing.
    #[must_use]
    pub fn with_follow_up(mut self, follow_up: bool) -> Self {
        self.follow_up = follow_up;
        self
    }

    /// The profile index.
    #[must_use]
    pub fn profiles(&self) -> &Index<ProfileFields> {
        &*self.profiles
    }

    /// Decides which entity `record` belongs to without changing anything.
    pub fn classify(&self, record: &ProfileRecord) -> WealthResult<Classification> {
        let uri = canonical_uri(&record.uri)?;

        let compatible = |summary: &Summary<ProfileFields>| match (&summary.fields.id, &record.id) {
            (Some(known), Some(incoming)) => known == incoming,
            _ => true,
        };
        if let Some(owner) = self.profiles.find(&uri).into_iter().find(|s| compatible(*s)) {
            return Ok(Classification::Verified {
                uri: owner.uri.clone(),
            });
        }
        if let Some(id) = &record.id {
            if let Some(owner) = self.profiles.iter().find(|s| s.fields.id.as_ref() == Some(id)) {
                return Ok(Classification::Verified {
                    uri: owner.uri.clone(),
                });
            }
        }

        let candidates = self.dedup.find_matching(&*self.profiles, record);
        if candidates.is_empty() {
            Ok(Classification::New)
        } else {
            Ok(Classification::Similar { candidates })
        }
    }

    /// Resolves a record without overwriting existing snapshots.
    pub fn resolve(&mut self, record: &ProfileRecord) -> WealthResult<Resolution> {
        self.resolve_at(record, false, Utc::now())
    }

    /// Resolves a record, replacing an existing snapshot of the same date
    /// when `force` is set.
    pub fn resolve_with(&mut self, record: &ProfileRecord, force: bool) -> WealthResult<Resolution> {
        self.resolve_at(record, force, Utc::now())
    }

    /// Resolves a record as of `now`.
    pub fn resolve_at(
        &mut self,
        record: &ProfileRecord,
        force: bool,
        now: DateTime<Utc>,
    ) -> WealthResult<Resolution> {
        let incoming = canonical_uri(&record.uri)?;
        let date = record.date.as_deref().map(normalize_date).transpose()?;
        let classification = self.classify(record)?;
        let mut patch = record.summary_patch(now);

        let (outcome, uri, previous_uri, stale) = match classification {
            Classification::Verified { uri: current } => {
                self.check_rename(&current, &incoming)?;
                let stale = self.is_stale(&current, now)?;
                self.keep_identity(&current, &mut patch.fields);
                self.profiles.update(&current, patch, false)?;
                let previous = self.rename_if_needed(&current, &incoming)?;
                tracing::info!(uri = %incoming, previous = ?previous, stale, "verified record updated");
                (ResolutionOutcome::Updated, incoming, previous, stale)
            }
            Classification::Similar { candidates } => {
                let target = candidates
                    .first()
                    .map(|c| c.target.clone())
                    .ok_or_else(|| WealthError::internal("similar classification without candidates"))?;
                self.check_rename(&target, &incoming)?;
                self.keep_identity(&target, &mut patch.fields);
                self.profiles.update(&target, patch, false)?;
                let previous = self.rename_if_needed(&target, &incoming)?;
                tracing::info!(
                    uri = %incoming,
                    target = %target,
                    candidates = candidates.len(),
                    "record merged into similar entity"
                );
                (ResolutionOutcome::Merged, incoming, previous, false)
            }
            Classification::New => {
                self.profiles.add(&incoming, patch)?;
                tracing::info!(uri = %incoming, "new entity created");
                (ResolutionOutcome::Created, incoming, None, false)
            }
        };

        let snapshot_date = self.record_history(&uri, record, date, force, now)?;

        let priority = match outcome {
            ResolutionOutcome::Created => Some(self.policy.new_priority),
            ResolutionOutcome::Merged => Some(self.policy.merge_priority),
            ResolutionOutcome::Updated if stale => Some(self.stale_priority),
            ResolutionOutcome::Updated => None,
        };
        let enqueued = match priority {
            Some(prio) if self.follow_up => self.enqueue(&uri, prio)?,
            _ => false,
        };

        Ok(Resolution {
            outcome,
            uri,
            previous_uri,
            snapshot_date,
            enqueued,
        })
    }

    /// Identity hashes are assigned once; later records never replace them.
    fn keep_identity(&self, uri: &str, fields: &mut ProfileFields) {
        if self.profiles.get(uri).is_some_and(|s| s.fields.id.is_some()) {
            fields.id = None;
        }
    }

    fn is_stale(&self, uri: &str, now: DateTime<Utc>) -> WealthResult<bool> {
        let Some(summary) = self.profiles.get(uri) else {
            return Ok(true);
        };
        let meta = self.snapshots.history(summary)?.read_meta()?;
        let threshold = Duration::hours(i64::from(self.policy.stale_after_hours));
        Ok(meta.map_or(true, |m| now - m.last_modified >= threshold))
    }

    /// Fails with `ConflictError::UriTaken` when `to` answers to an entity
    /// other than `from`. Runs before any write so a refused rename leaves
    /// the index untouched.
    fn check_rename(&self, from: &str, to: &str) -> WealthResult<()> {
        if from == to {
            return Ok(());
        }
        match self.profiles.find(to).into_iter().find(|s| s.uri != from) {
            Some(owner) => Err(ConflictError::UriTaken {
                from: from.to_string(),
                to: to.to_string(),
                owner: owner.uri.clone(),
            }
            .into()),
            None => Ok(()),
        }
    }

    /// Moves the entity at `from` to `to`, leaving `from` as an alias.
    fn rename_if_needed(&mut self, from: &str, to: &str) -> WealthResult<Option<String>> {
        if from == to {
            return Ok(None);
        }
        if !self.profiles.move_to(from, to, true)? {
            return Err(WealthError::internal(format!("entity '{from}' vanished before rename")));
        }
        if let Err(e) = self.snapshots.rename_entity(from, to) {
            tracing::error!(from = %from, to = %to, error = %e, "snapshot tree move failed, reverting index");
            if let Err(revert) = self.profiles.move_to(to, from, false) {
                tracing::error!(from = %to, to = %from, error = %revert, "index revert failed");
            }
            return Err(e.into());
        }
        tracing::info!(from = %from, to = %to, "entity renamed");
        Ok(Some(from.to_string()))
    }

    /// Writes the dated snapshot, meta and history row for `uri`.
    ///
    /// A duplicate snapshot date without `force` is logged and skipped.
    fn record_history(
        &self,
        uri: &str,
        record: &ProfileRecord,
        date: Option<String>,
        force: bool,
        now: DateTime<Utc>,
    ) -> WealthResult<Option<String>> {
        let summary = self
            .profiles
            .get(uri)
            .ok_or_else(|| WealthError::internal(format!("entity '{uri}' missing after resolution")))?;
        let mut history = self.snapshots.history(summary)?;

        let mut written = None;
        if let Some(date) = date {
            match history.save_snapshot(&record.to_snapshot(uri, &date, now), force) {
                Ok(()) => {
                    if let Some(row) = record.history_row(&date) {
                        history.append_history(&row)?;
                    }
                    written = Some(date);
                }
                Err(WealthError::Conflict(ConflictError::DuplicateSnapshot { uri, date })) => {
                    tracing::warn!(uri = %uri, date = %date, "snapshot exists, not overwritten");
                }
                Err(e) => return Err(e),
            }
        }

        let meta = match history.read_meta()? {
            Some(mut meta) => {
                meta.touch(now);
                if meta.identity.is_none() {
                    meta.identity = summary.fields.id.clone();
                }
                meta
            }
            None => EntityMeta::new(now, summary.fields.id.clone()),
        };
        history.write_meta(&meta)?;
        Ok(written)
    }

    fn enqueue(&mut self, uri: &str, prio: i64) -> WealthResult<bool> {
        match self.queue.add(&self.policy.lane, uri, Some(prio), None) {
            Ok(()) => Ok(true),
            Err(WealthError::Conflict(ConflictError::QueueFull { lane, max_size })) => {
                tracing::warn!(uri = %uri, lane = %lane, max_size, "follow-up not queued, lane full");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
