//! Dated snapshot store.
//!
//! Each entity owns a directory `<kind>/<uri>/` holding one immutable
//! snapshot file per calendar day (`YYYY-MM-DD.json` or `.csv`), a
//! `meta.json` and an append-only `history.csv`. Because the keys are
//! zero-padded ISO dates, lexicographic order is chronological order.
//!
//! Writes to the snapshot, meta and history files are independent; a crash
//! between them leaves the entity partially updated. There is no write-ahead
//! log tying them together.

use std::marker::PhantomData;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConflictError, StorageError, ValidationError, WealthResult};
use crate::index::Summary;
use crate::model::{HistoryRow, SCHEMA_VERSION};
use crate::storage::{FlatStore, Table};
use crate::uri::{normalize_date, normalize_uri, IdentityHash};

const META_FILE: &str = "meta.json";
const HISTORY_FILE: &str = "history.csv";

/// A record that can be stored as a dated snapshot.
pub trait SnapshotRecord: Clone + Serialize + DeserializeOwned + Sized {
    /// Entity kind directory the snapshots live under.
    const KIND: &'static str;

    /// Whether [`SnapshotRecord::to_table`] is implemented.
    const TABULAR: bool = false;

    /// Date the record describes, in any form [`normalize_date`] accepts.
    fn date(&self) -> &str;

    /// Replaces the date with its normalized `YYYY-MM-DD` key before writing.
    fn set_date(&mut self, date: String);

    /// Delimited-text form, for kinds stored as `.csv`.
    fn to_table(&self) -> Option<Table> {
        None
    }

    /// Inverse of [`SnapshotRecord::to_table`] for the file of `date`.
    fn from_table(_date: &str, _table: Table) -> Option<Self> {
        None
    }
}

/// On-disk encoding of snapshot files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    /// One JSON document per date.
    Json,
    /// Delimited text, for tabular records only.
    Csv,
}

impl SnapshotFormat {
    /// File extension without the dot.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

/// Outcome of a snapshot lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotLookup<S> {
    /// A snapshot exists for exactly the requested date.
    Exact(S),
    /// No exact match; this is the floor-date snapshot instead.
    Nearest {
        /// Date that was asked for.
        requested: String,
        /// Snapshot of the floor date.
        snapshot: S,
    },
    /// Nothing usable.
    Missing,
}

impl<S> SnapshotLookup<S> {
    /// Whether a snapshot was returned.
    #[must_use]
    pub fn is_found(&self) -> bool {
        !matches!(self, Self::Missing)
    }

    /// The snapshot, exact or nearest.
    #[must_use]
    pub fn into_snapshot(self) -> Option<S> {
        match self {
            Self::Exact(s) | Self::Nearest { snapshot: s, .. } => Some(s),
            Self::Missing => None,
        }
    }
}

/// Per-entity metadata stored in `meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMeta {
    /// Layout version.
    pub schema_version: u32,
    /// Last write to the entity.
    pub last_modified: DateTime<Utc>,
    /// First write to the entity.
    pub first_seen: DateTime<Utc>,
    /// Identity hash at the last write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityHash>,
}

impl EntityMeta {
    /// Fresh metadata stamped with `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>, identity: Option<IdentityHash>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            last_modified: now,
            first_seen: now,
            identity,
        }
    }

    /// Marks the entity as modified at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_modified = now;
        self.schema_version = SCHEMA_VERSION;
    }
}

/// Snapshot trees of one entity kind.
#[derive(Debug)]
pub struct SnapshotStore<S> {
    flat: FlatStore,
    format: SnapshotFormat,
    _record: PhantomData<fn() -> S>,
}

impl<S: SnapshotRecord> SnapshotStore<S> {
    /// Creates the store, rejecting formats the record type cannot encode.
    pub fn new(flat: FlatStore, format: SnapshotFormat) -> Result<Self, ValidationError> {
        if format == SnapshotFormat::Csv && !S::TABULAR {
            return Err(ValidationError::UnsupportedFormat {
                kind: S::KIND.to_string(),
                format: format.extension().to_string(),
            });
        }
        Ok(Self {
            flat,
            format,
            _record: PhantomData,
        })
    }

    /// Encoding used for new snapshots.
    #[must_use]
    pub const fn format(&self) -> SnapshotFormat {
        self.format
    }

    fn dir(uri: &str) -> PathBuf {
        PathBuf::from(S::KIND).join(uri)
    }

    fn file(&self, uri: &str, date: &str) -> PathBuf {
        Self::dir(uri).join(format!("{date}.{}", self.format.extension()))
    }

    /// Opens the history of an indexed entity, scanning its directory.
    pub fn history<F>(&self, summary: &Summary<F>) -> Result<EntityHistory<'_, S>, StorageError> {
        let mut history = EntityHistory {
            store: self,
            uri: summary.uri.clone(),
            dates: Vec::new(),
        };
        history.refresh()?;
        Ok(history)
    }

    /// Deletes an entity's whole snapshot tree.
    pub fn remove_entity(&self, uri: &str) -> Result<bool, StorageError> {
        let uri = normalize_uri(uri);
        if uri.is_empty() {
            return Ok(false);
        }
        let removed = self.flat.remove_dir(Self::dir(&uri))?;
        if removed {
            tracing::info!(kind = S::KIND, uri = %uri, "snapshot tree purged");
        }
        Ok(removed)
    }

    /// Moves an entity's snapshot tree to a new uri.
    pub fn rename_entity(&self, from: &str, to: &str) -> Result<bool, StorageError> {
        let (from, to) = (normalize_uri(from), normalize_uri(to));
        if from == to || from.is_empty() || to.is_empty() {
            return Ok(false);
        }
        let moved = self.flat.rename_dir(Self::dir(&from), Self::dir(&to))?;
        if moved {
            tracing::info!(kind = S::KIND, from = %from, to = %to, "snapshot tree moved");
        }
        Ok(moved)
    }

    fn read(&self, uri: &str, date: &str) -> Result<Option<S>, StorageError> {
        let rel = self.file(uri, date);
        match self.format {
            SnapshotFormat::Json => self.flat.read_json(rel),
            SnapshotFormat::Csv => {
                let Some(table) = self.flat.read_table(&rel)? else {
                    return Ok(None);
                };
                S::from_table(date, table).map(Some).ok_or_else(|| {
                    StorageError::serialization(self.flat.path(&rel), "unrecognized snapshot columns")
                })
            }
        }
    }

    fn write(&self, uri: &str, date: &str, snapshot: &S) -> Result<(), StorageError> {
        let rel = self.file(uri, date);
        match self.format {
            SnapshotFormat::Json => self.flat.write_json(rel, snapshot),
            SnapshotFormat::Csv => {
                let table = snapshot.to_table().ok_or_else(|| {
                    StorageError::serialization(self.flat.path(&rel), "record has no tabular form")
                })?;
                self.flat.write_table(rel, &table)
            }
        }
    }
}

/// Time series accessor for one entity.
///
/// The list of known dates is cached and refreshed after every write made
/// through this accessor.
#[derive(Debug)]
pub struct EntityHistory<'a, S> {
    store: &'a SnapshotStore<S>,
    uri: String,
    dates: Vec<String>,
}

impl<S: SnapshotRecord> EntityHistory<'_, S> {
    /// Canonical uri of the entity.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Rescans the entity directory.
    pub fn refresh(&mut self) -> Result<(), StorageError> {
        let dir = SnapshotStore::<S>::dir(&self.uri);
        let ext = self.store.format.extension();
        let mut dates = Vec::new();
        for stem in self.store.flat.list_files(&dir, ext)? {
            match normalize_date(&stem) {
                Ok(date) if date == stem => dates.push(stem),
                _ => tracing::debug!(uri = %self.uri, file = %stem, "skipping non-snapshot file"),
            }
        }
        self.dates = dates;
        Ok(())
    }

    /// Known dates, ascending.
    #[must_use]
    pub fn dates(&self) -> &[String] {
        &self.dates
    }

    /// Whether a snapshot exists for exactly `date`.
    #[must_use]
    pub fn has_date(&self, date: &str) -> bool {
        self.dates.binary_search_by(|d| d.as_str().cmp(date)).is_ok()
    }

    /// Earliest snapshot date.
    #[must_use]
    pub fn first_date(&self) -> Option<&str> {
        self.dates.first().map(String::as_str)
    }

    /// Latest snapshot date.
    #[must_use]
    pub fn latest_date(&self) -> Option<&str> {
        self.dates.last().map(String::as_str)
    }

    /// Floor search: the latest known date `<= target`.
    ///
    /// Folds over the ascending dates starting from the earliest, so when
    /// every known date is after `target` the earliest date is returned
    /// rather than `None`. `None` only means there is no history at all.
    #[must_use]
    pub fn nearest_date(&self, target: &str) -> Option<&str> {
        let (first, rest) = self.dates.split_first()?;
        let best = rest
            .iter()
            .fold(first, |best, date| if date.as_str() <= target { date } else { best });
        Some(best.as_str())
    }

    /// Dates within `[from, to]`, both already in `YYYY-MM-DD` form.
    #[must_use]
    pub fn dates_in_range(&self, from: &str, to: &str) -> Vec<&str> {
        self.dates
            .iter()
            .map(String::as_str)
            .filter(|d| *d >= from && *d <= to)
            .collect()
    }

    /// Loads the snapshot for a date.
    ///
    /// Without `exact_match`, a missing date falls back to
    /// [`EntityHistory::nearest_date`].
    pub fn get_snapshot(&self, date_like: &str, exact_match: bool) -> WealthResult<SnapshotLookup<S>> {
        let date = normalize_date(date_like)?;
        if self.has_date(&date) {
            if let Some(snapshot) = self.store.read(&self.uri, &date)? {
                return Ok(SnapshotLookup::Exact(snapshot));
            }
        }
        if exact_match {
            return Ok(SnapshotLookup::Missing);
        }
        let Some(nearest) = self.nearest_date(&date).map(str::to_string) else {
            return Ok(SnapshotLookup::Missing);
        };
        Ok(match self.store.read(&self.uri, &nearest)? {
            Some(snapshot) => SnapshotLookup::Nearest {
                requested: date,
                snapshot,
            },
            None => SnapshotLookup::Missing,
        })
    }

    /// Writes a snapshot for its own date.
    ///
    /// The stored record carries the normalized date, matching its file
    /// name. Fails with `ConflictError::DuplicateSnapshot`, leaving the
    /// existing file untouched, when the date already exists and `force`
    /// is false.
    pub fn save_snapshot(&mut self, snapshot: &S, force: bool) -> WealthResult<()> {
        let date = normalize_date(snapshot.date())?;
        if self.has_date(&date) && !force {
            return Err(ConflictError::DuplicateSnapshot {
                uri: self.uri.clone(),
                date,
            }
            .into());
        }
        if snapshot.date() == date {
            self.store.write(&self.uri, &date, snapshot)?;
        } else {
            let mut normalized = snapshot.clone();
            normalized.set_date(date.clone());
            self.store.write(&self.uri, &date, &normalized)?;
        }
        self.refresh()?;
        tracing::debug!(kind = S::KIND, uri = %self.uri, date = %date, force, "snapshot saved");
        Ok(())
    }

    fn meta_file(&self) -> PathBuf {
        SnapshotStore::<S>::dir(&self.uri).join(META_FILE)
    }

    /// Reads `meta.json`. A missing or malformed file reads as `None`.
    pub fn read_meta(&self) -> Result<Option<EntityMeta>, StorageError> {
        match self.store.flat.read_json(self.meta_file()) {
            Err(StorageError::Serialization { path, message }) => {
                tracing::warn!(uri = %self.uri, path = %path.display(), error = %message, "malformed entity meta");
                Ok(None)
            }
            other => other,
        }
    }

    /// Writes `meta.json`.
    pub fn write_meta(&self, meta: &EntityMeta) -> Result<(), StorageError> {
        self.store.flat.write_json(self.meta_file(), meta)
    }

    /// Appends one row to `history.csv`.
    pub fn append_history(&self, row: &HistoryRow) -> Result<(), StorageError> {
        let rel = SnapshotStore::<S>::dir(&self.uri).join(HISTORY_FILE);
        self.store.flat.append_rows(rel, &HistoryRow::HEADER, &[row.to_row()])
    }

    /// All history rows in file order.
    pub fn history(&self) -> Result<Vec<HistoryRow>, StorageError> {
        let rel = SnapshotStore::<S>::dir(&self.uri).join(HISTORY_FILE);
        Ok(self
            .store
            .flat
            .read_table(rel)?
            .map(|t| t.rows.iter().filter_map(|r| HistoryRow::from_row(r)).collect::<Vec<_>>())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ListEntry, ListSnapshot};
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        date: String,
        body: String,
    }

    impl SnapshotRecord for Note {
        const KIND: &'static str = "note";

        fn date(&self) -> &str {
            &self.date
        }

        fn set_date(&mut self, date: String) {
            self.date = date;
        }
    }

    fn note(date: &str, body: &str) -> Note {
        Note {
            date: date.into(),
            body: body.into(),
        }
    }

    fn summary(uri: &str) -> Summary<()> {
        Summary {
            uri: uri.into(),
            name: None,
            aliases: Vec::new(),
            text: String::new(),
            fields: (),
        }
    }

    fn seeded(dir: &std::path::Path) -> SnapshotStore<Note> {
        let store = SnapshotStore::new(FlatStore::new(dir), SnapshotFormat::Json).unwrap();
        let mut history = store.history(&summary("jane-doe")).unwrap();
        for date in ["2021-01-01", "2020-01-01", "2020-06-01"] {
            history.save_snapshot(&note(date, date), false).unwrap();
        }
        store
    }

    #[test]
    fn test_dates_are_sorted_and_bounded() {
        let dir = tempdir().unwrap();
        let store = seeded(dir.path());
        let history = store.history(&summary("jane-doe")).unwrap();

        assert_eq!(history.dates(), ["2020-01-01", "2020-06-01", "2021-01-01"]);
        assert_eq!(history.first_date(), Some("2020-01-01"));
        assert_eq!(history.latest_date(), Some("2021-01-01"));
        assert!(history.has_date("2020-06-01"));
        assert!(!history.has_date("2020-06-02"));
    }

    #[test]
    fn test_nearest_date_floor_fold() {
        let dir = tempdir().unwrap();
        let store = seeded(dir.path());
        let history = store.history(&summary("jane-doe")).unwrap();

        assert_eq!(history.nearest_date("2020-12-31"), Some("2020-06-01"));
        assert_eq!(history.nearest_date("2020-06-01"), Some("2020-06-01"));
        assert_eq!(history.nearest_date("2030-01-01"), Some("2021-01-01"));
        // Predates all history: earliest date, not None.
        assert_eq!(history.nearest_date("2019-01-01"), Some("2020-01-01"));

        let empty = store.history(&summary("nobody")).unwrap();
        assert_eq!(empty.nearest_date("2020-01-01"), None);
    }

    #[test]
    fn test_dates_in_range_inclusive() {
        let dir = tempdir().unwrap();
        let store = seeded(dir.path());
        let history = store.history(&summary("jane-doe")).unwrap();

        assert_eq!(history.dates_in_range("2020-01-01", "2020-06-01"), ["2020-01-01", "2020-06-01"]);
        assert!(history.dates_in_range("2022-01-01", "2023-01-01").is_empty());
    }

    #[test]
    fn test_get_snapshot_exact_nearest_missing() {
        let dir = tempdir().unwrap();
        let store = seeded(dir.path());
        let history = store.history(&summary("jane-doe")).unwrap();

        let exact = history.get_snapshot("2020-06-01T12:00:00Z", true).unwrap();
        assert_eq!(exact, SnapshotLookup::Exact(note("2020-06-01", "2020-06-01")));

        assert_eq!(history.get_snapshot("2020-12-31", true).unwrap(), SnapshotLookup::Missing);

        match history.get_snapshot("2020-12-31", false).unwrap() {
            SnapshotLookup::Nearest { requested, snapshot } => {
                assert_eq!(requested, "2020-12-31");
                assert_eq!(snapshot.date, "2020-06-01");
            }
            other => panic!("expected nearest, got {other:?}"),
        }

        let empty = store.history(&summary("nobody")).unwrap();
        assert!(!empty.get_snapshot("2020-12-31", false).unwrap().is_found());
        assert!(history.get_snapshot("not a date", false).is_err());
    }

    #[test]
    fn test_duplicate_snapshot_requires_force() {
        let dir = tempdir().unwrap();
        let store = seeded(dir.path());
        let mut history = store.history(&summary("jane-doe")).unwrap();

        let err = history.save_snapshot(&note("2020-01-01", "changed"), false).unwrap_err();
        assert!(err.is_conflict());
        let kept = history.get_snapshot("2020-01-01", true).unwrap().into_snapshot().unwrap();
        assert_eq!(kept.body, "2020-01-01");

        history.save_snapshot(&note("2020-01-01", "changed"), true).unwrap();
        let replaced = history.get_snapshot("2020-01-01", true).unwrap().into_snapshot().unwrap();
        assert_eq!(replaced.body, "changed");
    }

    #[test]
    fn test_saved_snapshot_carries_normalized_date() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(FlatStore::new(dir.path()), SnapshotFormat::Json).unwrap();
        let mut history = store.history(&summary("jane-doe")).unwrap();

        history.save_snapshot(&note("20240301", "compact"), false).unwrap();
        assert_eq!(history.dates(), ["2024-03-01"]);

        let raw: serde_json::Value = FlatStore::new(dir.path())
            .read_json("note/jane-doe/2024-03-01.json")
            .unwrap()
            .unwrap();
        assert_eq!(raw["date"], "2024-03-01");
        let read = history.get_snapshot("2024-03-01", true).unwrap().into_snapshot().unwrap();
        assert_eq!(read, note("2024-03-01", "compact"));
    }

    #[test]
    fn test_meta_and_history_files_are_not_dates() {
        let dir = tempdir().unwrap();
        let store = seeded(dir.path());
        let history = store.history(&summary("jane-doe")).unwrap();

        let now = Utc::now();
        history.write_meta(&EntityMeta::new(now, None)).unwrap();
        history
            .append_history(&HistoryRow {
                date: "2020-01-01".into(),
                rank: Some(4),
                net_worth: Some(1200.5),
            })
            .unwrap();

        let reopened = store.history(&summary("jane-doe")).unwrap();
        assert_eq!(reopened.dates().len(), 3);
        assert_eq!(reopened.read_meta().unwrap().unwrap().last_modified, now);
        assert_eq!(reopened.history().unwrap()[0].rank, Some(4));
    }

    #[test]
    fn test_rename_and_remove_entity() {
        let dir = tempdir().unwrap();
        let store = seeded(dir.path());

        assert!(store.rename_entity("jane-doe", "jane-doe-family").unwrap());
        assert!(store.history(&summary("jane-doe")).unwrap().dates().is_empty());
        assert_eq!(store.history(&summary("jane-doe-family")).unwrap().dates().len(), 3);

        assert!(store.remove_entity("jane-doe-family").unwrap());
        assert!(store.history(&summary("jane-doe-family")).unwrap().dates().is_empty());
    }

    #[test]
    fn test_csv_requires_tabular_record() {
        let dir = tempdir().unwrap();
        let err = SnapshotStore::<Note>::new(FlatStore::new(dir.path()), SnapshotFormat::Csv).unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_csv_list_snapshots() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::<ListSnapshot>::new(FlatStore::new(dir.path()), SnapshotFormat::Csv).unwrap();
        let mut history = store.history(&summary("billionaires")).unwrap();

        let list = ListSnapshot {
            date: "2024-04-02".into(),
            entries: vec![ListEntry {
                rank: 1,
                uri: "bernard-arnault".into(),
                name: "Bernard Arnault".into(),
                net_worth: Some(233_000.0),
            }],
        };
        history.save_snapshot(&list, false).unwrap();
        assert!(dir.path().join("list/billionaires/2024-04-02.csv").exists());

        let read = history.get_snapshot("2024-04-02", true).unwrap().into_snapshot().unwrap();
        assert_eq!(read, list);
    }
}
