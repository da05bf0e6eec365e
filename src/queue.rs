//! Persisted priority queue.
//!
//! Pending work is grouped into independent lanes. Each lane holds at most
//! one item per uri and at most `max_size` items. The whole queue is one
//! JSON document, `{ "<lane>": [{uri, ts, prio?, args?}, ...] }`, rewritten
//! after every mutation with each lane sorted by descending priority, so
//! the file can be consumed top-down.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConflictError, StorageError, ValidationError, WealthResult};
use crate::storage::FlatStore;
use crate::uri::{canonical_uri, normalize_uri};

/// One pending work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Normalized uri.
    pub uri: String,
    /// When the item was added.
    pub ts: DateTime<Utc>,
    /// Priority; `None` means the queue default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prio: Option<i64>,
    /// Free-form job arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
}

type Lanes = BTreeMap<String, Vec<QueueItem>>;

/// Bounded, deduplicated backlog of uris per lane.
#[derive(Debug)]
pub struct PriorityQueue {
    flat: FlatStore,
    file: PathBuf,
    max_size: usize,
    default_priority: i64,
    lanes: Lanes,
}

impl PriorityQueue {
    /// Opens the queue stored at `path`, loading any persisted items.
    ///
    /// An unreadable or malformed queue file starts an empty queue.
    pub fn open(path: impl AsRef<Path>, max_size: usize, default_priority: i64) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        let file = path.file_name().map_or_else(|| PathBuf::from("queue.json"), PathBuf::from);

        let flat = FlatStore::new(parent);
        let lanes = match flat.read_json::<Lanes>(&file) {
            Ok(lanes) => lanes.unwrap_or_default(),
            Err(StorageError::Serialization { path, message }) => {
                tracing::warn!(path = %path.display(), error = %message, "malformed queue file, starting empty");
                Lanes::new()
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(
            path = %path.display(),
            lanes = lanes.len(),
            items = lanes.values().map(Vec::len).sum::<usize>(),
            "queue loaded"
        );
        Ok(Self {
            flat,
            file,
            max_size,
            default_priority,
            lanes,
        })
    }

    /// Maximum items per lane.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }

    /// Priority of items added without one.
    #[must_use]
    pub const fn default_priority(&self) -> i64 {
        self.default_priority
    }

    /// Effective priority of an item.
    #[must_use]
    pub fn priority_of(&self, item: &QueueItem) -> i64 {
        item.prio.unwrap_or(self.default_priority)
    }

    fn lane_key(lane: &str) -> Result<String, ValidationError> {
        let lane = lane.trim();
        if lane.is_empty() {
            return Err(ValidationError::MissingField {
                field: "lane".to_string(),
            });
        }
        Ok(lane.to_string())
    }

    /// Sorts every lane and rewrites the file; restores `before` on failure.
    fn persist(&mut self, before: Lanes) -> Result<(), StorageError> {
        let default = self.default_priority;
        for items in self.lanes.values_mut() {
            items.sort_by_key(|item| Reverse(item.prio.unwrap_or(default)));
        }
        self.lanes.retain(|_, items| !items.is_empty());

        if let Err(e) = self.flat.write_json(&self.file, &self.lanes) {
            self.lanes = before;
            return Err(e);
        }
        Ok(())
    }

    /// Adds `uri` to `lane`, or refreshes its timestamp, priority and args
    /// if it is already pending there.
    ///
    /// A new uri is rejected with `ConflictError::QueueFull` once the lane
    /// holds `max_size` items.
    pub fn add(
        &mut self,
        lane: &str,
        uri: &str,
        prio: Option<i64>,
        args: Option<serde_json::Value>,
    ) -> WealthResult<()> {
        let lane = Self::lane_key(lane)?;
        let uri = canonical_uri(uri)?;
        let pending = self.lanes.get(&lane);
        let present = pending.is_some_and(|items| items.iter().any(|i| i.uri == uri));
        if !present && pending.map_or(0, Vec::len) >= self.max_size {
            tracing::warn!(lane = %lane, uri = %uri, max_size = self.max_size, "queue lane full");
            return Err(ConflictError::QueueFull {
                lane,
                max_size: self.max_size,
            }
            .into());
        }

        let before = self.lanes.clone();
        let item = QueueItem {
            uri,
            ts: Utc::now(),
            prio,
            args,
        };
        let items = self.lanes.entry(lane).or_default();
        match items.iter_mut().find(|i| i.uri == item.uri) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }

        self.persist(before)?;
        Ok(())
    }

    /// Removes and returns up to `n` items from the head of `lane`.
    pub fn next(&mut self, lane: &str, n: usize) -> Result<Vec<QueueItem>, StorageError> {
        let before = self.lanes.clone();
        let Some(items) = self.lanes.get_mut(lane.trim()) else {
            return Ok(Vec::new());
        };
        let taken: Vec<QueueItem> = items.drain(..n.min(items.len())).collect();
        if taken.is_empty() {
            return Ok(taken);
        }
        self.persist(before)?;
        tracing::debug!(lane = %lane, taken = taken.len(), "queue drained");
        Ok(taken)
    }

    /// Head of `lane` without removing it.
    #[must_use]
    pub fn peek(&self, lane: &str) -> Option<&QueueItem> {
        self.lanes.get(lane.trim()).and_then(|items| items.first())
    }

    /// Empties one lane. Returns the number of items dropped.
    pub fn clear(&mut self, lane: &str) -> Result<usize, StorageError> {
        let before = self.lanes.clone();
        let Some(items) = self.lanes.remove(lane.trim()) else {
            return Ok(0);
        };
        self.persist(before)?;
        Ok(items.len())
    }

    /// Pending items in `lane`.
    #[must_use]
    pub fn len(&self, lane: &str) -> usize {
        self.lanes.get(lane.trim()).map_or(0, Vec::len)
    }

    /// Whether every lane is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.values().all(Vec::is_empty)
    }

    /// Names of lanes with pending items.
    pub fn lanes(&self) -> impl Iterator<Item = &str> {
        self.lanes.keys().map(String::as_str)
    }

    /// Whether `uri` is pending in `lane`.
    #[must_use]
    pub fn contains(&self, lane: &str, uri: &str) -> bool {
        let uri = normalize_uri(uri);
        self.lanes
            .get(lane.trim())
            .is_some_and(|items| items.iter().any(|i| i.uri == uri))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn open(dir: &Path, max_size: usize) -> PriorityQueue {
        PriorityQueue::open(dir.join("queue.json"), max_size, 0).unwrap()
    }

    #[test]
    fn test_next_returns_descending_priority() {
        let dir = tempdir().unwrap();
        let mut queue = open(dir.path(), 10);
        queue.add("profile", "low", Some(1), None).unwrap();
        queue.add("profile", "default", None, None).unwrap();
        queue.add("profile", "high", Some(100), None).unwrap();
        queue.add("profile", "also-high", Some(100), None).unwrap();

        let uris: Vec<_> = queue.next("profile", 3).unwrap().into_iter().map(|i| i.uri).collect();
        assert_eq!(uris, vec!["high", "also-high", "low"]);
        assert_eq!(queue.len("profile"), 1);
        assert_eq!(queue.peek("profile").unwrap().uri, "default");
    }

    #[test]
    fn test_readd_overwrites_instead_of_duplicating() {
        let dir = tempdir().unwrap();
        let mut queue = open(dir.path(), 10);
        queue.add("profile", "Jane Doe", Some(1), None).unwrap();
        queue.add("profile", "jane-doe", Some(7), Some(json!({"force": true}))).unwrap();

        assert_eq!(queue.len("profile"), 1);
        let head = queue.peek("profile").unwrap();
        assert_eq!(head.prio, Some(7));
        assert_eq!(head.args, Some(json!({"force": true})));
        assert!(queue.contains("profile", "JANE DOE"));
    }

    #[test]
    fn test_lanes_are_independent() {
        let dir = tempdir().unwrap();
        let mut queue = open(dir.path(), 1);
        queue.add("profile", "jane-doe", None, None).unwrap();
        queue.add("list", "jane-doe", None, None).unwrap();

        assert_eq!(queue.lanes().collect::<Vec<_>>(), vec!["list", "profile"]);
        assert_eq!(queue.clear("list").unwrap(), 1);
        assert_eq!(queue.len("list"), 0);
        assert_eq!(queue.len("profile"), 1);
    }

    #[test]
    fn test_full_lane_rejects_new_uri_but_accepts_update() {
        let dir = tempdir().unwrap();
        let mut queue = open(dir.path(), 2);
        queue.add("profile", "a-one", None, None).unwrap();
        queue.add("profile", "b-two", None, None).unwrap();

        let err = queue.add("profile", "c-three", None, None).unwrap_err();
        assert!(err.is_conflict());
        assert!(!queue.contains("profile", "c-three"));

        queue.add("profile", "a-one", Some(5), None).unwrap();
        assert_eq!(queue.len("profile"), 2);
    }

    #[test]
    fn test_persists_sorted_and_reloads() {
        let dir = tempdir().unwrap();
        {
            let mut queue = open(dir.path(), 10);
            queue.add("profile", "later", Some(1), None).unwrap();
            queue.add("profile", "sooner", Some(9), None).unwrap();
        }

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("queue.json")).unwrap()).unwrap();
        assert_eq!(raw["profile"][0]["uri"], "sooner");
        assert!(raw["profile"][1].get("args").is_none());

        let mut queue = open(dir.path(), 10);
        assert_eq!(queue.next("profile", 1).unwrap()[0].uri, "sooner");
    }

    #[test]
    fn test_malformed_file_starts_empty() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("queue.json"), b"{\"profile\": 3").unwrap();
        let queue = open(dir.path(), 10);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_rejects_empty_lane_and_uri() {
        let dir = tempdir().unwrap();
        let mut queue = open(dir.path(), 10);
        assert!(queue.add(" ", "jane-doe", None, None).unwrap_err().is_validation());
        assert!(queue.add("profile", "--", None, None).unwrap_err().is_validation());
        assert!(queue.next("missing", 5).unwrap().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_lane_never_exceeds_max(max in 1usize..6, uris in prop::collection::vec("[a-z]{1,3}", 0..20)) {
            let dir = tempdir().unwrap();
            let mut queue = open(dir.path(), max);
            for uri in &uris {
                let _ = queue.add("profile", uri, None, None);
                prop_assert!(queue.len("profile") <= max);
            }
        }
    }
}
