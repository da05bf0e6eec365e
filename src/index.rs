//! Secondary index: canonical uri -> entity summary.
//!
//! One index exists per entity kind and lives in `<kind>/index.json`. The
//! whole file is loaded into an ordered in-memory map on open and rewritten
//! after every successful mutation; there is no incremental persistence.
//!
//! # Invariants
//! - Keys are normalized uris and equal the stored summary's `uri`.
//! - An alias is owned by at most one summary, never equals another
//!   summary's canonical uri, and never equals its own summary's uri.
//! - `text` always holds the search tokens derived from the current state.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConflictError, StorageError, WealthError, WealthResult};
use crate::merge::Merge;
use crate::storage::FlatStore;
use crate::uri::{canonical_uri, normalize_uri, tokenize};

/// Kind-specific payload carried by every summary of an index.
pub trait SummaryFields: Clone + Default + Serialize + DeserializeOwned + Merge {
    /// Extra words that should make the entity findable through search.
    fn search_terms(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Lightweight entity summary stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary<F> {
    /// Canonical uri, also the index key.
    pub uri: String,

    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Former or alternative uris that resolve here.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,

    /// Precomputed search tokens, space separated.
    #[serde(default)]
    pub text: String,

    /// Kind-specific payload.
    #[serde(flatten)]
    pub fields: F,
}

impl<F: SummaryFields> Summary<F> {
    fn empty(uri: String) -> Self {
        Self {
            uri,
            name: None,
            aliases: Vec::new(),
            text: String::new(),
            fields: F::default(),
        }
    }

    fn refresh_text(&mut self) {
        let mut source = self.uri.clone();
        if let Some(name) = &self.name {
            source.push(' ');
            source.push_str(name);
        }
        for alias in &self.aliases {
            source.push(' ');
            source.push_str(alias);
        }
        for term in self.fields.search_terms() {
            source.push(' ');
            source.push_str(&term);
        }
        self.text = tokenize(&source).join(" ");
    }

    /// True if `uri` is this summary's canonical uri or one of its aliases.
    #[must_use]
    pub fn answers_to(&self, uri: &str) -> bool {
        self.uri == uri || self.aliases.iter().any(|a| a == uri)
    }

    fn tokens(&self) -> impl Iterator<Item = &str> {
        self.text.split(' ').filter(|t| !t.is_empty())
    }
}

/// Partial update applied with [`Index::update`].
#[derive(Debug, Clone, Default)]
pub struct SummaryPatch<F> {
    /// Replaces the name when set.
    pub name: Option<String>,
    /// Aliases to add.
    pub aliases: Vec<String>,
    /// Merged into the existing fields.
    pub fields: F,
}

impl<F: Default> SummaryPatch<F> {
    /// Empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: None,
            aliases: Vec::new(),
            fields: F::default(),
        }
    }

    /// Sets the name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds an alias.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Sets the fields payload.
    #[must_use]
    pub fn fields(mut self, fields: F) -> Self {
        self.fields = fields;
        self
    }
}

/// Generic uri-keyed catalog of summaries for one entity kind.
#[derive(Debug)]
pub struct Index<F: SummaryFields> {
    flat: FlatStore,
    kind: String,
    items: BTreeMap<String, Summary<F>>,
}

impl<F: SummaryFields> Index<F> {
    /// Opens the index of `kind`, loading it from disk.
    pub fn open(flat: FlatStore, kind: impl Into<String>) -> Result<Self, StorageError> {
        let mut index = Self {
            flat,
            kind: kind.into(),
            items: BTreeMap::new(),
        };
        index.load()?;
        Ok(index)
    }

    fn file(&self) -> PathBuf {
        PathBuf::from(&self.kind).join("index.json")
    }

    /// Entity kind, also the directory name.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Replaces the in-memory state with the on-disk index.
    ///
    /// A malformed file degrades to an empty index; I/O failures propagate.
    pub fn load(&mut self) -> Result<(), StorageError> {
        let loaded = match self.flat.read_json::<BTreeMap<String, Summary<F>>>(self.file()) {
            Ok(loaded) => loaded.unwrap_or_default(),
            Err(StorageError::Serialization { path, message }) => {
                tracing::warn!(
                    kind = %self.kind,
                    path = %path.display(),
                    error = %message,
                    "malformed index, starting empty"
                );
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };

        self.items = loaded
            .into_iter()
            .map(|(key, mut summary)| {
                summary.uri.clone_from(&key);
                if summary.text.is_empty() {
                    summary.refresh_text();
                }
                (key, summary)
            })
            .collect();
        tracing::debug!(kind = %self.kind, entries = self.items.len(), "index loaded");
        Ok(())
    }

    /// Rewrites the whole index file.
    pub fn save(&self) -> Result<(), StorageError> {
        self.flat.write_json(self.file(), &self.items)?;
        tracing::debug!(kind = %self.kind, entries = self.items.len(), "index saved");
        Ok(())
    }

    /// Number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the index holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Summaries in canonical uri order.
    pub fn iter(&self) -> impl Iterator<Item = &Summary<F>> {
        self.items.values()
    }

    /// Canonical uris in order.
    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    /// Looks up a summary by canonical uri only.
    #[must_use]
    pub fn get(&self, uri_like: &str) -> Option<&Summary<F>> {
        self.items.get(&normalize_uri(uri_like))
    }

    /// Every summary whose canonical uri or alias set contains the uri.
    #[must_use]
    pub fn find(&self, uri_like: &str) -> Vec<&Summary<F>> {
        let uri = normalize_uri(uri_like);
        if uri.is_empty() {
            return Vec::new();
        }
        self.items.values().filter(|s| s.answers_to(&uri)).collect()
    }

    /// Canonical uri of the summary that answers to `uri`, skipping `except`.
    fn owner_of(&self, uri: &str, except: Option<&str>) -> Option<&str> {
        self.items
            .values()
            .filter(|s| Some(s.uri.as_str()) != except)
            .find(|s| s.answers_to(uri))
            .map(|s| s.uri.as_str())
    }

    /// Deep-merges `patch` into the summary at `uri_like`.
    ///
    /// Returns `Ok(None)` when the summary does not exist and `allow_create`
    /// is false. Nothing is changed when an error is returned.
    pub fn update(
        &mut self,
        uri_like: &str,
        patch: SummaryPatch<F>,
        allow_create: bool,
    ) -> WealthResult<Option<&Summary<F>>> {
        let uri = canonical_uri(uri_like)?;
        let mut next = match self.items.get(&uri) {
            Some(existing) => existing.clone(),
            None if !allow_create => return Ok(None),
            None => {
                if let Some(owner) = self.owner_of(&uri, None) {
                    return Err(ConflictError::AliasTaken {
                        uri: owner.to_string(),
                        alias: uri,
                        owner: owner.to_string(),
                    }
                    .into());
                }
                Summary::empty(uri.clone())
            }
        };

        let mut aliases = Vec::new();
        for alias in patch.aliases {
            let alias = normalize_uri(&alias);
            if alias.is_empty() || alias == uri {
                continue;
            }
            if let Some(owner) = self.owner_of(&alias, Some(uri.as_str())) {
                return Err(ConflictError::AliasTaken {
                    uri,
                    alias,
                    owner: owner.to_string(),
                }
                .into());
            }
            aliases.push(alias);
        }

        next.name.merge(patch.name);
        next.aliases.merge(aliases);
        next.fields.merge(patch.fields);
        next.refresh_text();

        self.commit(&uri, None, next)?;
        Ok(self.items.get(&uri))
    }

    /// Creates a summary that must not exist yet under any uri or alias.
    pub fn add(&mut self, uri_like: &str, patch: SummaryPatch<F>) -> WealthResult<&Summary<F>> {
        let uri = canonical_uri(uri_like)?;
        if self.owner_of(&uri, None).is_some() {
            return Err(ConflictError::AlreadyExists { uri }.into());
        }
        self.update(&uri, patch, true)?
            .ok_or_else(|| WealthError::internal(format!("summary '{uri}' vanished after create")))
    }

    /// Removes a summary. Returns false if there was none.
    pub fn delete(&mut self, uri_like: &str) -> Result<bool, StorageError> {
        let uri = normalize_uri(uri_like);
        let Some(removed) = self.items.remove(&uri) else {
            return Ok(false);
        };
        if let Err(e) = self.save() {
            self.items.insert(uri, removed);
            return Err(e);
        }
        tracing::info!(kind = %self.kind, uri = %uri, "summary deleted");
        Ok(true)
    }

    /// Renames an entity from `from` to `to`.
    ///
    /// Fails with `ConflictError::UriTaken` if `to` already resolves to a
    /// different entity. With `make_alias`, `from` becomes an alias of the
    /// renamed summary. Returns false if `from` does not exist.
    pub fn move_to(&mut self, from: &str, to: &str, make_alias: bool) -> WealthResult<bool> {
        let from = normalize_uri(from);
        let to = canonical_uri(to)?;
        if !self.items.contains_key(&from) {
            return Ok(false);
        }
        if let Some(owner) = self.owner_of(&to, Some(from.as_str())) {
            return Err(ConflictError::UriTaken {
                from,
                to,
                owner: owner.to_string(),
            }
            .into());
        }
        if from == to {
            return Ok(true);
        }

        let Some(mut moved) = self.items.get(&from).cloned() else {
            return Ok(false);
        };
        moved.uri.clone_from(&to);
        moved.aliases.retain(|a| *a != to);
        if make_alias && !moved.aliases.contains(&from) {
            moved.aliases.push(from.clone());
        }
        moved.refresh_text();

        self.commit(&to, Some(&from), moved)?;
        tracing::info!(kind = %self.kind, from = %from, to = %to, alias = make_alias, "summary moved");
        Ok(true)
    }

    /// Inserts `next` under `uri` (removing `replaces` if given) and persists.
    /// The in-memory map is rolled back if the write fails.
    fn commit(
        &mut self,
        uri: &str,
        replaces: Option<&str>,
        next: Summary<F>,
    ) -> Result<(), StorageError> {
        let removed = replaces.and_then(|old| self.items.remove(old).map(|s| (old.to_string(), s)));
        let previous = self.items.insert(uri.to_string(), next);

        if let Err(e) = self.save() {
            match previous {
                Some(prev) => {
                    self.items.insert(uri.to_string(), prev);
                }
                None => {
                    self.items.remove(uri);
                }
            }
            if let Some((old, summary)) = removed {
                self.items.insert(old, summary);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Filters the index by search tokens.
    ///
    /// A query token matches an entity when it is a substring of one of
    /// the entity's tokens. Strict search needs every query token to match,
    /// loose search needs any. A query with no usable tokens matches every
    /// entity. Results keep index order.
    #[must_use]
    pub fn search(&self, query: &str, loose_match: bool) -> Vec<&Summary<F>> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return self.items.values().collect();
        }

        self.items
            .values()
            .filter(|summary| {
                let tokens: BTreeSet<&str> = summary.tokens().collect();
                let hit = |term: &String| tokens.iter().any(|t| t.contains(term.as_str()));
                if loose_match {
                    terms.iter().any(hit)
                } else {
                    terms.iter().all(hit)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct TestFields {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        industry: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tags: Vec<String>,
    }

    impl Merge for TestFields {
        fn merge(&mut self, incoming: Self) {
            self.industry.merge(incoming.industry);
            self.tags.merge(incoming.tags);
        }
    }

    impl SummaryFields for TestFields {
        fn search_terms(&self) -> Vec<String> {
            self.industry.iter().cloned().collect()
        }
    }

    fn open(dir: &std::path::Path) -> Index<TestFields> {
        Index::open(FlatStore::new(dir), "profile").unwrap()
    }

    fn patch(name: &str) -> SummaryPatch<TestFields> {
        SummaryPatch::new().name(name)
    }

    #[test]
    fn test_update_requires_allow_create() {
        let dir = tempdir().unwrap();
        let mut index = open(dir.path());

        assert!(index.update("Jane Doe", patch("Jane Doe"), false).unwrap().is_none());
        assert!(index.is_empty());

        let created = index.update("Jane Doe", patch("Jane Doe"), true).unwrap().unwrap();
        assert_eq!(created.uri, "jane-doe");
        assert!(index.get(" JANE DOE ").is_some());
    }

    #[test]
    fn test_get_finds_what_add_created_for_any_spelling() {
        let dir = tempdir().unwrap();
        let mut index = open(dir.path());

        let created = index.add("㎒ Holdings", patch("MHz Holdings")).unwrap();
        assert_eq!(created.uri, "mhz-holdings");
        assert!(index.get("㎒ Holdings").is_some());
        assert_eq!(index.find("ＭＨＺ-holdings").len(), 1);
    }

    #[test]
    fn test_update_deep_merges_and_dedups_arrays() {
        let dir = tempdir().unwrap();
        let mut index = open(dir.path());

        let first = TestFields {
            industry: Some("Fashion".into()),
            tags: vec!["a".into(), "b".into()],
        };
        index.add("jane-doe", patch("Jane Doe").fields(first)).unwrap();

        let second = TestFields {
            industry: None,
            tags: vec!["b".into(), "c".into()],
        };
        let merged = index
            .update("jane-doe", SummaryPatch::new().fields(second), false)
            .unwrap()
            .unwrap();
        assert_eq!(merged.name.as_deref(), Some("Jane Doe"));
        assert_eq!(merged.fields.industry.as_deref(), Some("Fashion"));
        assert_eq!(merged.fields.tags, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_add_rejects_existing() {
        let dir = tempdir().unwrap();
        let mut index = open(dir.path());
        index.add("jane-doe", patch("Jane Doe")).unwrap();

        let err = index.add("Jane Doe", patch("Jane Doe")).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_persists_and_reloads() {
        let dir = tempdir().unwrap();
        {
            let mut index = open(dir.path());
            index.add("jane-doe", patch("Jane Doe").alias("doe-jane")).unwrap();
        }
        let index = open(dir.path());
        let summary = index.get("jane-doe").unwrap();
        assert_eq!(summary.aliases, vec!["doe-jane"]);
        assert!(summary.text.contains("jane"));
    }

    #[test]
    fn test_malformed_index_degrades_to_empty() {
        let dir = tempdir().unwrap();
        FlatStore::new(dir.path())
            .write_bytes("profile/index.json", b"[not an index")
            .unwrap();
        let index = open(dir.path());
        assert!(index.is_empty());
    }

    #[test]
    fn test_find_matches_aliases() {
        let dir = tempdir().unwrap();
        let mut index = open(dir.path());
        index.add("jane-doe-family", patch("Jane Doe").alias("jane-doe")).unwrap();

        assert!(index.get("jane-doe").is_none());
        let found = index.find("Jane Doe");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].uri, "jane-doe-family");
    }

    #[test]
    fn test_alias_exclusivity() {
        let dir = tempdir().unwrap();
        let mut index = open(dir.path());
        index.add("jane-doe", patch("Jane").alias("jd")).unwrap();
        index.add("john-doe", patch("John")).unwrap();

        let err = index
            .update("john-doe", SummaryPatch::new().alias("jd"), false)
            .unwrap_err();
        assert!(err.is_conflict());
        let err = index
            .update("john-doe", SummaryPatch::new().alias("jane-doe"), false)
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(index.get("john-doe").unwrap().aliases.is_empty());

        // Creating a canonical uri that is someone else's alias is refused too.
        assert!(index.update("jd", patch("JD"), true).is_err());
    }

    #[test]
    fn test_self_alias_is_dropped() {
        let dir = tempdir().unwrap();
        let mut index = open(dir.path());
        let summary = index.add("jane-doe", patch("Jane").alias("Jane Doe")).unwrap();
        assert!(summary.aliases.is_empty());
    }

    #[test]
    fn test_move_with_alias() {
        let dir = tempdir().unwrap();
        let mut index = open(dir.path());
        index.add("jane-doe", patch("Jane Doe")).unwrap();

        assert!(index.move_to("jane-doe", "jane-doe-family", true).unwrap());

        let moved = index.get("jane-doe-family").unwrap();
        assert_eq!(moved.uri, "jane-doe-family");
        assert_eq!(moved.name.as_deref(), Some("Jane Doe"));
        assert_eq!(moved.aliases, vec!["jane-doe"]);
        assert!(index.get("jane-doe").is_none());

        let found = index.find("jane-doe");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].uri, "jane-doe-family");
    }

    #[test]
    fn test_move_back_strips_self_alias() {
        let dir = tempdir().unwrap();
        let mut index = open(dir.path());
        index.add("jane-doe", patch("Jane Doe")).unwrap();
        index.move_to("jane-doe", "jane-doe-family", true).unwrap();
        index.move_to("jane-doe-family", "jane-doe", true).unwrap();

        let summary = index.get("jane-doe").unwrap();
        assert_eq!(summary.aliases, vec!["jane-doe-family"]);
    }

    #[test]
    fn test_move_conflict_leaves_index_untouched() {
        let dir = tempdir().unwrap();
        let mut index = open(dir.path());
        index.add("jane-doe", patch("Jane")).unwrap();
        index.add("john-doe", patch("John").alias("jd")).unwrap();

        let err = index.move_to("jane-doe", "jd", true).unwrap_err();
        assert!(err.is_conflict());
        assert!(index.get("jane-doe").is_some());
        assert!(!index.move_to("nobody", "somebody", true).unwrap());
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let mut index = open(dir.path());
        index.add("jane-doe", patch("Jane")).unwrap();

        assert!(index.delete("jane-doe").unwrap());
        assert!(!index.delete("jane-doe").unwrap());
        assert!(open(dir.path()).is_empty());
    }

    #[test]
    fn test_search_strict_and_loose() {
        let dir = tempdir().unwrap();
        let mut index = open(dir.path());
        let fashion = TestFields {
            industry: Some("Fashion & Retail".into()),
            tags: Vec::new(),
        };
        index.add("bernard-arnault", patch("Bernard Arnault").fields(fashion)).unwrap();
        index.add("jeff-bezos", patch("Jeff Bezos")).unwrap();
        index.add("elon-musk", patch("Elon Musk")).unwrap();

        let strict = index.search("arnault fashion", false);
        assert_eq!(strict.len(), 1);
        assert_eq!(strict[0].uri, "bernard-arnault");

        assert!(index.search("arnault bezos", false).is_empty());

        let loose: Vec<_> = index.search("Arnault Bezos", true).iter().map(|s| s.uri.clone()).collect();
        assert_eq!(loose, vec!["bernard-arnault", "jeff-bezos"]);

        // Substring of a stored token, diacritics ignored.
        assert_eq!(index.search("Arnâu", false).len(), 1);
        // No usable tokens: everything.
        assert_eq!(index.search("a b", false).len(), 3);
    }
}
