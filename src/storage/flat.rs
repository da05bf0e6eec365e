//! Byte-level file access under a store root.
//!
//! Every path handed to [`FlatStore`] is relative to its root. Whole-file
//! writes go through a temporary sibling and a rename, so a reader never
//! observes a half-written JSON document. Appends to delimited files are
//! not atomic.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;

/// A delimited-text document: a header row plus data rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    /// Column names.
    pub header: Vec<String>,
    /// Data rows, one cell per column.
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Empty table with the given columns.
    #[must_use]
    pub fn new(header: &[&str]) -> Self {
        Self {
            header: header.iter().map(|h| (*h).to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Position of a header column.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    fn encode(&self) -> String {
        let mut out = String::new();
        push_row(&mut out, &self.header);
        for row in &self.rows {
            push_row(&mut out, row);
        }
        out
    }

    fn decode(text: &str) -> Self {
        let mut rows = parse_rows(text).into_iter();
        let header = rows.next().unwrap_or_default();
        Self {
            header,
            rows: rows.collect(),
        }
    }
}

fn push_row<S: AsRef<str>>(out: &mut String, fields: &[S]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let field = field.as_ref();
        if field.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push('\n');
}

fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                other => field.push(other),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            other => field.push(other),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

/// Flat-file store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FlatStore {
    root: PathBuf,
}

impl FlatStore {
    /// Store rooted at `root`. Nothing is created until the first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a root-relative path.
    #[must_use]
    pub fn path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.root.join(rel)
    }

    /// Whether the path exists.
    #[must_use]
    pub fn exists(&self, rel: impl AsRef<Path>) -> bool {
        self.path(rel).exists()
    }

    /// Creates a directory and all of its parents.
    pub fn ensure_dir(&self, rel: impl AsRef<Path>) -> Result<(), StorageError> {
        let path = self.path(rel);
        fs::create_dir_all(&path).map_err(|e| StorageError::io(path, e))
    }

    /// Reads raw bytes. A missing file is `Ok(None)`.
    pub fn read_bytes(&self, rel: impl AsRef<Path>) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path(rel);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    /// Replaces a file's content in one step (temp file, fsync, rename).
    pub fn write_bytes(&self, rel: impl AsRef<Path>, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = File::create(&tmp).map_err(|e| StorageError::io(&tmp, e))?;
        file.write_all(bytes).map_err(|e| StorageError::io(&tmp, e))?;
        file.sync_all().map_err(|e| StorageError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| StorageError::io(&path, e))
    }

    /// Reads and decodes a JSON document. A missing file is `Ok(None)`.
    pub fn read_json<T: DeserializeOwned>(
        &self,
        rel: impl AsRef<Path>,
    ) -> Result<Option<T>, StorageError> {
        let rel = rel.as_ref();
        let Some(bytes) = self.read_bytes(rel)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::serialization(self.path(rel), e))
    }

    /// Writes `value` as pretty-printed JSON, atomically.
    pub fn write_json<T: Serialize + ?Sized>(
        &self,
        rel: impl AsRef<Path>,
        value: &T,
    ) -> Result<(), StorageError> {
        let rel = rel.as_ref();
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| StorageError::serialization(self.path(rel), e))?;
        self.write_bytes(rel, &bytes)
    }

    /// Reads a delimited-text file. A missing file is `Ok(None)`.
    pub fn read_table(&self, rel: impl AsRef<Path>) -> Result<Option<Table>, StorageError> {
        let rel = rel.as_ref();
        let Some(bytes) = self.read_bytes(rel)? else {
            return Ok(None);
        };
        let text = String::from_utf8(bytes)
            .map_err(|e| StorageError::serialization(self.path(rel), e))?;
        Ok(Some(Table::decode(&text)))
    }

    /// Writes a delimited-text file, atomically.
    pub fn write_table(&self, rel: impl AsRef<Path>, table: &Table) -> Result<(), StorageError> {
        self.write_bytes(rel, table.encode().as_bytes())
    }

    /// Appends rows to a delimited file, writing `header` first if the file
    /// does not exist yet.
    pub fn append_rows(
        &self,
        rel: impl AsRef<Path>,
        header: &[&str],
        rows: &[Vec<String>],
    ) -> Result<(), StorageError> {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }

        let mut out = String::new();
        if !path.exists() {
            push_row(&mut out, header);
        }
        for row in rows {
            push_row(&mut out, row);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StorageError::io(&path, e))?;
        file.write_all(out.as_bytes())
            .map_err(|e| StorageError::io(&path, e))
    }

    /// Stems of the files in `rel` with extension `ext`, sorted ascending.
    ///
    /// A missing directory lists as empty.
    pub fn list_files(&self, rel: impl AsRef<Path>, ext: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.path(rel);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(dir, e)),
        };

        let mut stems = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&dir, e))?;
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(ext) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                stems.push(stem.to_string());
            }
        }
        stems.sort();
        Ok(stems)
    }

    /// Removes a directory tree. Returns false if it did not exist.
    pub fn remove_dir(&self, rel: impl AsRef<Path>) -> Result<bool, StorageError> {
        let path = self.path(rel);
        match fs::remove_dir_all(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    /// Renames a directory. Returns false if the source did not exist.
    pub fn rename_dir(
        &self,
        from: impl AsRef<Path>,
        to: impl AsRef<Path>,
    ) -> Result<bool, StorageError> {
        let from = self.path(from);
        let to = self.path(to);
        if !from.exists() {
            return Ok(false);
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        fs::rename(&from, &to).map_err(|e| StorageError::io(&to, e))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_json_roundtrip_and_missing() {
        let dir = tempdir().unwrap();
        let store = FlatStore::new(dir.path());

        let missing: Option<serde_json::Value> = store.read_json("profile/index.json").unwrap();
        assert!(missing.is_none());

        store.write_json("profile/index.json", &json!({"a": 1})).unwrap();
        let read: serde_json::Value = store.read_json("profile/index.json").unwrap().unwrap();
        assert_eq!(read, json!({"a": 1}));
        assert!(!store.exists("profile/index.json.tmp"));
    }

    #[test]
    fn test_malformed_json_is_serialization_error() {
        let dir = tempdir().unwrap();
        let store = FlatStore::new(dir.path());
        store.write_bytes("broken.json", b"{not json").unwrap();

        let err = store.read_json::<serde_json::Value>("broken.json").unwrap_err();
        assert!(matches!(err, StorageError::Serialization { .. }));
    }

    #[test]
    fn test_table_quoting() {
        let dir = tempdir().unwrap();
        let store = FlatStore::new(dir.path());

        let mut table = Table::new(&["rank", "name"]);
        table.rows.push(vec!["1".to_string(), "Doe, Jane \"JD\"".to_string()]);
        table.rows.push(vec!["2".to_string(), "line\nbreak".to_string()]);
        store.write_table("list/2024-01-01.csv", &table).unwrap();

        let read = store.read_table("list/2024-01-01.csv").unwrap().unwrap();
        assert_eq!(read, table);
        assert_eq!(read.column("name"), Some(1));
    }

    #[test]
    fn test_append_rows_writes_header_once() {
        let dir = tempdir().unwrap();
        let store = FlatStore::new(dir.path());

        store
            .append_rows("p/history.csv", &["date", "rank"], &[vec!["2024-01-01".into(), "3".into()]])
            .unwrap();
        store
            .append_rows("p/history.csv", &["date", "rank"], &[vec!["2024-02-01".into(), "2".into()]])
            .unwrap();

        let table = store.read_table("p/history.csv").unwrap().unwrap();
        assert_eq!(table.header, vec!["date", "rank"]);
        assert_eq!(table.rows.len(), 2);
    }

    #[test]
    fn test_list_files_filters_extension() {
        let dir = tempdir().unwrap();
        let store = FlatStore::new(dir.path());
        store.write_bytes("e/2024-02-01.json", b"{}").unwrap();
        store.write_bytes("e/2024-01-01.json", b"{}").unwrap();
        store.write_bytes("e/history.csv", b"date\n").unwrap();

        assert_eq!(store.list_files("e", "json").unwrap(), vec!["2024-01-01", "2024-02-01"]);
        assert!(store.list_files("nope", "json").unwrap().is_empty());
    }

    #[test]
    fn test_rename_and_remove_dir() {
        let dir = tempdir().unwrap();
        let store = FlatStore::new(dir.path());
        store.write_bytes("profile/a/meta.json", b"{}").unwrap();

        assert!(store.rename_dir("profile/a", "profile/b").unwrap());
        assert!(store.exists("profile/b/meta.json"));
        assert!(!store.rename_dir("profile/a", "profile/c").unwrap());

        assert!(store.remove_dir("profile/b").unwrap());
        assert!(!store.remove_dir("profile/b").unwrap());
    }
}
