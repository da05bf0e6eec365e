//! Ranking lists (e.g. a yearly or real-time billionaires list).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::index::SummaryFields;
use crate::merge::Merge;
use crate::snapshot::SnapshotRecord;
use crate::storage::Table;

/// Index payload for a ranking list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFields {
    /// Display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Entries in the latest snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_count: Option<u64>,
    /// When the list was last recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl Merge for ListFields {
    fn merge(&mut self, incoming: Self) {
        self.title.merge(incoming.title);
        self.entry_count.merge(incoming.entry_count);
        self.last_modified.merge(incoming.last_modified);
    }
}

impl SummaryFields for ListFields {
    fn search_terms(&self) -> Vec<String> {
        self.title.iter().cloned().collect()
    }
}

/// One ranked position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEntry {
    /// 1-based position.
    pub rank: u32,
    /// Profile uri.
    pub uri: String,
    /// Display name as listed.
    pub name: String,
    /// Millions of USD.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_worth: Option<f64>,
}

/// A ranking list as published on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListSnapshot {
    /// Publication date, `YYYY-MM-DD`.
    pub date: String,
    /// Entries in rank order.
    pub entries: Vec<ListEntry>,
}

const COLUMNS: [&str; 4] = ["rank", "uri", "name", "netWorth"];

impl SnapshotRecord for ListSnapshot {
    const KIND: &'static str = "list";
    const TABULAR: bool = true;

    fn date(&self) -> &str {
        &self.date
    }

    fn set_date(&mut self, date: String) {
        self.date = date;
    }

    fn to_table(&self) -> Option<Table> {
        let mut table = Table::new(&COLUMNS);
        table.rows = self
            .entries
            .iter()
            .map(|e| {
                vec![
                    e.rank.to_string(),
                    e.uri.clone(),
                    e.name.clone(),
                    e.net_worth.map(|n| n.to_string()).unwrap_or_default(),
                ]
            })
            .collect();
        Some(table)
    }

    fn from_table(date: &str, table: Table) -> Option<Self> {
        let col = |name: &str| table.column(name);
        let (rank, uri, name, worth) = (col("rank")?, col("uri")?, col("name")?, col("netWorth"));

        let entries = table
            .rows
            .iter()
            .filter_map(|row| {
                Some(ListEntry {
                    rank: row.get(rank)?.parse().ok()?,
                    uri: row.get(uri)?.clone(),
                    name: row.get(name)?.clone(),
                    net_worth: worth.and_then(|i| row.get(i)).and_then(|n| n.parse().ok()),
                })
            })
            .collect();
        Some(Self {
            date: date.to_string(),
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_form_roundtrip() {
        let snapshot = ListSnapshot {
            date: "2024-04-01".into(),
            entries: vec![
                ListEntry {
                    rank: 1,
                    uri: "bernard-arnault".into(),
                    name: "Bernard Arnault & family".into(),
                    net_worth: Some(233_000.0),
                },
                ListEntry {
                    rank: 2,
                    uri: "elon-musk".into(),
                    name: "Elon Musk".into(),
                    net_worth: None,
                },
            ],
        };
        let table = snapshot.to_table().unwrap();
        assert_eq!(table.header, COLUMNS);
        let back = ListSnapshot::from_table("2024-04-01", table).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_from_table_skips_unparseable_rows() {
        let mut table = Table::new(&COLUMNS);
        table.rows.push(vec!["x".into(), "a".into(), "A".into(), String::new()]);
        table.rows.push(vec!["3".into(), "b".into(), "B".into(), "10".into()]);
        let snapshot = ListSnapshot::from_table("2024-01-01", table).unwrap();
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(snapshot.entries[0].net_worth, Some(10.0));
    }

    #[test]
    fn test_from_table_requires_columns() {
        let table = Table::new(&["rank", "name"]);
        assert!(ListSnapshot::from_table("2024-01-01", table).is_none());
    }
}
