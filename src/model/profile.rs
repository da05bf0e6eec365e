//! Person profiles.
//!
//! A [`ProfileRecord`] is the already-parsed attribute bag handed over by the
//! record parser. The resolver splits it into a [`ProfileFields`] summary
//! patch for the index and a dated [`ProfileSnapshot`] for the history.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::index::{SummaryFields, SummaryPatch};
use crate::merge::Merge;
use crate::snapshot::SnapshotRecord;
use crate::uri::IdentityHash;

use super::{SnapshotMeta, SCHEMA_VERSION};

/// Place of birth or residence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    /// City.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// State or region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Country.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl Merge for Place {
    fn merge(&mut self, incoming: Self) {
        self.city.merge(incoming.city);
        self.state.merge(incoming.state);
        self.country.merge(incoming.country);
    }
}

/// Index payload for a profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileFields {
    /// Identity hash, never replaced once set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<IdentityHash>,
    /// Gender as reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    /// Date of birth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    /// Place of birth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_place: Option<Place>,
    /// Country of citizenship.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citizenship: Option<String>,
    /// Main industry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    /// Fortune held by a family rather than one person.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<bool>,
    /// Person has died.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deceased: Option<bool>,
    /// Latest known net worth, in millions of USD.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_worth: Option<f64>,
    /// Latest known rank.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    /// Last time the summary was updated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl Merge for ProfileFields {
    fn merge(&mut self, incoming: Self) {
        self.id.merge(incoming.id);
        self.gender.merge(incoming.gender);
        self.birth_date.merge(incoming.birth_date);
        self.birth_place.merge(incoming.birth_place);
        self.citizenship.merge(incoming.citizenship);
        self.industry.merge(incoming.industry);
        self.family.merge(incoming.family);
        self.deceased.merge(incoming.deceased);
        self.net_worth.merge(incoming.net_worth);
        self.rank.merge(incoming.rank);
        self.last_modified.merge(incoming.last_modified);
    }
}

impl SummaryFields for ProfileFields {
    fn search_terms(&self) -> Vec<String> {
        let mut terms: Vec<String> = [&self.citizenship, &self.industry]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        if let Some(place) = &self.birth_place {
            terms.extend([&place.city, &place.country].into_iter().flatten().cloned());
        }
        terms
    }
}

/// Structured profile attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInfo {
    /// Gender as reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    /// Date of birth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    /// Place of birth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_place: Option<Place>,
    /// Country of citizenship.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citizenship: Option<String>,
    /// Main industry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    /// Fortune held by a family.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<bool>,
    /// Person has died.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deceased: Option<bool>,
    /// Provider fields without a dedicated slot (education, marital status, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A person or company related to the profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// Display name.
    pub name: String,
    /// Uri when the relation has its own profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Kind of relation, e.g. `spouse`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
}

/// Image or other media attached to a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    /// Location of the file.
    pub url: String,
    /// Caption text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Photographer or source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit: Option<String>,
}

/// Position on a ranking list at the snapshot date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ranking {
    /// Position on the list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    /// Millions of USD.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_worth: Option<f64>,
    /// Uri of the list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list: Option<String>,
}

/// A holding that contributes to net worth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    /// Holding name.
    pub name: String,
    /// Asset class, e.g. `stock`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Exchange ticker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    /// Share count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shares: Option<f64>,
    /// Millions of USD.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

/// Already-normalized profile attributes coming from the record parser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    /// Uri as given by the provider.
    pub uri: String,
    /// Identity hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<IdentityHash>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Additional uris naming the same person.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Day the data describes; records without one only touch the index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Structured attributes.
    #[serde(default)]
    pub info: ProfileInfo,
    /// Biography paragraphs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bio: Vec<String>,
    /// Related people and companies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<Relation>,
    /// Attached media.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<Media>,
    /// Ranking at `date`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranking: Option<Ranking>,
    /// Holdings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<Asset>,
}

impl ProfileRecord {
    /// Empty record for `uri`.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// Sets the identity hash.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<IdentityHash>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the gender.
    #[must_use]
    pub fn with_gender(mut self, gender: impl Into<String>) -> Self {
        self.info.gender = Some(gender.into());
        self
    }

    /// Sets the snapshot date.
    #[must_use]
    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// Sets rank and net worth, in millions of USD.
    #[must_use]
    pub fn with_ranking(mut self, rank: u32, net_worth: f64) -> Self {
        self.ranking = Some(Ranking {
            rank: Some(rank),
            net_worth: Some(net_worth),
            list: None,
        });
        self
    }

    /// Summary fields carried by this record.
    #[must_use]
    pub fn fields(&self) -> ProfileFields {
        let ranking = self.ranking.clone().unwrap_or_default();
        ProfileFields {
            id: self.id.clone(),
            gender: self.info.gender.clone(),
            birth_date: self.info.birth_date,
            birth_place: self.info.birth_place.clone(),
            citizenship: self.info.citizenship.clone(),
            industry: self.info.industry.clone(),
            family: self.info.family,
            deceased: self.info.deceased,
            net_worth: ranking.net_worth,
            rank: ranking.rank,
            last_modified: None,
        }
    }

    /// Index patch for this record, stamped with `now`.
    #[must_use]
    pub fn summary_patch(&self, now: DateTime<Utc>) -> SummaryPatch<ProfileFields> {
        let mut fields = self.fields();
        fields.last_modified = Some(now);
        SummaryPatch {
            name: self.name.clone(),
            aliases: self.aliases.clone(),
            fields,
        }
    }

    /// Full snapshot of this record for `date` under `uri`.
    #[must_use]
    pub fn to_snapshot(&self, uri: &str, date: &str, now: DateTime<Utc>) -> ProfileSnapshot {
        ProfileSnapshot {
            date: date.to_string(),
            uri: uri.to_string(),
            id: self.id.clone(),
            name: self.name.clone(),
            info: self.info.clone(),
            bio: self.bio.clone(),
            related: self.related.clone(),
            media: self.media.clone(),
            ranking: self.ranking.clone(),
            assets: self.assets.clone(),
            meta: SnapshotMeta {
                schema_version: SCHEMA_VERSION,
                last_modified: now,
            },
        }
    }

    /// History row for `date`, if the record carries ranking data.
    #[must_use]
    pub fn history_row(&self, date: &str) -> Option<HistoryRow> {
        let ranking = self.ranking.as_ref()?;
        if ranking.rank.is_none() && ranking.net_worth.is_none() {
            return None;
        }
        Some(HistoryRow {
            date: date.to_string(),
            rank: ranking.rank,
            net_worth: ranking.net_worth,
        })
    }
}

/// Dated, denormalized profile state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSnapshot {
    /// Snapshot date, `YYYY-MM-DD`.
    pub date: String,
    /// Canonical uri at write time.
    pub uri: String,
    /// Copied from the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<IdentityHash>,
    /// Copied from the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Copied from the record.
    #[serde(default)]
    pub info: ProfileInfo,
    /// Copied from the record.
    #[serde(default)]
    pub bio: Vec<String>,
    /// Copied from the record.
    #[serde(default)]
    pub related: Vec<Relation>,
    /// Copied from the record.
    #[serde(default)]
    pub media: Vec<Media>,
    /// Copied from the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranking: Option<Ranking>,
    /// Copied from the record.
    #[serde(default)]
    pub assets: Vec<Asset>,
    /// Write metadata.
    pub meta: SnapshotMeta,
}

impl SnapshotRecord for ProfileSnapshot {
    const KIND: &'static str = "profile";

    fn date(&self) -> &str {
        &self.date
    }

    fn set_date(&mut self, date: String) {
        self.date = date;
    }
}

/// One row of `history.csv`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    /// Snapshot date.
    pub date: String,
    /// Rank on that date.
    pub rank: Option<u32>,
    /// Net worth on that date, in millions of USD.
    pub net_worth: Option<f64>,
}

impl HistoryRow {
    /// Column names, in order.
    pub const HEADER: [&'static str; 3] = ["date", "rank", "netWorth"];

    /// Cells in [`HistoryRow::HEADER`] order; missing values are empty.
    #[must_use]
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.date.clone(),
            self.rank.map(|r| r.to_string()).unwrap_or_default(),
            self.net_worth.map(|n| n.to_string()).unwrap_or_default(),
        ]
    }

    /// Parses a row; rows without a date are skipped by returning `None`.
    #[must_use]
    pub fn from_row(row: &[String]) -> Option<Self> {
        let date = row.first().filter(|d| !d.is_empty())?.clone();
        Some(Self {
            date,
            rank: row.get(1).and_then(|r| r.parse().ok()),
            net_worth: row.get(2).and_then(|n| n.parse().ok()),
        })
    }
}
