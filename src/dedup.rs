//! Deduplication engine.
//!
//! Decides whether an incoming record is an already known person filed
//! under a different or malformed uri. Candidates come from uri similarity
//! (Sørensen–Dice over character bigrams), both as given and with the
//! uri's tokens reversed to catch "first-last" against "last-first". A
//! candidate is kept only when none of the identifying attributes
//! contradict.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::config::DedupConfig;
use crate::index::{Index, Summary, SummaryFields};
use crate::model::{Place, ProfileFields, ProfileRecord};
use crate::uri::{normalize_uri, reverse_tokens, IdentityHash};

/// Sørensen–Dice coefficient over character bigrams, counted as multisets.
///
/// Strings shorter than two characters have no bigrams and only match when
/// they are equal.
#[must_use]
pub fn dice_coefficient(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.len() < 2 || b.len() < 2 {
        return 0.0;
    }

    let mut counts: HashMap<(char, char), usize> = HashMap::new();
    for pair in a.windows(2) {
        *counts.entry((pair[0], pair[1])).or_default() += 1;
    }
    let mut overlap = 0usize;
    for pair in b.windows(2) {
        if let Some(n) = counts.get_mut(&(pair[0], pair[1])) {
            if *n > 0 {
                *n -= 1;
                overlap += 1;
            }
        }
    }

    let total = (a.len() - 1) + (b.len() - 1);
    (2 * overlap) as f64 / total as f64
}

/// Attributes that identify a person for merge decisions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityAttributes {
    /// Identity hash.
    pub id: Option<IdentityHash>,
    /// Gender.
    pub gender: Option<String>,
    /// Date of birth.
    pub birth_date: Option<NaiveDate>,
    /// Place of birth.
    pub birth_place: Option<Place>,
    /// Country of citizenship.
    pub citizenship: Option<String>,
    /// Main industry.
    pub industry: Option<String>,
}

impl From<&ProfileFields> for IdentityAttributes {
    fn from(fields: &ProfileFields) -> Self {
        Self {
            id: fields.id.clone(),
            gender: fields.gender.clone(),
            birth_date: fields.birth_date,
            birth_place: fields.birth_place.clone(),
            citizenship: fields.citizenship.clone(),
            industry: fields.industry.clone(),
        }
    }
}

impl From<&ProfileRecord> for IdentityAttributes {
    fn from(record: &ProfileRecord) -> Self {
        Self {
            id: record.id.clone(),
            gender: record.info.gender.clone(),
            birth_date: record.info.birth_date,
            birth_place: record.info.birth_place.clone(),
            citizenship: record.info.citizenship.clone(),
            industry: record.info.industry.clone(),
        }
    }
}

/// Both sides define the value and disagree.
fn contradicts<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a != b)
}

/// Whether `source` may be folded into `target`.
///
/// Equal identity hashes always merge. Otherwise a missing attribute never
/// disqualifies; only a value present on both sides and unequal does.
#[must_use]
pub fn mergeable(target: &IdentityAttributes, source: &IdentityAttributes) -> bool {
    if let (Some(a), Some(b)) = (&target.id, &source.id) {
        if a == b {
            return true;
        }
    }
    !(contradicts(&target.gender, &source.gender)
        || contradicts(&target.birth_date, &source.birth_date)
        || contradicts(&target.birth_place, &source.birth_place)
        || contradicts(&target.citizenship, &source.citizenship)
        || contradicts(&target.industry, &source.industry))
}

/// An existing entity considered for an incoming record.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeCandidate {
    /// Normalized uri of the incoming record.
    pub source: String,
    /// Canonical uri of the existing entity.
    pub target: String,
    /// Best similarity score that made it a candidate.
    pub score: f64,
    /// True when the score came from the token-reversed form.
    pub reversed: bool,
    /// False when an identifying attribute contradicts.
    pub mergeable: bool,
}

/// Uri similarity search over an index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deduplicator {
    /// See [`DedupConfig::forward_threshold`].
    pub forward_threshold: f64,
    /// See [`DedupConfig::reversed_threshold`].
    pub reversed_threshold: f64,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::from(DedupConfig::default())
    }
}

impl From<DedupConfig> for Deduplicator {
    fn from(config: DedupConfig) -> Self {
        Self {
            forward_threshold: config.forward_threshold,
            reversed_threshold: config.reversed_threshold,
        }
    }
}

struct Hit<'a, F> {
    summary: &'a Summary<F>,
    score: f64,
    reversed: bool,
}

impl Deduplicator {
    fn hits<'a, F: SummaryFields>(&self, index: &'a Index<F>, uri: &str) -> Vec<Hit<'a, F>> {
        let uri = normalize_uri(uri);
        if uri.is_empty() {
            return Vec::new();
        }
        let flipped = reverse_tokens(&uri);

        index
            .iter()
            .filter_map(|summary| {
                let forward = dice_coefficient(&uri, &summary.uri);
                let backward = dice_coefficient(&flipped, &summary.uri);
                let forward_hit = forward >= self.forward_threshold;
                let backward_hit = backward >= self.reversed_threshold;
                let (score, reversed) = match (forward_hit, backward_hit) {
                    (false, false) => return None,
                    (true, false) => (forward, false),
                    (false, true) => (backward, true),
                    (true, true) if backward > forward => (backward, true),
                    (true, true) => (forward, false),
                };
                Some(Hit {
                    summary,
                    score,
                    reversed,
                })
            })
            .collect()
    }

    /// Existing entities whose canonical uri is similar to `uri`, either as
    /// given or with its tokens reversed. Results keep index order.
    #[must_use]
    pub fn similar_candidates<'a, F: SummaryFields>(
        &self,
        index: &'a Index<F>,
        uri: &str,
    ) -> Vec<&'a Summary<F>> {
        self.hits(index, uri).into_iter().map(|h| h.summary).collect()
    }

    /// Every similar candidate for `record` with its merge verdict.
    ///
    /// Records without an identity hash or a usable uri have no candidates.
    #[must_use]
    pub fn evaluate(&self, index: &Index<ProfileFields>, record: &ProfileRecord) -> Vec<MergeCandidate> {
        let source = normalize_uri(&record.uri);
        if record.id.is_none() || source.is_empty() {
            return Vec::new();
        }
        let incoming = IdentityAttributes::from(record);

        self.hits(index, &source)
            .into_iter()
            .map(|hit| {
                let verdict = mergeable(&IdentityAttributes::from(&hit.summary.fields), &incoming);
                tracing::debug!(
                    uri = %source,
                    candidate = %hit.summary.uri,
                    score = hit.score,
                    reversed = hit.reversed,
                    mergeable = verdict,
                    "dedup candidate"
                );
                MergeCandidate {
                    source: source.clone(),
                    target: hit.summary.uri.clone(),
                    score: hit.score,
                    reversed: hit.reversed,
                    mergeable: verdict,
                }
            })
            .collect()
    }

    /// Similar candidates that `record` can be merged into.
    #[must_use]
    pub fn find_matching(&self, index: &Index<ProfileFields>, record: &ProfileRecord) -> Vec<MergeCandidate> {
        self.evaluate(index, record)
            .into_iter()
            .filter(|c| c.mergeable)
            .collect()
    }
}
