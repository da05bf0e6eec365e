//! Collaborator interfaces consumed by the ingestion pipeline.
//!
//! Network access, rate limiting and raw-response parsing live outside the
//! crate. The pipeline only sees batches of [`FetchResult`]s and typed
//! [`ProfileRecord`]s.

use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, WealthError, WealthResult};
use crate::model::ProfileRecord;

/// Outcome of fetching one uri.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    /// Uri that was requested.
    pub uri: String,
    /// Whether `data` holds a response.
    pub success: bool,
    /// Raw response body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Failure description when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Attempts made by the fetcher beyond the first.
    #[serde(default)]
    pub retries: u32,
}

impl FetchResult {
    /// A successful fetch.
    #[must_use]
    pub fn ok(uri: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            uri: uri.into(),
            success: true,
            data: Some(data),
            error: None,
            retries: 0,
        }
    }

    /// A failed fetch.
    #[must_use]
    pub fn failed(uri: impl Into<String>, error: impl Into<String>, retries: u32) -> Self {
        Self {
            uri: uri.into(),
            success: false,
            data: None,
            error: Some(error.into()),
            retries,
        }
    }

    /// The fetched payload, or a fetch error for failed or empty results.
    pub fn into_data(self) -> WealthResult<serde_json::Value> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (_, _) => Err(WealthError::Fetch {
                message: self.error.unwrap_or_else(|| "empty response".to_string()),
                uri: self.uri,
                retries: self.retries,
            }),
        }
    }
}

/// Batch fetch capability.
///
/// Implementations own retrying and pacing; every requested uri must get
/// exactly one result, in any order.
pub trait Fetcher {
    /// Fetches every uri in `uris`.
    fn fetch_batch(&mut self, uris: &[String]) -> Vec<FetchResult>;
}

/// Turns a raw provider payload into a typed profile record.
pub trait RecordParser {
    /// Parses the payload fetched for `uri`.
    fn parse(&self, uri: &str, data: &serde_json::Value) -> WealthResult<ProfileRecord>;
}

/// Parser for payloads that already have the [`ProfileRecord`] shape.
///
/// A payload without a `uri` takes the requested one.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRecordParser;

impl RecordParser for JsonRecordParser {
    fn parse(&self, uri: &str, data: &serde_json::Value) -> WealthResult<ProfileRecord> {
        let mut data = data.clone();
        if let Some(object) = data.as_object_mut() {
            object
                .entry("uri")
                .or_insert_with(|| serde_json::Value::String(uri.to_string()));
        }
        serde_json::from_value(data).map_err(|e| {
            ValidationError::MalformedRecord {
                uri: uri.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_into_data() {
        let ok = FetchResult::ok("jane-doe", json!({"name": "Jane"}));
        assert_eq!(ok.into_data().unwrap()["name"], "Jane");

        let failed = FetchResult::failed("jane-doe", "HTTP 503", 3);
        match failed.into_data().unwrap_err() {
            WealthError::Fetch { uri, retries, message } => {
                assert_eq!(uri, "jane-doe");
                assert_eq!(retries, 3);
                assert_eq!(message, "HTTP 503");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_json_record_parser_fills_uri() {
        let record = JsonRecordParser
            .parse(
                "jane-doe",
                &json!({"id": "h1", "name": "Jane Doe", "info": {"gender": "f"}, "date": "2024-04-01"}),
            )
            .unwrap();
        assert_eq!(record.uri, "jane-doe");
        assert_eq!(record.id.unwrap().as_str(), "h1");
        assert_eq!(record.info.gender.as_deref(), Some("f"));

        let err = JsonRecordParser.parse("jane-doe", &json!({"aliases": 3})).unwrap_err();
        assert!(err.is_validation());
    }
}
