//! Batch ingestion job.
//!
//! Drains a queue lane, fetches the drained uris in one batch, parses each
//! payload and resolves the resulting record. Errors are handled per item:
//! in safe mode they are logged and counted, otherwise the first one stops
//! the run. Items whose fetch failed, and items left unprocessed by an
//! aborted run, go back onto the lane.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{ConflictError, WealthError, WealthResult};
use crate::fetch::{FetchResult, Fetcher, RecordParser};
use crate::queue::QueueItem;
use crate::resolver::{ResolutionOutcome, Resolver};
use crate::store::Store;
use crate::uri::normalize_uri;

const DEFAULT_BATCH_SIZE: usize = 25;

/// Counters of one job run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobReport {
    /// Items taken from the lane.
    pub processed: usize,
    /// Records that created a new entity.
    pub created: usize,
    /// Records applied to an existing entity.
    pub updated: usize,
    /// Records folded into a renamed entity.
    pub merged: usize,
    /// Items that failed at any stage.
    pub failed: usize,
    /// Failed fetches put back on the lane.
    pub requeued: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Fetch,
    Parse,
    Resolve,
}

impl Stage {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Parse => "parse",
            Self::Resolve => "resolve",
        }
    }
}

/// Fetch, parse and resolve pending profiles.
#[derive(Debug)]
pub struct IngestJob<F, P> {
    fetcher: F,
    parser: P,
    lane: Option<String>,
    batch_size: usize,
    safe_mode: Option<bool>,
}

impl<F: Fetcher, P: RecordParser> IngestJob<F, P> {
    /// Job over the store's resolver lane and safe-mode setting.
    pub fn new(fetcher: F, parser: P) -> Self {
        Self {
            fetcher,
            parser,
            lane: None,
            batch_size: DEFAULT_BATCH_SIZE,
            safe_mode: None,
        }
    }

    /// Drains `lane` instead of the resolver lane.
    #[must_use]
    pub fn lane(mut self, lane: impl Into<String>) -> Self {
        self.lane = Some(lane.into());
        self
    }

    /// Maximum items per run.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Overrides the store's safe-mode setting.
    #[must_use]
    pub fn safe_mode(mut self, safe_mode: bool) -> Self {
        self.safe_mode = Some(safe_mode);
        self
    }

    /// The wrapped fetcher.
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Processes up to one batch from the lane.
    ///
    /// Returns the first item error when safe mode is off.
    pub fn run(&mut self, store: &mut Store) -> WealthResult<JobReport> {
        let lane = self
            .lane
            .clone()
            .unwrap_or_else(|| store.config().resolver.lane.clone());
        let safe_mode = self.safe_mode.unwrap_or(store.config().safe_mode);

        let items = store.queue_mut().next(&lane, self.batch_size)?;
        let mut report = JobReport::default();
        if items.is_empty() {
            tracing::debug!(lane = %lane, "nothing to ingest");
            return Ok(report);
        }

        let uris: Vec<String> = items.iter().map(|i| i.uri.clone()).collect();
        let mut results: HashMap<String, FetchResult> = self
            .fetcher
            .fetch_batch(&uris)
            .into_iter()
            .map(|r| (normalize_uri(&r.uri), r))
            .collect();

        let mut requeue: Vec<QueueItem> = Vec::new();
        let mut aborted = None;
        {
            // Items come from the queue already; no follow-up for them.
            let mut resolver = store.resolver().with_follow_up(false);
            let mut pending = items.into_iter();
            for item in pending.by_ref() {
                report.processed += 1;
                match self.ingest(&mut resolver, &item, results.remove(&item.uri)) {
                    Ok(outcome) => match outcome {
                        ResolutionOutcome::Created => report.created += 1,
                        ResolutionOutcome::Updated => report.updated += 1,
                        ResolutionOutcome::Merged => report.merged += 1,
                    },
                    Err((stage, e)) => {
                        report.failed += 1;
                        tracing::warn!(
                            uri = %item.uri,
                            lane = %lane,
                            operation = stage.as_str(),
                            error = %e,
                            "ingest item failed"
                        );
                        if stage == Stage::Fetch {
                            requeue.push(item);
                        }
                        if !safe_mode {
                            aborted = Some(e);
                            break;
                        }
                    }
                }
            }
            requeue.extend(pending);
        }

        for item in requeue {
            match store.queue_mut().add(&lane, &item.uri, item.prio, item.args) {
                Ok(()) => report.requeued += 1,
                Err(WealthError::Conflict(ConflictError::QueueFull { .. })) => {
                    tracing::warn!(uri = %item.uri, lane = %lane, "lane full, item dropped");
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(e) = aborted {
            tracing::error!(lane = %lane, error = %e, ?report, "ingest run aborted");
            return Err(e);
        }
        tracing::info!(lane = %lane, ?report, "ingest run finished");
        Ok(report)
    }

    fn ingest(
        &self,
        resolver: &mut Resolver<'_>,
        item: &QueueItem,
        fetched: Option<FetchResult>,
    ) -> Result<ResolutionOutcome, (Stage, WealthError)> {
        let fetched = fetched.ok_or_else(|| {
            (
                Stage::Fetch,
                WealthError::Fetch {
                    uri: item.uri.clone(),
                    retries: 0,
                    message: "no result returned".to_string(),
                },
            )
        })?;
        let data = fetched.into_data().map_err(|e| (Stage::Fetch, e))?;
        let record = self
            .parser
            .parse(&item.uri, &data)
            .map_err(|e| (Stage::Parse, e))?;

        let force = item
            .args
            .as_ref()
            .and_then(|args| args.get("force"))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        resolver
            .resolve_with(&record, force)
            .map(|resolution| resolution.outcome)
            .map_err(|e| (Stage::Resolve, e))
    }
}
