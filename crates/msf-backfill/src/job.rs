//! Time-boxed backfill of the file size attribute.
//!
//! A run re-queries the live candidate list, walks it in order and stops as soon
//! as the wall-clock budget is spent. Nothing about the stopping point is
//! persisted: items left behind simply still lack the attribute and show up
//! again on the next run. Concurrent runs are tolerated because every write is
//! an idempotent upsert and each item is re-checked right before probing.

use crate::attribute::DerivedAttributeStore;
use crate::finder::ItemFinder;
use crate::probe::{Probe, SizeProbe};
use crate::{Collaborators, FilesizeError};
use chrono::{DateTime, Utc};
use msf_core::{FilesizeConfig, ItemId};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
    Completed,
    BudgetExceeded,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::BudgetExceeded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorKind {
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub item_id: ItemId,
    pub kind: ItemErrorKind,
    pub message: String,
}

/// Per-item failures of a single run. Discarded with the report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ErrorLog {
    entries: Vec<ItemError>,
}

impl ErrorLog {
    pub fn push(&mut self, item_id: ItemId, kind: ItemErrorKind, message: impl Into<String>) {
        self.entries.push(ItemError {
            item_id,
            kind,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn item_ids(&self) -> Vec<ItemId> {
        self.entries.iter().map(|entry| entry.item_id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemError> {
        self.entries.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub candidates: usize,
    pub written: usize,
    pub skipped_existing: usize,
    /// Candidates never reached because the budget ran out.
    pub remaining: usize,
    pub errors: ErrorLog,
}

pub struct BackfillJob<'a> {
    host: Collaborators<'a>,
    config: &'a FilesizeConfig,
    state: JobState,
}

impl<'a> BackfillJob<'a> {
    pub fn new(host: Collaborators<'a>, config: &'a FilesizeConfig) -> Self {
        Self {
            host,
            config,
            state: JobState::Idle,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn run(&mut self) -> Result<BackfillReport, FilesizeError> {
        self.state = JobState::Running;
        let started_at = self.host.clock.now();
        let budget = self.config.budget();

        let finder = ItemFinder::new(self.host.catalog, self.host.cache, self.config);
        let attributes = DerivedAttributeStore::new(self.host.attributes);
        let probe = SizeProbe::new(self.host.catalog, self.host.files);

        let candidates = finder.find_missing()?;
        finder.record_missing_count(candidates.len() as u64, started_at)?;

        let mut report = BackfillReport {
            state: JobState::Completed,
            started_at,
            finished_at: started_at,
            candidates: candidates.len(),
            written: 0,
            skipped_existing: 0,
            remaining: 0,
            errors: ErrorLog::default(),
        };

        if candidates.is_empty() {
            debug!("backfill found no candidates");
            self.state = JobState::Completed;
            return Ok(report);
        }

        info!(
            candidates = candidates.len(),
            budget_secs = self.config.budget_secs,
            "backfill started"
        );

        for (index, id) in candidates.iter().copied().enumerate() {
            if self.host.clock.now() - started_at > budget {
                report.state = JobState::BudgetExceeded;
                report.remaining = candidates.len() - index;
                break;
            }

            if attributes.has(id)? {
                report.skipped_existing += 1;
                continue;
            }

            match probe.probe(id)? {
                Probe::Found { bytes, source } => {
                    attributes.set(id, bytes)?;
                    report.written += 1;
                    debug!(item = %id, bytes, ?source, "file size stored");
                }
                Probe::NotFound { reason } => {
                    warn!(item = %id, %reason, "file not found");
                    report.errors.push(id, ItemErrorKind::NotFound, reason);
                }
            }
        }

        report.finished_at = self.host.clock.now();
        self.state = report.state;
        info!(
            state = ?report.state,
            written = report.written,
            skipped = report.skipped_existing,
            not_found = report.errors.len(),
            remaining = report.remaining,
            "backfill finished"
        );
        Ok(report)
    }
}
