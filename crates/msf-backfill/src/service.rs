use crate::column::{CellSize, ColumnCell};
use crate::job::{BackfillJob, BackfillReport};
use crate::probe::Probe;
use crate::scheduler::{JobHook, ScheduleOutcome};
use crate::{
    Collaborators, DerivedAttributeStore, FilesizeError, ItemFinder, JobScheduler, SizeProbe,
};
use msf_core::{ByteCount, FilesizeConfig, ItemId, ATTACHMENT_METADATA_KEY};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub total: u64,
    /// Last recorded missing count; may be stale.
    pub missing_estimate: Option<u64>,
    pub completed_estimate: Option<u64>,
    /// Set when no count was recorded and a refresh had to be requested.
    pub recount: Option<ScheduleOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecomputeOutcome {
    Stored { bytes: ByteCount },
    NotFound { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    pub stored: Vec<(ItemId, ByteCount)>,
    pub skipped: Vec<ItemId>,
    pub recount: ScheduleOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "hook", rename_all = "snake_case")]
pub enum Dispatch {
    Backfill(BackfillReport),
    Recount { missing: u64 },
    Ignored { name: String },
}

/// Entry points used by the list table, bulk action and cron layers.
pub struct MediaFilesize<'a> {
    host: Collaborators<'a>,
    config: FilesizeConfig,
}

impl<'a> MediaFilesize<'a> {
    pub fn new(host: Collaborators<'a>, config: FilesizeConfig) -> Self {
        Self { host, config }
    }

    pub fn config(&self) -> &FilesizeConfig {
        &self.config
    }

    pub fn probe(&self) -> SizeProbe<'a> {
        SizeProbe::new(self.host.catalog, self.host.files)
    }

    pub fn attributes(&self) -> DerivedAttributeStore<'a> {
        DerivedAttributeStore::new(self.host.attributes)
    }

    pub fn finder(&self) -> ItemFinder<'_> {
        ItemFinder::new(self.host.catalog, self.host.cache, &self.config)
    }

    pub fn scheduler(&self) -> JobScheduler<'a> {
        JobScheduler::new(self.host.tickets, self.host.clock)
    }

    /// Manual "index now". Does nothing when a backfill is already pending.
    pub fn trigger_backfill_now(&self) -> Result<ScheduleOutcome, FilesizeError> {
        let outcome = self.scheduler().schedule_backfill()?;
        info!(?outcome, "backfill requested");
        Ok(outcome)
    }

    pub fn run_backfill(&self) -> Result<BackfillReport, FilesizeError> {
        BackfillJob::new(self.host, &self.config).run()
    }

    pub fn refresh_missing_count(&self) -> Result<u64, FilesizeError> {
        let missing = self.finder().refresh_missing_count(self.host.clock.now())?;
        info!(missing, "missing count refreshed");
        Ok(missing)
    }

    pub fn missing_items(&self, cached: bool) -> Result<Vec<ItemId>, FilesizeError> {
        let finder = self.finder();
        let ids = if cached {
            finder.find_missing_cached(self.host.clock.now())?
        } else {
            finder.find_missing()?
        };
        Ok(ids)
    }

    pub fn progress_snapshot(&self) -> Result<ProgressSnapshot, FilesizeError> {
        let finder = self.finder();
        let total = finder.total_active()?;
        let missing_estimate = finder.count_missing(self.host.clock.now())?;

        let recount = match missing_estimate {
            Some(_) => None,
            None => Some(self.scheduler().schedule_recount()?),
        };

        Ok(ProgressSnapshot {
            total,
            missing_estimate,
            completed_estimate: missing_estimate.map(|missing| total.saturating_sub(missing)),
            recount,
        })
    }

    /// Re-reads the attached file and overwrites the stored size.
    pub fn recompute_single(&self, id: ItemId) -> Result<RecomputeOutcome, FilesizeError> {
        match self.probe().probe_file(id)? {
            Probe::Found { bytes, .. } => {
                self.attributes().set(id, bytes)?;
                debug!(item = %id, bytes, "file size recomputed");
                Ok(RecomputeOutcome::Stored { bytes })
            }
            Probe::NotFound { reason } => {
                debug!(item = %id, %reason, "recompute skipped");
                Ok(RecomputeOutcome::NotFound { reason })
            }
        }
    }

    /// Metadata write hook: a freshly written attachment metadata blob means a new
    /// upload, so its size is stored right away.
    pub fn on_metadata_added(
        &self,
        id: ItemId,
        meta_key: &str,
    ) -> Result<Option<RecomputeOutcome>, FilesizeError> {
        if meta_key != ATTACHMENT_METADATA_KEY {
            return Ok(None);
        }
        self.recompute_single(id).map(Some)
    }

    pub fn bulk_generate(&self, ids: &[ItemId]) -> Result<BulkReport, FilesizeError> {
        let mut stored = Vec::new();
        let mut skipped = Vec::new();
        for &id in ids {
            match self.recompute_single(id)? {
                RecomputeOutcome::Stored { bytes } => stored.push((id, bytes)),
                RecomputeOutcome::NotFound { .. } => skipped.push(id),
            }
        }

        let recount = self.scheduler().schedule_recount()?;
        info!(
            stored = stored.len(),
            skipped = skipped.len(),
            "bulk file size generation done"
        );
        Ok(BulkReport {
            stored,
            skipped,
            recount,
        })
    }

    pub fn column_cell(&self, id: ItemId) -> Result<ColumnCell, FilesizeError> {
        if let Some(bytes) = self.attributes().get(id)? {
            return Ok(ColumnCell {
                item_id: id,
                size: CellSize::Stored(bytes),
                intermediate_bytes: self.probe().intermediate_total(id)?,
            });
        }

        let size = match self.probe().probe(id)? {
            Probe::Found { bytes, .. } => CellSize::Fallback(bytes),
            Probe::NotFound { .. } => CellSize::NotFound,
        };
        Ok(ColumnCell {
            item_id: id,
            size,
            intermediate_bytes: 0,
        })
    }

    /// Runs every job whose ticket has come due. When one fails, it and the
    /// hooks behind it are rescheduled before the error is returned.
    pub fn run_due(&self) -> Result<Vec<Dispatch>, FilesizeError> {
        let scheduler = self.scheduler();
        let hooks = scheduler.take_due()?;
        let mut dispatched = Vec::with_capacity(hooks.len());
        for (index, hook) in hooks.iter().enumerate() {
            match self.dispatch(hook) {
                Ok(dispatch) => dispatched.push(dispatch),
                Err(err) => {
                    for pending in &hooks[index..] {
                        if let Err(requeue) = scheduler.trigger_now(pending) {
                            warn!(hook = pending.as_str(), %requeue, "failed to reschedule hook");
                        }
                    }
                    warn!(hook = hook.as_str(), %err, "scheduled hook failed, rescheduled");
                    return Err(err);
                }
            }
        }
        Ok(dispatched)
    }

    fn dispatch(&self, hook: &JobHook) -> Result<Dispatch, FilesizeError> {
        Ok(match hook {
            JobHook::UpdateMeta => Dispatch::Backfill(self.run_backfill()?),
            JobHook::UpdateCount => Dispatch::Recount {
                missing: self.refresh_missing_count()?,
            },
            JobHook::Other(name) => {
                warn!(hook = %name, "no handler for scheduled hook");
                Dispatch::Ignored { name: name.clone() }
            }
        })
    }
}
