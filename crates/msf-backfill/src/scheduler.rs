use chrono::{DateTime, Duration, Utc};
use msf_core::{Clock, HostError, TicketStore, HOOK_UPDATE_COUNT, HOOK_UPDATE_META};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScheduleOutcome {
    Scheduled { run_at: DateTime<Utc> },
    AlreadyPending { run_at: DateTime<Utc> },
}

impl ScheduleOutcome {
    pub fn run_at(&self) -> DateTime<Utc> {
        match self {
            ScheduleOutcome::Scheduled { run_at } | ScheduleOutcome::AlreadyPending { run_at } => {
                *run_at
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobHook {
    UpdateMeta,
    UpdateCount,
    Other(String),
}

impl JobHook {
    pub fn parse(hook: &str) -> Self {
        match hook {
            HOOK_UPDATE_META => JobHook::UpdateMeta,
            HOOK_UPDATE_COUNT => JobHook::UpdateCount,
            other => JobHook::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobHook::UpdateMeta => HOOK_UPDATE_META,
            JobHook::UpdateCount => HOOK_UPDATE_COUNT,
            JobHook::Other(hook) => hook,
        }
    }
}

/// One-shot scheduling with at most one pending ticket per hook.
///
/// The pending check and the insert are not atomic. Two racing callers may both
/// schedule; the duplicate run is harmless because the jobs are idempotent.
#[derive(Clone, Copy)]
pub struct JobScheduler<'a> {
    tickets: &'a dyn TicketStore,
    clock: &'a dyn Clock,
}

impl<'a> JobScheduler<'a> {
    pub fn new(tickets: &'a dyn TicketStore, clock: &'a dyn Clock) -> Self {
        Self { tickets, clock }
    }

    pub fn schedule_if_absent(
        &self,
        hook: &JobHook,
        delay: Duration,
    ) -> Result<ScheduleOutcome, HostError> {
        if let Some(run_at) = self.tickets.next_scheduled(hook.as_str())? {
            debug!(hook = hook.as_str(), %run_at, "ticket already pending");
            return Ok(ScheduleOutcome::AlreadyPending { run_at });
        }

        let run_at = self.clock.now() + delay;
        self.tickets.schedule_once(hook.as_str(), run_at)?;
        debug!(hook = hook.as_str(), %run_at, "ticket scheduled");
        Ok(ScheduleOutcome::Scheduled { run_at })
    }

    pub fn trigger_now(&self, hook: &JobHook) -> Result<ScheduleOutcome, HostError> {
        self.schedule_if_absent(hook, Duration::zero())
    }

    pub fn schedule_backfill(&self) -> Result<ScheduleOutcome, HostError> {
        self.trigger_now(&JobHook::UpdateMeta)
    }

    /// Refreshes the display-only missing count out of band.
    pub fn schedule_recount(&self) -> Result<ScheduleOutcome, HostError> {
        self.trigger_now(&JobHook::UpdateCount)
    }

    /// Consumes due tickets. A hook due more than once is returned once.
    pub fn take_due(&self) -> Result<Vec<JobHook>, HostError> {
        let mut hooks: Vec<JobHook> = Vec::new();
        for hook in self.tickets.take_due(self.clock.now())? {
            let hook = JobHook::parse(&hook);
            if !hooks.contains(&hook) {
                hooks.push(hook);
            }
        }
        Ok(hooks)
    }
}
