//! Collaborator interfaces the backfill core consumes.
//!
//! The host (content store, metadata tables, cache, cron) is never reimplemented
//! here; it is reached only through these traits. Every method reports host
//! failures as [`HostError`] and the core propagates them untouched.

use crate::{AttachmentMetadata, ItemId, ItemStatus};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::cell::Cell;
use std::error::Error as StdError;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("host operation {operation} failed: {source}")]
pub struct HostError {
    pub operation: &'static str,
    #[source]
    pub source: Box<dyn StdError + Send + Sync + 'static>,
}

impl HostError {
    pub fn new(
        operation: &'static str,
        source: impl Into<Box<dyn StdError + Send + Sync + 'static>>,
    ) -> Self {
        Self {
            operation,
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFilter {
    pub kind: String,
    pub status: ItemStatus,
    /// Only return items that carry no value at all under this attribute key.
    pub missing_attribute: Option<String>,
}

impl ItemFilter {
    pub fn missing(kind: impl Into<String>, status: ItemStatus, key: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            status,
            missing_attribute: Some(key.into()),
        }
    }
}

pub trait ItemCatalog {
    /// Identifiers matching `filter`, in stable identifier order.
    fn find_ids(&self, filter: &ItemFilter) -> Result<Vec<ItemId>, HostError>;

    fn count_items(&self, kind: &str, status: ItemStatus) -> Result<u64, HostError>;

    fn attachment_metadata(&self, id: ItemId) -> Result<Option<AttachmentMetadata>, HostError>;
}

pub trait AttributeStore {
    fn get_attribute(&self, id: ItemId, key: &str) -> Result<Option<String>, HostError>;

    /// Upsert; last write wins.
    fn set_attribute(&self, id: ItemId, key: &str, value: &str) -> Result<(), HostError>;
}

pub trait FileResolver {
    fn resolve_physical_path(&self, id: ItemId) -> Result<Option<PathBuf>, HostError>;

    /// Fails when the file is missing or unreadable.
    fn read_byte_size(&self, path: &Path) -> std::io::Result<u64>;
}

pub trait TransientCache {
    /// Expired entries read as a miss.
    fn get_cached(&self, key: &str, now: DateTime<Utc>) -> Result<Option<Value>, HostError>;

    fn set_cached(
        &self,
        key: &str,
        value: &Value,
        expires_at: DateTime<Utc>,
    ) -> Result<(), HostError>;
}

pub trait TicketStore {
    /// Earliest pending run time for `hook`, if any ticket is pending.
    fn next_scheduled(&self, hook: &str) -> Result<Option<DateTime<Utc>>, HostError>;

    fn schedule_once(&self, hook: &str, run_at: DateTime<Utc>) -> Result<(), HostError>;

    /// Removes every ticket due at `now` and returns their hooks in run order.
    fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<String>, HostError>;

    fn is_pending(&self, hook: &str) -> Result<bool, HostError> {
        Ok(self.next_scheduled(hook)?.is_some())
    }
}

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock under caller control. Each reading advances it by `step`, which lets
/// a test model work that takes time without sleeping.
#[derive(Debug)]
pub struct ManualClock {
    current: Cell<DateTime<Utc>>,
    step: Duration,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self::stepping(start, Duration::zero())
    }

    pub fn stepping(start: DateTime<Utc>, step: Duration) -> Self {
        Self {
            current: Cell::new(start),
            step,
        }
    }

    pub fn advance(&self, by: Duration) {
        self.current.set(self.current.get() + by);
    }

    pub fn peek(&self) -> DateTime<Utc> {
        self.current.get()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let now = self.current.get();
        self.current.set(now + self.step);
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn stepping_clock_advances_after_each_reading() {
        let clock = ManualClock::stepping(ts(), Duration::seconds(25));
        assert_eq!(clock.now(), ts());
        assert_eq!(clock.now(), ts() + Duration::seconds(25));
        clock.advance(Duration::seconds(10));
        assert_eq!(clock.peek(), ts() + Duration::seconds(60));
    }

    #[test]
    fn host_error_names_the_operation() {
        let err = HostError::new("find_ids", "disk on fire");
        assert_eq!(err.to_string(), "host operation find_ids failed: disk on fire");
    }
}
