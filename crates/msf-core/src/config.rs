use crate::{
    ItemStatus, ATTACHMENT_KIND, DEFAULT_BUDGET_SECS, DEFAULT_COUNT_TTL_SECS,
    DEFAULT_LIST_CACHE_TTL_SECS,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound for every configured duration: ten years.
pub const MAX_CONFIG_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} = {value} exceeds the maximum of {max} seconds")]
pub struct ConfigError {
    pub field: &'static str,
    pub value: u64,
    pub max: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesizeConfig {
    pub item_kind: String,
    pub active_status: ItemStatus,
    /// Wall-clock ceiling for one backfill invocation.
    pub budget_secs: u64,
    pub list_cache_ttl_secs: u64,
    /// Lifetime of the display-only missing count snapshot.
    pub count_ttl_secs: u64,
}

impl Default for FilesizeConfig {
    fn default() -> Self {
        Self {
            item_kind: ATTACHMENT_KIND.to_string(),
            active_status: ItemStatus::Inherit,
            budget_secs: DEFAULT_BUDGET_SECS,
            list_cache_ttl_secs: DEFAULT_LIST_CACHE_TTL_SECS,
            count_ttl_secs: DEFAULT_COUNT_TTL_SECS,
        }
    }
}

impl FilesizeConfig {
    pub fn budget(&self) -> Duration {
        secs(self.budget_secs)
    }

    pub fn list_cache_ttl(&self) -> Duration {
        secs(self.list_cache_ttl_secs)
    }

    pub fn count_ttl(&self) -> Duration {
        secs(self.count_ttl_secs)
    }

    /// Rejects durations past [`MAX_CONFIG_SECS`]. The accessors clamp to the
    /// same bound, so an unvalidated config still cannot overflow a timestamp.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("budget_secs", self.budget_secs),
            ("list_cache_ttl_secs", self.list_cache_ttl_secs),
            ("count_ttl_secs", self.count_ttl_secs),
        ] {
            if value > MAX_CONFIG_SECS {
                return Err(ConfigError {
                    field,
                    value,
                    max: MAX_CONFIG_SECS,
                });
            }
        }
        Ok(())
    }
}

fn secs(value: u64) -> Duration {
    Duration::seconds(value.min(MAX_CONFIG_SECS) as i64)
}
