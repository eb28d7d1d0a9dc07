use chrono::{DateTime, Duration, Utc};
use msf_core::{
    FilesizeConfig, HostError, ItemCatalog, ItemFilter, ItemId, TransientCache, COUNT_TRANSIENT,
    META_KEY, MISSING_LIST_CACHE_PREFIX,
};
use serde_json::Value;
use tracing::debug;

/// Finds items that still lack the file size attribute.
///
/// Two caches sit beside the live query and are never invalidated on write:
/// a short-lived candidate list, and a long-lived missing count that only
/// feeds progress display and may lag behind the live list.
#[derive(Clone, Copy)]
pub struct ItemFinder<'a> {
    catalog: &'a dyn ItemCatalog,
    cache: &'a dyn TransientCache,
    config: &'a FilesizeConfig,
}

impl<'a> ItemFinder<'a> {
    pub fn new(
        catalog: &'a dyn ItemCatalog,
        cache: &'a dyn TransientCache,
        config: &'a FilesizeConfig,
    ) -> Self {
        Self {
            catalog,
            cache,
            config,
        }
    }

    pub fn missing_filter(&self) -> ItemFilter {
        ItemFilter::missing(
            self.config.item_kind.clone(),
            self.config.active_status,
            META_KEY,
        )
    }

    pub fn find(&self, filter: &ItemFilter) -> Result<Vec<ItemId>, HostError> {
        self.catalog.find_ids(filter)
    }

    /// Live query, always reflecting the latest attribute writes.
    pub fn find_missing(&self) -> Result<Vec<ItemId>, HostError> {
        self.find(&self.missing_filter())
    }

    pub fn find_missing_cached(&self, now: DateTime<Utc>) -> Result<Vec<ItemId>, HostError> {
        let key = self.list_cache_key();
        if let Some(ids) = self
            .cache
            .get_cached(&key, now)?
            .and_then(|value| decode_ids(&value))
        {
            debug!(key = %key, count = ids.len(), "missing list served from cache");
            return Ok(ids);
        }

        let ids = self.find_missing()?;
        let encoded = Value::from(ids.iter().map(|id| id.get()).collect::<Vec<_>>());
        self.cache
            .set_cached(&key, &encoded, expiry(now, self.config.list_cache_ttl())?)?;
        Ok(ids)
    }

    /// Last recorded missing count. Display only.
    pub fn count_missing(&self, now: DateTime<Utc>) -> Result<Option<u64>, HostError> {
        Ok(self
            .cache
            .get_cached(COUNT_TRANSIENT, now)?
            .and_then(|value| value.as_u64()))
    }

    pub fn record_missing_count(&self, count: u64, now: DateTime<Utc>) -> Result<(), HostError> {
        self.cache.set_cached(
            COUNT_TRANSIENT,
            &Value::from(count),
            expiry(now, self.config.count_ttl())?,
        )
    }

    pub fn refresh_missing_count(&self, now: DateTime<Utc>) -> Result<u64, HostError> {
        let count = self.find_missing()?.len() as u64;
        self.record_missing_count(count, now)?;
        Ok(count)
    }

    pub fn total_active(&self) -> Result<u64, HostError> {
        self.catalog
            .count_items(&self.config.item_kind, self.config.active_status)
    }

    fn list_cache_key(&self) -> String {
        format!(
            "{MISSING_LIST_CACHE_PREFIX}:{}:{}",
            self.config.item_kind, self.config.active_status
        )
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, HostError> {
    now.checked_add_signed(ttl).ok_or_else(|| {
        HostError::new(
            "cache_expiry",
            format!("{now} plus {}s is out of range", ttl.num_seconds()),
        )
    })
}

fn decode_ids(value: &Value) -> Option<Vec<ItemId>> {
    value
        .as_array()?
        .iter()
        .map(|entry| entry.as_i64().map(ItemId))
        .collect()
}
