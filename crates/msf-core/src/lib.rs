pub mod config;
pub mod format;
pub mod metadata;
pub mod ports;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use config::{ConfigError, FilesizeConfig, MAX_CONFIG_SECS};
pub use format::size_format;
pub use metadata::{AttachmentMetadata, IntermediateSize};
pub use ports::{
    AttributeStore, Clock, FileResolver, HostError, ItemCatalog, ItemFilter, ManualClock,
    SystemClock, TicketStore, TransientCache,
};

/// Per-item attribute key holding the derived byte size.
pub const META_KEY: &str = "_filesize";
/// Host metadata key whose first write marks a freshly uploaded attachment.
pub const ATTACHMENT_METADATA_KEY: &str = "_wp_attachment_metadata";
pub const ATTACHMENT_KIND: &str = "attachment";

pub const HOOK_UPDATE_META: &str = "wp_media_sortable_filesize_update_meta";
pub const HOOK_UPDATE_COUNT: &str = "wp_media_sortable_filesize_update_count";

pub const COUNT_TRANSIENT: &str = "wp_media_sortable_filesize_count";
pub const MISSING_LIST_CACHE_PREFIX: &str = "wp_media_sortable_filesize_missing";

pub const DEFAULT_BUDGET_SECS: u64 = 60;
pub const DEFAULT_LIST_CACHE_TTL_SECS: u64 = 5 * 60;
pub const DEFAULT_COUNT_TTL_SECS: u64 = 7 * 24 * 60 * 60;

pub type ByteCount = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub i64);

impl ItemId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        input
            .trim()
            .parse::<i64>()
            .map(ItemId)
            .map_err(|err| format!("invalid item id {input:?}: {err}"))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Inherit,
    Publish,
    Private,
    Draft,
    Trash,
}

impl Default for ItemStatus {
    fn default() -> Self {
        Self::Inherit
    }
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Inherit => "inherit",
            ItemStatus::Publish => "publish",
            ItemStatus::Private => "private",
            ItemStatus::Draft => "draft",
            ItemStatus::Trash => "trash",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "inherit" => Ok(ItemStatus::Inherit),
            "publish" | "published" => Ok(ItemStatus::Publish),
            "private" => Ok(ItemStatus::Private),
            "draft" => Ok(ItemStatus::Draft),
            "trash" | "trashed" => Ok(ItemStatus::Trash),
            other => Err(format!("Unknown status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("Unknown order: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_aliases_and_round_trips_display() {
        assert_eq!("Trashed".parse::<ItemStatus>(), Ok(ItemStatus::Trash));
        assert_eq!(" inherit ".parse::<ItemStatus>(), Ok(ItemStatus::Inherit));
        assert!("orphaned".parse::<ItemStatus>().is_err());
        assert_eq!(ItemStatus::Publish.to_string(), "publish");
    }

    #[test]
    fn item_id_parses_and_orders() {
        let a: ItemId = "12".parse().expect("id");
        let b: ItemId = "7".parse().expect("id");
        assert!(b < a);
        assert!("x1".parse::<ItemId>().is_err());
    }

    #[test]
    fn sort_order_defaults_to_descending() {
        assert_eq!(SortOrder::default(), SortOrder::Desc);
        assert_eq!("ASC".parse::<SortOrder>(), Ok(SortOrder::Asc));
    }
}
