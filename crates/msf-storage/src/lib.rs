use chrono::{DateTime, SecondsFormat, Utc};
use msf_core::{
    AttachmentMetadata, AttributeStore, FileResolver, HostError, ItemCatalog, ItemFilter, ItemId,
    ItemStatus, SortOrder, TicketStore, TransientCache,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const LIBRARY_SCHEMA_VERSION: i64 = 2;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub kind: String,
    pub status: ItemStatus,
    pub file_path: Option<String>,
    pub metadata: Option<Value>,
}

impl NewItem {
    pub fn attachment(file_path: impl Into<String>) -> Self {
        Self {
            kind: msf_core::ATTACHMENT_KIND.to_string(),
            status: ItemStatus::Inherit,
            file_path: Some(file_path.into()),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_status(mut self, status: ItemStatus) -> Self {
        self.status = status;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    pub id: ItemId,
    pub kind: String,
    pub status: ItemStatus,
    pub file_path: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Whether a metadata write was the item's first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataWrite {
    Added,
    Replaced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEvent {
    pub event_id: i64,
    pub hook: String,
    pub run_at: DateTime<Utc>,
}

/// Reference host: item catalog, per-item metadata, transients and scheduled
/// events in one SQLite database, with attached files resolved on local disk.
pub struct LibraryStore {
    conn: Connection,
    uploads_root: Option<PathBuf>,
}

impl LibraryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn,
            uploads_root: None,
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn,
            uploads_root: None,
        };
        store.migrate()?;
        Ok(store)
    }

    /// Relative attachment paths resolve against `root`.
    pub fn with_uploads_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.uploads_root = Some(root.into());
        self
    }

    pub fn uploads_root(&self) -> Option<&Path> {
        self.uploads_root.as_deref()
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub fn migrate(&self) -> Result<(), StorageError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let mut current = self.schema_version()?;
        if current > LIBRARY_SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchemaVersion {
                found: current,
                supported: LIBRARY_SCHEMA_VERSION,
            });
        }

        if current < 1 {
            let sql = include_str!("../migrations/0001_library_schema.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 1", [])
                .map(|_| ())?;
            current = 1;
        }

        if current < 2 {
            let sql = include_str!("../migrations/0002_transients_and_events.sql");
            self.conn.execute_batch(sql)?;
            self.conn
                .execute("PRAGMA user_version = 2", [])
                .map(|_| ())?;
        }

        Ok(())
    }

    pub fn insert_item(&self, item: &NewItem, now: DateTime<Utc>) -> Result<ItemId, StorageError> {
        let metadata_json = item
            .metadata
            .as_ref()
            .map(|metadata| {
                serde_json::to_string(metadata)
                    .map_err(|err| StorageError::Serialization(err.to_string()))
            })
            .transpose()?;

        self.conn.execute(
            "
            INSERT INTO items (kind, status, file_path, metadata_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                item.kind,
                item.status.as_str(),
                item.file_path,
                metadata_json,
                format_timestamp(now),
            ],
        )?;

        Ok(ItemId(self.conn.last_insert_rowid()))
    }

    pub fn item(&self, id: ItemId) -> Result<Option<StoredItem>, StorageError> {
        let row = self
            .conn
            .query_row(
                "
                SELECT id, kind, status, file_path, metadata_json, created_at
                FROM items
                WHERE id = ?1
                ",
                [id.get()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, kind, status, file_path, metadata_json, created_at)) = row else {
            return Ok(None);
        };

        let status = status
            .parse::<ItemStatus>()
            .map_err(StorageError::Serialization)?;
        let metadata = metadata_json
            .map(|raw| {
                serde_json::from_str::<Value>(&raw)
                    .map_err(|err| StorageError::Serialization(err.to_string()))
            })
            .transpose()?;

        Ok(Some(StoredItem {
            id: ItemId(id),
            kind,
            status,
            file_path,
            metadata,
            created_at: parse_timestamp(created_at)?,
        }))
    }

    /// Writes an item's attachment metadata. `None` when the item does not exist.
    pub fn set_item_metadata(
        &self,
        id: ItemId,
        metadata: &Value,
    ) -> Result<Option<MetadataWrite>, StorageError> {
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        let tx = self.conn.unchecked_transaction()?;
        let previous = tx
            .query_row(
                "SELECT metadata_json FROM items WHERE id = ?1",
                [id.get()],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        let Some(previous) = previous else {
            return Ok(None);
        };
        tx.execute(
            "UPDATE items SET metadata_json = ?2 WHERE id = ?1",
            params![id.get(), metadata_json],
        )?;
        tx.commit()?;

        Ok(Some(if previous.is_some() {
            MetadataWrite::Replaced
        } else {
            MetadataWrite::Added
        }))
    }

    pub fn delete_meta(&self, id: ItemId, key: &str) -> Result<bool, StorageError> {
        let changes = self.conn.execute(
            "DELETE FROM item_meta WHERE item_id = ?1 AND meta_key = ?2",
            params![id.get(), key],
        )?;
        Ok(changes > 0)
    }

    /// Items carrying `key`, ordered by its numeric value. Items without the key
    /// are left out, the way a numeric meta-value ordering behaves.
    pub fn items_by_meta_value(
        &self,
        kind: &str,
        status: ItemStatus,
        key: &str,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<(ItemId, i64)>, StorageError> {
        let direction = order.as_sql();
        let sql = format!(
            "
            SELECT i.id, CAST(m.meta_value AS INTEGER) AS value_num
            FROM items i
            JOIN item_meta m ON m.item_id = i.id AND m.meta_key = ?3
            WHERE i.kind = ?1 AND i.status = ?2
            ORDER BY value_num {direction}, i.id {direction}
            LIMIT ?4
            "
        );
        let limit = limit.map(|limit| limit as i64).unwrap_or(-1);

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![kind, status.as_str(), key, limit], |row| {
            Ok((ItemId(row.get(0)?), row.get(1)?))
        })?;

        let mut ordered = Vec::new();
        for row in rows {
            ordered.push(row?);
        }
        Ok(ordered)
    }

    pub fn scheduled_events(&self) -> Result<Vec<ScheduledEvent>, StorageError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT event_id, hook, run_at
            FROM scheduled_events
            ORDER BY run_at ASC, event_id ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (event_id, hook, run_at) = row?;
            events.push(ScheduledEvent {
                event_id,
                hook,
                run_at: parse_timestamp(run_at)?,
            });
        }
        Ok(events)
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table_name],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        Ok(exists)
    }

    fn find_ids_inner(&self, filter: &ItemFilter) -> Result<Vec<ItemId>, StorageError> {
        let mut ids = Vec::new();
        match &filter.missing_attribute {
            Some(key) => {
                let mut stmt = self.conn.prepare(
                    "
                    SELECT i.id
                    FROM items i
                    WHERE i.kind = ?1 AND i.status = ?2
                      AND NOT EXISTS (
                          SELECT 1 FROM item_meta m
                          WHERE m.item_id = i.id AND m.meta_key = ?3
                      )
                    ORDER BY i.id ASC
                    ",
                )?;
                let rows = stmt.query_map(
                    params![filter.kind, filter.status.as_str(), key],
                    |row| row.get::<_, i64>(0),
                )?;
                for row in rows {
                    ids.push(ItemId(row?));
                }
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "
                    SELECT id FROM items
                    WHERE kind = ?1 AND status = ?2
                    ORDER BY id ASC
                    ",
                )?;
                let rows = stmt.query_map(params![filter.kind, filter.status.as_str()], |row| {
                    row.get::<_, i64>(0)
                })?;
                for row in rows {
                    ids.push(ItemId(row?));
                }
            }
        }
        Ok(ids)
    }

    fn count_items_inner(&self, kind: &str, status: ItemStatus) -> Result<u64, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM items WHERE kind = ?1 AND status = ?2",
            params![kind, status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn metadata_json(&self, id: ItemId) -> Result<Option<String>, StorageError> {
        let raw = self
            .conn
            .query_row(
                "SELECT metadata_json FROM items WHERE id = ?1",
                [id.get()],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(raw.flatten())
    }

    fn file_path(&self, id: ItemId) -> Result<Option<String>, StorageError> {
        let raw = self
            .conn
            .query_row(
                "SELECT file_path FROM items WHERE id = ?1",
                [id.get()],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(raw.flatten().filter(|path| !path.trim().is_empty()))
    }

    fn meta(&self, id: ItemId, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT meta_value FROM item_meta WHERE item_id = ?1 AND meta_key = ?2",
                params![id.get(), key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn upsert_meta(&self, id: ItemId, key: &str, value: &str) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO item_meta (item_id, meta_key, meta_value)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(item_id, meta_key) DO UPDATE SET
                meta_value=excluded.meta_value
            ",
            params![id.get(), key, value],
        )?;
        Ok(())
    }

    fn transient(&self, key: &str, now: DateTime<Utc>) -> Result<Option<Value>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT value_json, expires_at FROM transients WHERE cache_key = ?1",
                [key],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        let Some((value_json, expires_at)) = row else {
            return Ok(None);
        };
        if parse_timestamp(expires_at)? <= now {
            self.conn
                .execute("DELETE FROM transients WHERE cache_key = ?1", [key])?;
            return Ok(None);
        }

        let value = serde_json::from_str(&value_json)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        Ok(Some(value))
    }

    fn upsert_transient(
        &self,
        key: &str,
        value: &Value,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let value_json = serde_json::to_string(value)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        self.conn.execute(
            "
            INSERT INTO transients (cache_key, value_json, expires_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(cache_key) DO UPDATE SET
                value_json=excluded.value_json,
                expires_at=excluded.expires_at
            ",
            params![key, value_json, format_timestamp(expires_at)],
        )?;
        Ok(())
    }

    fn next_event(&self, hook: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        let run_at = self
            .conn
            .query_row(
                "
                SELECT run_at FROM scheduled_events
                WHERE hook = ?1
                ORDER BY run_at ASC, event_id ASC
                LIMIT 1
                ",
                [hook],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        run_at.map(parse_timestamp).transpose()
    }

    fn insert_event(&self, hook: &str, run_at: DateTime<Utc>) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO scheduled_events (hook, run_at) VALUES (?1, ?2)",
            params![hook, format_timestamp(run_at)],
        )?;
        Ok(())
    }

    fn take_due_events(&self, now: DateTime<Utc>) -> Result<Vec<String>, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let due = {
            let mut stmt = tx.prepare(
                "
                SELECT event_id, hook, run_at
                FROM scheduled_events
                ORDER BY run_at ASC, event_id ASC
                ",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;

            let mut due = Vec::new();
            for row in rows {
                let (event_id, hook, run_at) = row?;
                if parse_timestamp(run_at)? <= now {
                    due.push((event_id, hook));
                }
            }
            due
        };

        for (event_id, _) in &due {
            tx.execute(
                "DELETE FROM scheduled_events WHERE event_id = ?1",
                [event_id],
            )?;
        }
        tx.commit()?;

        Ok(due.into_iter().map(|(_, hook)| hook).collect())
    }
}

impl ItemCatalog for LibraryStore {
    fn find_ids(&self, filter: &ItemFilter) -> Result<Vec<ItemId>, HostError> {
        self.find_ids_inner(filter).map_err(host("find_ids"))
    }

    fn count_items(&self, kind: &str, status: ItemStatus) -> Result<u64, HostError> {
        self.count_items_inner(kind, status)
            .map_err(host("count_items"))
    }

    fn attachment_metadata(&self, id: ItemId) -> Result<Option<AttachmentMetadata>, HostError> {
        let raw = self.metadata_json(id).map_err(host("attachment_metadata"))?;
        Ok(raw.map(|raw| AttachmentMetadata::from_json(&raw)))
    }
}

impl AttributeStore for LibraryStore {
    fn get_attribute(&self, id: ItemId, key: &str) -> Result<Option<String>, HostError> {
        self.meta(id, key).map_err(host("get_attribute"))
    }

    fn set_attribute(&self, id: ItemId, key: &str, value: &str) -> Result<(), HostError> {
        self.upsert_meta(id, key, value)
            .map_err(host("set_attribute"))
    }
}

impl FileResolver for LibraryStore {
    fn resolve_physical_path(&self, id: ItemId) -> Result<Option<PathBuf>, HostError> {
        let path = self.file_path(id).map_err(host("resolve_physical_path"))?;
        Ok(path.map(|path| {
            let path = PathBuf::from(path);
            match &self.uploads_root {
                Some(root) if path.is_relative() => root.join(path),
                _ => path,
            }
        }))
    }

    fn read_byte_size(&self, path: &Path) -> io::Result<u64> {
        let file = File::open(path)?;
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        Ok(metadata.len())
    }
}

impl TransientCache for LibraryStore {
    fn get_cached(&self, key: &str, now: DateTime<Utc>) -> Result<Option<Value>, HostError> {
        self.transient(key, now).map_err(host("get_cached"))
    }

    fn set_cached(
        &self,
        key: &str,
        value: &Value,
        expires_at: DateTime<Utc>,
    ) -> Result<(), HostError> {
        self.upsert_transient(key, value, expires_at)
            .map_err(host("set_cached"))
    }
}

impl TicketStore for LibraryStore {
    fn next_scheduled(&self, hook: &str) -> Result<Option<DateTime<Utc>>, HostError> {
        self.next_event(hook).map_err(host("next_scheduled"))
    }

    fn schedule_once(&self, hook: &str, run_at: DateTime<Utc>) -> Result<(), HostError> {
        self.insert_event(hook, run_at)
            .map_err(host("schedule_once"))
    }

    fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<String>, HostError> {
        self.take_due_events(now).map_err(host("take_due"))
    }
}

fn host(operation: &'static str) -> impl FnOnce(StorageError) -> HostError {
    move |err| HostError::new(operation, err)
}

fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}
