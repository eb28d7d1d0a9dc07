use msf_core::{size_format, ByteCount, ItemId};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "bytes", rename_all = "snake_case")]
pub enum CellSize {
    Stored(ByteCount),
    /// The attribute is missing; the size came straight from metadata or disk.
    Fallback(ByteCount),
    NotFound,
}

/// What the list table shows for one item in the file size column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnCell {
    pub item_id: ItemId,
    pub size: CellSize,
    /// Only reported alongside a stored size.
    pub intermediate_bytes: ByteCount,
}

impl ColumnCell {
    pub fn size_text(&self) -> String {
        match self.size {
            CellSize::Stored(bytes) | CellSize::Fallback(bytes) => size_format(bytes, 0),
            CellSize::NotFound => "File not found".to_string(),
        }
    }

    pub fn intermediate_text(&self) -> Option<String> {
        (self.intermediate_bytes > 0).then(|| format!("+ {}", size_format(self.intermediate_bytes, 0)))
    }

    pub fn needs_index(&self) -> bool {
        !matches!(self.size, CellSize::Stored(_))
    }
}
