use msf_core::{ByteCount, FileResolver, HostError, ItemCatalog, ItemId};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeSource {
    /// The host already recorded the size in the attachment metadata.
    Metadata,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "probe", rename_all = "snake_case")]
pub enum Probe {
    Found { bytes: ByteCount, source: SizeSource },
    NotFound { reason: String },
}

impl Probe {
    pub fn bytes(&self) -> Option<ByteCount> {
        match self {
            Probe::Found { bytes, .. } => Some(*bytes),
            Probe::NotFound { .. } => None,
        }
    }
}

/// Reads an item's byte size. Never writes anything.
#[derive(Clone, Copy)]
pub struct SizeProbe<'a> {
    catalog: &'a dyn ItemCatalog,
    files: &'a dyn FileResolver,
}

impl<'a> SizeProbe<'a> {
    pub fn new(catalog: &'a dyn ItemCatalog, files: &'a dyn FileResolver) -> Self {
        Self { catalog, files }
    }

    /// Prefers the size the host stored in the item metadata, then the file on disk.
    pub fn probe(&self, id: ItemId) -> Result<Probe, HostError> {
        if let Some(bytes) = self
            .catalog
            .attachment_metadata(id)?
            .and_then(|metadata| metadata.filesize)
        {
            return Ok(Probe::Found {
                bytes,
                source: SizeSource::Metadata,
            });
        }
        self.probe_file(id)
    }

    /// Physical size only, ignoring any size recorded in metadata.
    pub fn probe_file(&self, id: ItemId) -> Result<Probe, HostError> {
        let Some(path) = self.files.resolve_physical_path(id)? else {
            return Ok(Probe::NotFound {
                reason: format!("item {id} has no attached file"),
            });
        };

        match self.files.read_byte_size(&path) {
            Ok(bytes) => Ok(Probe::Found {
                bytes,
                source: SizeSource::File,
            }),
            Err(err) => Ok(Probe::NotFound {
                reason: format!("{}: {err}", path.display()),
            }),
        }
    }

    /// Generated intermediate sizes added together, plus the pre-scaling original
    /// image when one was kept next to the attached file.
    pub fn intermediate_total(&self, id: ItemId) -> Result<ByteCount, HostError> {
        let Some(metadata) = self.catalog.attachment_metadata(id)? else {
            return Ok(0);
        };

        let mut total = metadata.intermediate_total();
        if let Some(original) = metadata.original_image.as_deref() {
            if let Some(path) = self.original_image_path(id, original)? {
                if let Ok(bytes) = self.files.read_byte_size(&path) {
                    total = total.saturating_add(bytes);
                }
            }
        }
        Ok(total)
    }

    fn original_image_path(&self, id: ItemId, original: &str) -> Result<Option<PathBuf>, HostError> {
        let Some(attached) = self.files.resolve_physical_path(id)? else {
            return Ok(None);
        };
        Ok(attached.parent().map(|dir| dir.join(original)))
    }
}
