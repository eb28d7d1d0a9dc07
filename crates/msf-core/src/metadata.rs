use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The subset of a host attachment metadata blob this crate depends on.
///
/// Hosts hand us arbitrary associative payloads. [`AttachmentMetadata::from_value`]
/// narrows them: anything that is not the expected shape is dropped rather than
/// rejected, so a malformed blob degrades to "no precomputed size".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sizes: BTreeMap<String, IntermediateSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_image: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntermediateSize {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
}

impl AttachmentMetadata {
    pub fn from_value(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default();
        };

        let filesize = object.get("filesize").and_then(Value::as_u64);

        let sizes = object
            .get("sizes")
            .and_then(Value::as_object)
            .map(|sizes| {
                sizes
                    .iter()
                    .filter(|(_, entry)| entry.is_object())
                    .map(|(name, entry)| {
                        (
                            name.clone(),
                            IntermediateSize {
                                filesize: entry.get("filesize").and_then(Value::as_u64),
                            },
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        let original_image = object
            .get("original_image")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        Self {
            filesize,
            sizes,
            original_image,
        }
    }

    pub fn from_json(raw: &str) -> Self {
        serde_json::from_str::<Value>(raw)
            .map(|value| Self::from_value(&value))
            .unwrap_or_default()
    }

    /// Sum of every generated intermediate size that reports its own byte count.
    pub fn intermediate_total(&self) -> u64 {
        self.sizes
            .values()
            .filter_map(|size| size.filesize)
            .fold(0u64, u64::saturating_add)
    }
}
