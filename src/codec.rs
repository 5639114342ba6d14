//! Serialization codecs for backing resources.
//!
//! A [`Codec`] turns an in-memory [`Value`] into bytes and back. Codecs are
//! deliberately dumb: they know nothing about locks, layouts, or dirty
//! tracking. Malformed input fails with
//! [`CubbyError::Format`](crate::error::CubbyError::Format); a missing
//! backing file is not an error but the "absent" sentinel, surfaced as
//! `None` by [`read_resource`].

use crate::error::{CubbyError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Byte-level serialization for a single resource.
pub trait Codec: std::fmt::Debug + Send + Sync {
    /// File extension used for resources in this format (no leading dot).
    fn extension(&self) -> &'static str;

    /// Encode a value into bytes.
    fn encode(&self, value: &Value) -> Result<Vec<u8>>;

    /// Decode bytes into a value.
    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}

/// On-disk format selector for a registry or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    /// Pretty-printed JSON via serde_json (default).
    #[default]
    Json,
    /// YAML via serde_yaml.
    Yaml,
}

impl Format {
    /// Get the codec implementing this format.
    pub fn codec(self) -> Arc<dyn Codec> {
        match self {
            Format::Json => Arc::new(JsonCodec),
            Format::Yaml => Arc::new(YamlCodec),
        }
    }
}

/// JSON codec backed by serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn extension(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(value)
            .map_err(|e| CubbyError::Format(format!("failed to encode JSON: {}", e)))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        serde_json::from_slice(bytes)
            .map_err(|e| CubbyError::Format(format!("failed to decode JSON: {}", e)))
    }
}

/// YAML codec backed by serde_yaml.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlCodec;

impl Codec for YamlCodec {
    fn extension(&self) -> &'static str {
        "yaml"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        serde_yaml::to_string(value)
            .map(String::into_bytes)
            .map_err(|e| CubbyError::Format(format!("failed to encode YAML: {}", e)))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        serde_yaml::from_slice(bytes)
            .map_err(|e| CubbyError::Format(format!("failed to decode YAML: {}", e)))
    }
}

/// Read and decode a backing resource.
///
/// A missing file maps to `Ok(None)`; any other read failure is an I/O
/// error and malformed content is a format error.
pub fn read_resource(codec: &dyn Codec, path: &Path) -> Result<Option<Value>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(CubbyError::io(
                format!("failed to read '{}'", path.display()),
                e,
            ));
        }
    };
    codec.decode(&bytes).map(Some)
}
