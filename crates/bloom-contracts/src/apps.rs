use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Store key holding the catalog table (`id -> app record`).
pub const CATALOG_KEY: &str = "bloom_apps";
/// Store key holding the ordered list of discovered pipelines.
pub const PIPELINE_IDS_KEY: &str = "pipeline_ids";
/// Pipeline assigned to files that sit directly under the resource root.
pub const UNKNOWN_PIPELINE: &str = "unknown";

const DATA_URL_PREFIX: &str = "data:image/png;base64,";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloomApp {
    pub id: String,
    pub image: String,
    pub origin_pipeline: String,
}

impl BloomApp {
    /// Builds a catalog record whose id is the content address of `bytes`.
    pub fn from_image_bytes(bytes: &[u8], origin_pipeline: impl Into<String>) -> Self {
        Self {
            id: content_address(bytes),
            image: image_data_url(bytes),
            origin_pipeline: origin_pipeline.into(),
        }
    }

    /// Reads a catalog row. Only JSON objects qualify.
    pub fn from_value(value: &Value) -> Option<Self> {
        let row = value.as_object()?;
        serde_json::from_value(Value::Object(row.clone())).ok()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn to_public(&self) -> PublicApp {
        PublicApp {
            id: self.id.clone(),
            image: self.image.clone(),
        }
    }
}

/// App shape handed to HTTP callers; the pipeline stays server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicApp {
    pub id: String,
    pub image: String,
}

impl From<BloomApp> for PublicApp {
    fn from(app: BloomApp) -> Self {
        Self {
            id: app.id,
            image: app.image,
        }
    }
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn content_address(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn image_data_url(bytes: &[u8]) -> String {
    format!("{DATA_URL_PREFIX}{}", BASE64.encode(bytes))
}
