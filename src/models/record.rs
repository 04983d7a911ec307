//! Represents a record stored in a collection, and its attachment.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// A record as returned by the server.
///
/// Only the fields the demo reads are modelled; everything else in the
/// server's JSON is ignored.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Record {
    /// Record identifier (a UUID for records created by this tool).
    #[serde(default)]
    pub id: String,

    /// Server timestamp, in milliseconds since the epoch.
    #[serde(default)]
    pub last_modified: Option<i64>,

    /// Free-form `type` attribute supplied by the uploader. Non-string values
    /// are kept as their JSON text.
    #[serde(rename = "type", default, deserialize_with = "any_as_text")]
    pub kind: Option<String>,

    /// Attachment metadata derived by the server. `None` for plain records.
    #[serde(default)]
    pub attachment: Option<Attachment>,

    /// Metadata of the uncompressed file when the upload was gzipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<OriginalFile>,
}

/// Server-side metadata about an uploaded attachment.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Attachment {
    pub filename: String,

    /// Public URL the content can be fetched from.
    pub location: String,

    #[serde(default)]
    pub mimetype: String,

    /// Size in bytes.
    #[serde(default)]
    pub size: u64,

    /// Hex-encoded sha256 of the stored content.
    #[serde(default)]
    pub hash: String,

    /// Set when the server gzipped the upload itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<OriginalFile>,
}

/// Description of a file before it was gzipped for upload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OriginalFile {
    pub filename: String,
    pub hash: String,
    pub mimetype: Option<String>,
    pub size: u64,
}

/// Envelope of the record listing endpoint.
#[derive(Deserialize, Debug)]
pub struct RecordList {
    pub data: Vec<Record>,
}

/// Attributes sent as the JSON `data` part next to the attachment.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct RecordAttributes {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub original: Option<OriginalFile>,
}

impl RecordAttributes {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            original: None,
        }
    }
}

fn any_as_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}

/// Identifier for a new record: a random (v4) UUID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}
