//! Containers in the remote store: the demo bucket and its fixed collections.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Bucket the demo writes into unless configured otherwise.
pub const DEFAULT_BUCKET_ID: &str = "fennec-ota";

/// One of the collections created inside the demo bucket.
///
/// The set is fixed: every collection is created on startup and the upload
/// form only offers these values.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum CollectionId {
    #[default]
    Font,
    Locale,
    Hyphenation,
}

impl CollectionId {
    /// All collections, in the order they are offered in the form.
    pub const ALL: [CollectionId; 3] = [
        CollectionId::Font,
        CollectionId::Locale,
        CollectionId::Hyphenation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionId::Font => "font",
            CollectionId::Locale => "locale",
            CollectionId::Hyphenation => "hyphenation",
        }
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown collection `{0}` (expected one of: font, locale, hyphenation)")]
pub struct UnknownCollection(pub String);

impl FromStr for CollectionId {
    type Err = UnknownCollection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CollectionId::ALL
            .into_iter()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| UnknownCollection(s.to_string()))
    }
}
