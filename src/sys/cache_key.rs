// src/sys/cache_key.rs
//
// Cache file names shared with the AWS CLI. botocore hashes the assume-role
// arguments as `json.dumps(args, sort_keys=True)`, i.e. with `": "` and `", "`
// separators, so the compact serde output is re-spaced before hashing.

use std::fmt;

use serde::Serialize;
use sha1::{Digest, Sha1};

/// The assume-role arguments that identify a cache entry.
///
/// Field declaration order is the serialization order, and it is already the
/// sorted order botocore uses. Zero and empty values are omitted entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssumeRoleParameters {
    #[serde(skip_serializing_if = "is_zero")]
    pub duration_seconds: u32,
    #[serde(skip_serializing_if = "is_blank")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub role_arn: String,
    #[serde(skip_serializing_if = "is_blank")]
    pub serial_number: Option<String>,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

fn is_blank(v: &Option<String>) -> bool {
    v.as_deref().is_none_or(str::is_empty)
}

/// Lowercase hex SHA-1 naming one `<key>.json` cache file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AssumeRoleParameters {
    /// The exact text that gets hashed.
    pub fn canonical_json(&self) -> String {
        // Serializing a struct of strings and integers into a String cannot fail.
        let compact = serde_json::to_string(self).unwrap_or_default();
        compact.replace("\":", "\": ").replace(",\"", ", \"")
    }

    pub fn cache_key(&self) -> CacheKey {
        let digest = Sha1::digest(self.canonical_json().as_bytes());
        CacheKey(hex::encode(digest))
    }
}
