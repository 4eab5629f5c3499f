//! Represents an object identity and its metadata row.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, types::Json};
use std::{collections::BTreeMap, fmt};
use thiserror::Error;

/// Metadata key holding the `Content-Type` supplied on upload.
pub const META_CONTENT_TYPE: &str = "content-type";

/// Metadata key holding the `Content-Encoding` supplied on upload.
pub const META_CONTENT_ENCODING: &str = "content-encoding";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("bad bucket and object name: `{0}`")]
pub struct InvalidObjectId(pub String);

/// The `(bucket, name)` pair addressing a single object.
///
/// The bucket is the first path segment of the request; the name is the
/// remainder and may itself contain `/`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectId {
    bucket: String,
    name: String,
}

impl ObjectId {
    /// Build an identity, rejecting an empty bucket or name.
    pub fn new(
        bucket: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, InvalidObjectId> {
        let bucket = bucket.into();
        let name = name.into();
        if bucket.is_empty() || name.is_empty() || bucket.contains('/') {
            return Err(InvalidObjectId(format!("{}/{}", bucket, name)));
        }
        Ok(Self { bucket, name })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.bucket, self.name)
    }
}

/// One row of the `objects` table.
///
/// The row describes the object but holds none of its bytes; those live in
/// `ceil(content_length / CHUNK_MAX_SIZE)` chunk rows.
#[derive(Clone, FromRow, Debug)]
pub struct ObjectMeta {
    pub bucket: String,

    pub name: String,

    /// Total byte length declared by the writer.
    pub content_length: i64,

    /// Assigned by the store when the row was inserted.
    pub created: DateTime<Utc>,

    /// Content headers captured at upload (`content-type`, `content-encoding`).
    pub metadata: Json<BTreeMap<String, String>>,
}

impl ObjectMeta {
    pub fn content_type(&self) -> Option<&str> {
        self.metadata
            .get(META_CONTENT_TYPE)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_id_keeps_nested_names() {
        let id = ObjectId::new("b1", "a/b/c").expect("valid id");
        assert_eq!(id.bucket(), "b1");
        assert_eq!(id.name(), "a/b/c");
        assert_eq!(id.to_string(), "b1::a/b/c");
    }

    #[test]
    fn object_id_rejects_empty_parts() {
        assert!(ObjectId::new("", "obj").is_err());
        assert!(ObjectId::new("b1", "").is_err());
    }
}
