//! Object storage capability.
//!
//! The [`ObjectStore`] trait lists exactly the bucket operations the pipeline
//! consumes, so the rest of the crate is independent of the storage backend.
//! The production implementation is [`S3Store`]; tests substitute an
//! in-memory store.
//!
//! Errors are split into transient (worth retrying, see [`crate::retry`]) and
//! permanent. Whether a permanent error ends the run or only one asset is the
//! caller's decision.

mod s3;

pub use s3::{S3Store, S3StoreConfig};

use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("{operation} failed (transient): {message}")]
    Transient {
        operation: &'static str,
        message: String,
    },
    #[error("{operation} failed: {message}")]
    Permanent {
        operation: &'static str,
        message: String,
    },
}

impl StorageError {
    pub fn transient(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Transient {
            operation,
            message: message.into(),
        }
    }

    pub fn permanent(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Permanent {
            operation,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// One entry of a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

/// Bucket operations used by the pipeline.
///
/// Implementations must be `Sync`: the worker pool calls them concurrently.
/// All calls are expected to return within a bounded time.
pub trait ObjectStore: Sync {
    /// Name of the bucket, used in logs and URLs.
    fn bucket(&self) -> &str;

    /// Every object in the bucket, in listing order, across all pages.
    fn list_objects(&self) -> StorageResult<Vec<ObjectInfo>>;

    /// User metadata of an object.
    fn head_object(&self, key: &str) -> StorageResult<HashMap<String, String>>;

    /// Download an object to a local file, creating parent directories.
    fn download(&self, key: &str, destination: &Path) -> StorageResult<()>;

    fn put_object(&self, key: &str, body: &[u8], content_type: &str) -> StorageResult<()>;

    /// Grant public read on an object.
    fn put_object_acl_public_read(&self, key: &str) -> StorageResult<()>;

    /// Copy an object onto itself, replacing its user metadata wholesale and
    /// setting its `Content-Type`.
    fn replace_metadata(
        &self,
        key: &str,
        metadata: &HashMap<String, String>,
        content_type: &str,
    ) -> StorageResult<()>;

    /// Enable website hosting with the given index document suffix.
    fn put_bucket_website(&self, index_document: &str) -> StorageResult<()>;
}
