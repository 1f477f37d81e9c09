//! Publishing rendered documents.
//!
//! A publish is two storage calls: upload, then grant public read. They fail
//! separately, and an object that was uploaded but could not be made public
//! is reported as [`PublishError::AclFailed`] so callers can tell "exists but
//! private" apart from "not there at all".

use crate::retry::{RetryPolicy, with_retry};
use crate::storage::{ObjectStore, StorageError};
use crate::types::RenderedDocument;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("upload of {key} failed: {source}")]
    UploadFailed { key: String, source: StorageError },
    #[error("{key} was uploaded but is not public: {source}")]
    AclFailed { key: String, source: StorageError },
}

/// Upload `document` and make it publicly readable.
///
/// Safe to repeat: publishing the same document again leaves the same public
/// object behind.
pub fn publish(
    store: &impl ObjectStore,
    retry: &RetryPolicy,
    document: &RenderedDocument,
) -> Result<(), PublishError> {
    let key = document.key.as_str();

    with_retry(retry, "put_object", || {
        store.put_object(key, &document.body, &document.content_type)
    })
    .map_err(|source| PublishError::UploadFailed {
        key: key.to_string(),
        source,
    })?;

    with_retry(retry, "put_object_acl", || store.put_object_acl_public_read(key)).map_err(
        |source| PublishError::AclFailed {
            key: key.to_string(),
            source,
        },
    )?;

    debug!(key, bytes = document.body.len(), "Published");
    Ok(())
}
