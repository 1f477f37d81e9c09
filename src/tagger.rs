//! Metadata tagging.
//!
//! Writes probed metadata back onto the stored video and makes the video
//! publicly readable. The metadata set is replaced, not merged: after tagging
//! the object carries exactly `width`, `height` and `content-type`, and any
//! other user metadata it had before is gone.

use crate::retry::{RetryPolicy, with_retry};
use crate::storage::{ObjectStore, StorageError};
use crate::types::{Asset, VideoMetadata};
use std::collections::HashMap;
use tracing::{debug, warn};

/// User metadata written onto a tagged video.
pub fn metadata_set(metadata: &VideoMetadata) -> HashMap<String, String> {
    HashMap::from([
        ("width".to_string(), metadata.width().to_string()),
        ("height".to_string(), metadata.height().to_string()),
        ("content-type".to_string(), metadata.mime_type().to_string()),
    ])
}

/// Read the object's current user metadata onto `asset`.
///
/// A failing read leaves `stored_metadata` empty and only logs; tagging then
/// rewrites the metadata unconditionally.
pub fn read_stored_metadata(store: &impl ObjectStore, retry: &RetryPolicy, asset: &mut Asset) {
    match with_retry(retry, "head_object", || store.head_object(&asset.key)) {
        Ok(stored) => asset.stored_metadata = stored,
        Err(e) => {
            warn!(key = %asset.key, "Could not read current metadata: {}", e);
            asset.stored_metadata.clear();
        }
    }
}

/// Replace the asset's metadata with `metadata` and grant public read.
///
/// When [`Asset::stored_metadata`] already equals the replacement set the copy
/// is skipped; the ACL grant is always issued.
pub fn tag_asset(
    store: &impl ObjectStore,
    retry: &RetryPolicy,
    asset: &Asset,
    metadata: &VideoMetadata,
) -> Result<(), StorageError> {
    let key = asset.key.as_str();
    let replacement = metadata_set(metadata);

    if asset.stored_metadata == replacement {
        debug!(key, "Metadata already current");
    } else {
        let mut dropped: Vec<&str> = asset
            .stored_metadata
            .keys()
            .filter(|name| !replacement.contains_key(name.as_str()))
            .map(String::as_str)
            .collect();
        if !dropped.is_empty() {
            dropped.sort_unstable();
            debug!(key, ?dropped, "Replacing metadata drops fields");
        }
        with_retry(retry, "replace_metadata", || {
            store.replace_metadata(key, &replacement, metadata.mime_type())
        })?;
    }
    with_retry(retry, "put_object_acl", || store.put_object_acl_public_read(key))?;

    debug!(key, width = metadata.width(), height = metadata.height(), "Tagged");
    Ok(())
}
