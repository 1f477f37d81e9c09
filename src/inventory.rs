//! Inventory listing.
//!
//! Turns a bucket listing into the ordered candidate [`Asset`] list. Listing
//! order (lexicographic by key, as S3 returns it) is the inventory order the
//! manifest is sorted by.
//!
//! Folder placeholders, previously published pages and the index document are
//! dropped here, so a re-run never treats its own output as input.

use crate::keys;
use crate::retry::{RetryPolicy, with_retry};
use crate::storage::{ObjectStore, StorageError};
use crate::types::Asset;
use std::collections::HashMap;
use tracing::{debug, info};

/// What the lister needs to know about the site layout.
#[derive(Debug, Clone)]
pub struct InventoryOptions<'a> {
    pub region: &'a str,
    pub public_base_url: Option<&'a str>,
    pub pages_prefix: &'a str,
    pub index_document: &'a str,
}

/// Whether a listed key is pipeline output or a folder rather than an asset.
fn is_excluded(key: &str, options: &InventoryOptions<'_>) -> bool {
    if key.is_empty() || key.ends_with('/') || key == options.index_document {
        return true;
    }
    let prefix = options.pages_prefix.trim_matches('/');
    !prefix.is_empty()
        && key
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// List every candidate asset in the bucket.
///
/// Transient listing failures are retried per `retry`; anything left over is
/// returned to the caller, which treats it as fatal for the run.
pub fn list_assets(
    store: &impl ObjectStore,
    retry: &RetryPolicy,
    options: &InventoryOptions<'_>,
) -> Result<Vec<Asset>, StorageError> {
    let objects = with_retry(retry, "list_objects", || store.list_objects())?;
    let listed = objects.len();

    let assets: Vec<Asset> = objects
        .into_iter()
        .filter(|object| {
            let excluded = is_excluded(&object.key, options);
            if excluded {
                debug!(key = %object.key, "Not an asset");
            }
            !excluded
        })
        .map(|object| Asset {
            extension: keys::extension(&object.key),
            public_url: keys::public_url(
                store.bucket(),
                options.region,
                options.public_base_url,
                &object.key,
            ),
            size: object.size,
            stored_metadata: HashMap::new(),
            key: object.key,
        })
        .collect();

    info!(bucket = store.bucket(), listed, assets = assets.len(), "Inventory complete");
    Ok(assets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{MemoryStore, StoreOp};
    use std::time::Duration;

    fn options() -> InventoryOptions<'static> {
        InventoryOptions {
            region: "us-east-1",
            public_base_url: None,
            pages_prefix: "pages",
            index_document: "index.html",
        }
    }

    fn keys_of(assets: &[Asset]) -> Vec<&str> {
        assets.iter().map(|a| a.key.as_str()).collect()
    }

    #[test]
    fn lists_assets_in_key_order() {
        let store = MemoryStore::new();
        store.insert("dog.mov", b"dd");
        store.insert("cat.mp4", b"c");
        store.insert("readme.txt", b"r");

        let assets = list_assets(&store, &RetryPolicy::none(), &options()).unwrap();
        assert_eq!(keys_of(&assets), vec!["cat.mp4", "dog.mov", "readme.txt"]);
    }

    #[test]
    fn asset_fields_are_derived_from_key() {
        let store = MemoryStore::new();
        store.insert("clips/Cat.MP4", b"12345");

        let assets = list_assets(&store, &RetryPolicy::none(), &options()).unwrap();
        let asset = &assets[0];
        assert_eq!(asset.extension, "mp4");
        assert_eq!(asset.size, 5);
        assert_eq!(
            asset.public_url,
            "https://test-bucket.s3.us-east-1.amazonaws.com/clips/Cat.MP4"
        );
        assert!(asset.stored_metadata.is_empty());
    }

    #[test]
    fn base_url_overrides_public_url() {
        let store = MemoryStore::new();
        store.insert("cat.mp4", b"c");
        let opts = InventoryOptions {
            public_base_url: Some("https://cdn.example.com"),
            ..options()
        };

        let assets = list_assets(&store, &RetryPolicy::none(), &opts).unwrap();
        assert_eq!(assets[0].public_url, "https://cdn.example.com/cat.mp4");
    }

    #[test]
    fn pipeline_output_and_folders_are_not_assets() {
        let store = MemoryStore::new();
        store.insert("cat.mp4", b"c");
        store.insert("clips/", b"");
        store.insert("index.html", b"<html>");
        store.insert("pages/cat.html", b"<html>");
        store.insert("pages-old/dog.mp4", b"d");

        let assets = list_assets(&store, &RetryPolicy::none(), &options()).unwrap();
        assert_eq!(keys_of(&assets), vec!["cat.mp4", "pages-old/dog.mp4"]);
    }

    #[test]
    fn nested_index_name_is_still_an_asset() {
        let store = MemoryStore::new();
        store.insert("old/index.html", b"x");
        let assets = list_assets(&store, &RetryPolicy::none(), &options()).unwrap();
        assert_eq!(keys_of(&assets), vec!["old/index.html"]);
    }

    #[test]
    fn empty_bucket_is_not_an_error() {
        let store = MemoryStore::new();
        let assets = list_assets(&store, &RetryPolicy::none(), &options()).unwrap();
        assert!(assets.is_empty());
    }

    #[test]
    fn transient_listing_failure_is_retried() {
        let store = MemoryStore::new();
        store.insert("cat.mp4", b"c");
        store.fail_transiently(StoreOp::List, "", 2);
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        };

        let assets = list_assets(&store, &policy, &options()).unwrap();
        assert_eq!(assets.len(), 1);
        assert_eq!(store.count(StoreOp::List), 3);
    }

    #[test]
    fn permanent_listing_failure_is_returned() {
        let store = MemoryStore::new();
        store.fail_permanently(StoreOp::List, "");
        let err = list_assets(&store, &RetryPolicy::default(), &options()).unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(store.count(StoreOp::List), 1);
    }
}
