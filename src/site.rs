//! Website hosting configuration.

use crate::retry::{RetryPolicy, with_retry};
use crate::storage::{ObjectStore, StorageError};
use tracing::info;

/// Declare `index_document` as the bucket website's entry point.
///
/// Called once, after the index page is public.
pub fn configure_website(
    store: &impl ObjectStore,
    retry: &RetryPolicy,
    index_document: &str,
) -> Result<(), StorageError> {
    with_retry(retry, "put_bucket_website", || {
        store.put_bucket_website(index_document)
    })?;
    info!(bucket = store.bucket(), index_document, "Website hosting configured");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{MemoryStore, StoreOp};

    #[test]
    fn sets_index_document() {
        let store = MemoryStore::new();
        configure_website(&store, &RetryPolicy::none(), "index.html").unwrap();
        assert_eq!(store.website().as_deref(), Some("index.html"));
    }

    #[test]
    fn failure_leaves_website_unset() {
        let store = MemoryStore::new();
        store.fail_permanently(StoreOp::Website, "");
        assert!(configure_website(&store, &RetryPolicy::none(), "index.html").is_err());
        assert_eq!(store.website(), None);
    }
}
