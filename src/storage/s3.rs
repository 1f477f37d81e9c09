//! S3 implementation of [`ObjectStore`].
//!
//! The AWS SDK is async; the pipeline's workers are plain threads. Every
//! method therefore enters the shared tokio runtime through a [`Handle`] and
//! wraps the request in a timeout, so a stalled connection surfaces as a
//! transient error instead of a hung worker.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{IndexDocument, MetadataDirective, ObjectCannedAcl, WebsiteConfiguration};
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::{ObjectInfo, ObjectStore, StorageError, StorageResult};
use crate::keys;

/// Error codes S3 (and compatible stores) use for throttling and
/// temporary unavailability.
const TRANSIENT_CODES: &[&str] = &[
    "SlowDown",
    "Throttling",
    "ThrottlingException",
    "RequestTimeout",
    "RequestTimeoutException",
    "InternalError",
    "ServiceUnavailable",
];

/// Connection settings for [`S3Store`].
#[derive(Debug, Clone)]
pub struct S3StoreConfig {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible stores; enables path-style access
    pub endpoint_url: Option<String>,
    /// Bound on each metadata/ACL/put/list request
    pub request_timeout: Duration,
    /// Bound on a whole object download
    pub transfer_timeout: Duration,
}

/// S3-backed object store.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
    runtime: Handle,
    request_timeout: Duration,
    transfer_timeout: Duration,
}

impl S3Store {
    /// Build a client from the default AWS credential chain.
    ///
    /// Must not be called from inside the runtime itself.
    pub fn connect(config: S3StoreConfig, runtime: Handle) -> Self {
        let client = runtime.block_on(async {
            let mut loader =
                aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));
            if let Some(endpoint) = &config.endpoint_url {
                loader = loader.endpoint_url(endpoint);
            }
            let shared = loader.load().await;
            let s3_config = aws_sdk_s3::config::Builder::from(&shared)
                .force_path_style(config.endpoint_url.is_some())
                .build();
            Client::from_conf(s3_config)
        });

        info!(bucket = %config.bucket, region = %config.region, "S3 client ready");

        Self {
            client,
            bucket: config.bucket,
            runtime,
            request_timeout: config.request_timeout,
            transfer_timeout: config.transfer_timeout,
        }
    }

    fn call<T, F>(&self, operation: &'static str, limit: Duration, request: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        self.runtime.block_on(async {
            match tokio::time::timeout(limit, request).await {
                Ok(result) => result,
                Err(_) => Err(StorageError::transient(
                    operation,
                    format!("timed out after {limit:?}"),
                )),
            }
        })
    }

    fn copy_source(&self, key: &str) -> String {
        format!("{}/{}", self.bucket, keys::encode_key(key))
    }
}

impl ObjectStore for S3Store {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn list_objects(&self) -> StorageResult<Vec<ObjectInfo>> {
        let objects = collect_pages(|token| {
            let response = self.call("list_objects", self.request_timeout, async {
                let mut request = self.client.list_objects_v2().bucket(&self.bucket);
                if let Some(token) = token {
                    request = request.continuation_token(token);
                }
                request.send().await.map_err(|e| classify("list_objects", e))
            })?;

            Ok(ListingPage {
                objects: response
                    .contents
                    .unwrap_or_default()
                    .into_iter()
                    .map(|obj| ObjectInfo {
                        key: obj.key.unwrap_or_default(),
                        size: obj.size.unwrap_or(0).max(0) as u64,
                    })
                    .collect(),
                truncated: response.is_truncated == Some(true),
                next_token: response.next_continuation_token,
            })
        })?;

        debug!(bucket = %self.bucket, count = objects.len(), "Listed objects");
        Ok(objects)
    }

    fn head_object(&self, key: &str) -> StorageResult<HashMap<String, String>> {
        self.call("head_object", self.request_timeout, async {
            let response = self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| classify("head_object", e))?;
            Ok(response.metadata.unwrap_or_default())
        })
    }

    fn download(&self, key: &str, destination: &Path) -> StorageResult<()> {
        debug!("Downloading {} to {}", key, destination.display());
        let partial = partial_path(destination);

        let result = self.call("get_object", self.transfer_timeout, async {
            let response = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| classify("get_object", e))?;

            if let Some(parent) = destination.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StorageError::permanent("get_object", e.to_string()))?;
            }

            let mut file = tokio::fs::File::create(&partial)
                .await
                .map_err(|e| StorageError::permanent("get_object", e.to_string()))?;
            let mut body = response.body.into_async_read();
            tokio::io::copy(&mut body, &mut file)
                .await
                .map_err(|e| StorageError::transient("get_object", e.to_string()))?;
            file.flush()
                .await
                .map_err(|e| StorageError::permanent("get_object", e.to_string()))?;

            tokio::fs::rename(&partial, destination)
                .await
                .map_err(|e| StorageError::permanent("get_object", e.to_string()))
        });
        if result.is_err() {
            discard_partial(&partial);
        }
        result
    }

    fn put_object(&self, key: &str, body: &[u8], content_type: &str) -> StorageResult<()> {
        debug!("Uploading {} bytes to {}", body.len(), key);
        self.call("put_object", self.request_timeout, async {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(ByteStream::from(body.to_vec()))
                .content_type(content_type)
                .send()
                .await
                .map_err(|e| classify("put_object", e))?;
            Ok(())
        })
    }

    fn put_object_acl_public_read(&self, key: &str) -> StorageResult<()> {
        self.call("put_object_acl", self.request_timeout, async {
            self.client
                .put_object_acl()
                .bucket(&self.bucket)
                .key(key)
                .acl(ObjectCannedAcl::PublicRead)
                .send()
                .await
                .map_err(|e| classify("put_object_acl", e))?;
            Ok(())
        })
    }

    fn replace_metadata(
        &self,
        key: &str,
        metadata: &HashMap<String, String>,
        content_type: &str,
    ) -> StorageResult<()> {
        self.call("copy_object", self.transfer_timeout, async {
            self.client
                .copy_object()
                .bucket(&self.bucket)
                .copy_source(self.copy_source(key))
                .key(key)
                .set_metadata(Some(metadata.clone()))
                .metadata_directive(MetadataDirective::Replace)
                .content_type(content_type)
                .send()
                .await
                .map_err(|e| classify("copy_object", e))?;
            Ok(())
        })
    }

    fn put_bucket_website(&self, index_document: &str) -> StorageResult<()> {
        let index = IndexDocument::builder()
            .suffix(index_document)
            .build()
            .map_err(|e| StorageError::permanent("put_bucket_website", e.to_string()))?;
        let website = WebsiteConfiguration::builder().index_document(index).build();

        self.call("put_bucket_website", self.request_timeout, async {
            self.client
                .put_bucket_website()
                .bucket(&self.bucket)
                .website_configuration(website)
                .send()
                .await
                .map_err(|e| classify("put_bucket_website", e))?;
            Ok(())
        })
    }
}

/// One response of a paginated listing.
struct ListingPage {
    objects: Vec<ObjectInfo>,
    truncated: bool,
    next_token: Option<String>,
}

/// Fetch listing pages until one is not truncated, feeding each page's
/// continuation token into the next request.
///
/// A truncated page without a token ends the listing; following it would
/// request the first page again.
fn collect_pages(
    mut fetch: impl FnMut(Option<String>) -> StorageResult<ListingPage>,
) -> StorageResult<Vec<ObjectInfo>> {
    let mut objects = Vec::new();
    let mut token = None;
    loop {
        let page = fetch(token.take())?;
        objects.extend(page.objects);
        match page.next_token {
            Some(next) if page.truncated => token = Some(next),
            None if page.truncated => {
                warn!("Listing marked truncated without a continuation token");
                break;
            }
            _ => break,
        }
    }
    Ok(objects)
}

/// Remove what a failed download left behind.
fn discard_partial(partial: &Path) {
    match std::fs::remove_file(partial) {
        Ok(()) => debug!("Removed partial download {}", partial.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", partial.display(), e),
    }
}

/// Sibling path a download is streamed into before the final rename.
fn partial_path(destination: &Path) -> PathBuf {
    let mut partial = destination.as_os_str().to_owned();
    partial.push(".part");
    PathBuf::from(partial)
}

fn is_transient_code(code: Option<&str>) -> bool {
    code.is_some_and(|code| TRANSIENT_CODES.contains(&code))
}

fn is_transient_status(status: u16) -> bool {
    status == 429 || status >= 500
}

/// Map an SDK error onto the transient/permanent split.
///
/// Timeouts, connection failures and unparseable responses are transient, as
/// are throttling codes and 429/5xx statuses. Everything else (access denied,
/// missing bucket, invalid request) is permanent.
fn classify<E>(operation: &'static str, err: SdkError<E, HttpResponse>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => true,
        SdkError::ServiceError(service) => {
            is_transient_code(service.err().code())
                || is_transient_status(service.raw().status().as_u16())
        }
        _ => false,
    };
    let message = DisplayErrorContext(&err).to_string();
    if transient {
        StorageError::transient(operation, message)
    } else {
        StorageError::permanent(operation, message)
    }
}
