//! Shared test utilities for the vidsite test suite.
//!
//! Provides an in-memory [`ObjectStore`] with failure injection, a scripted
//! [`Prober`], template fixtures, and lookup helpers that panic with a clear
//! message on a miss.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let store = MemoryStore::new();
//! store.insert("cat.mp4", b"video");
//! store.fail_permanently(StoreOp::PutAcl, "pages/cat.html");
//!
//! let prober = ScriptedProber::new().with("cat.mp4", 1920, 1080);
//! ```
//!
//! Both fakes use `Mutex` (not `RefCell`) so they are `Sync` and work inside
//! the rayon worker pool.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

use crate::keys;
use crate::probe::{ProbeError, Prober};
use crate::render::{INDEX_TEMPLATE, STOCK_INDEX_TEMPLATE, STOCK_VIDEO_TEMPLATE, VIDEO_TEMPLATE};
use crate::storage::{ObjectInfo, ObjectStore, StorageError, StorageResult};
use crate::types::{Manifest, PageDescriptor, VideoMetadata};

// =========================================================================
// In-memory object store
// =========================================================================

/// An object held by [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
    pub public: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    List,
    Head,
    Download,
    Put,
    PutAcl,
    ReplaceMetadata,
    Website,
}

impl StoreOp {
    fn mutates(self) -> bool {
        matches!(
            self,
            StoreOp::Put | StoreOp::PutAcl | StoreOp::ReplaceMetadata | StoreOp::Website
        )
    }
}

#[derive(Debug, Clone, Copy)]
enum Failure {
    Permanent,
    Transient { remaining: u32 },
}

/// Bucket kept in memory. Listing returns keys in lexicographic order, as S3
/// does.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    website: Mutex<Option<String>>,
    failures: Mutex<HashMap<(StoreOp, String), Failure>>,
    operations: Mutex<Vec<(StoreOp, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, body: &[u8]) {
        self.insert_with_metadata(key, body, &[]);
    }

    pub fn insert_with_metadata(&self, key: &str, body: &[u8], metadata: &[(&str, &str)]) {
        let object = StoredObject {
            body: body.to_vec(),
            content_type: "binary/octet-stream".to_string(),
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            public: false,
        };
        self.objects.lock().unwrap().insert(key.to_string(), object);
    }

    /// Make every call of `op` on `key` fail permanently. Use `""` as key for
    /// bucket-level operations (list, website).
    pub fn fail_permanently(&self, op: StoreOp, key: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert((op, key.to_string()), Failure::Permanent);
    }

    /// Make the next `times` calls of `op` on `key` fail transiently.
    pub fn fail_transiently(&self, op: StoreOp, key: &str, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert((op, key.to_string()), Failure::Transient { remaining: times });
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn website(&self) -> Option<String> {
        self.website.lock().unwrap().clone()
    }

    /// Every recorded call, in call order.
    pub fn operations(&self) -> Vec<(StoreOp, String)> {
        self.operations.lock().unwrap().clone()
    }

    /// Calls that change bucket state.
    pub fn mutations(&self) -> Vec<(StoreOp, String)> {
        self.operations()
            .into_iter()
            .filter(|(op, _)| op.mutates())
            .collect()
    }

    pub fn count(&self, op: StoreOp) -> usize {
        self.operations().iter().filter(|(o, _)| *o == op).count()
    }

    fn record(&self, op: StoreOp, key: &str, name: &'static str) -> StorageResult<()> {
        self.operations.lock().unwrap().push((op, key.to_string()));
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(&(op, key.to_string())) {
            Some(Failure::Permanent) => Err(StorageError::permanent(name, "injected failure")),
            Some(Failure::Transient { remaining }) if *remaining > 0 => {
                *remaining -= 1;
                Err(StorageError::transient(name, "SlowDown"))
            }
            _ => Ok(()),
        }
    }

    fn with_object<T>(
        &self,
        key: &str,
        name: &'static str,
        f: impl FnOnce(&mut StoredObject) -> T,
    ) -> StorageResult<T> {
        let mut objects = self.objects.lock().unwrap();
        let object = objects
            .get_mut(key)
            .ok_or_else(|| StorageError::permanent(name, format!("NoSuchKey: {key}")))?;
        Ok(f(object))
    }
}

impl ObjectStore for MemoryStore {
    fn bucket(&self) -> &str {
        "test-bucket"
    }

    fn list_objects(&self) -> StorageResult<Vec<ObjectInfo>> {
        self.record(StoreOp::List, "", "list_objects")?;
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .map(|(key, object)| ObjectInfo {
                key: key.clone(),
                size: object.body.len() as u64,
            })
            .collect())
    }

    fn head_object(&self, key: &str) -> StorageResult<HashMap<String, String>> {
        self.record(StoreOp::Head, key, "head_object")?;
        self.with_object(key, "head_object", |object| object.metadata.clone())
    }

    fn download(&self, key: &str, destination: &Path) -> StorageResult<()> {
        self.record(StoreOp::Download, key, "get_object")?;
        let body = self.with_object(key, "get_object", |object| object.body.clone())?;
        let io_err = |e: std::io::Error| StorageError::permanent("get_object", e.to_string());
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(destination, body).map_err(io_err)
    }

    fn put_object(&self, key: &str, body: &[u8], content_type: &str) -> StorageResult<()> {
        self.record(StoreOp::Put, key, "put_object")?;
        // A fresh PUT resets the ACL to private, as S3 does.
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                body: body.to_vec(),
                content_type: content_type.to_string(),
                metadata: HashMap::new(),
                public: false,
            },
        );
        Ok(())
    }

    fn put_object_acl_public_read(&self, key: &str) -> StorageResult<()> {
        self.record(StoreOp::PutAcl, key, "put_object_acl")?;
        self.with_object(key, "put_object_acl", |object| object.public = true)
    }

    fn replace_metadata(
        &self,
        key: &str,
        metadata: &HashMap<String, String>,
        content_type: &str,
    ) -> StorageResult<()> {
        self.record(StoreOp::ReplaceMetadata, key, "copy_object")?;
        self.with_object(key, "copy_object", |object| {
            object.metadata = metadata.clone();
            object.content_type = content_type.to_string();
            object.public = false;
        })
    }

    fn put_bucket_website(&self, index_document: &str) -> StorageResult<()> {
        self.record(StoreOp::Website, "", "put_bucket_website")?;
        *self.website.lock().unwrap() = Some(index_document.to_string());
        Ok(())
    }
}

// =========================================================================
// Scripted prober
// =========================================================================

/// Prober answering from a table keyed by file name.
///
/// Files missing from the table produce malformed output. Like ffprobe it
/// refuses unsupported extensions, and like ffprobe it needs the file to
/// exist locally.
#[derive(Default)]
pub struct ScriptedProber {
    dimensions: HashMap<String, (u32, u32)>,
    unavailable: bool,
    vanishes_on: Option<String>,
    calls: Mutex<Vec<PathBuf>>,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, file_name: &str, width: u32, height: u32) -> Self {
        self.dimensions.insert(file_name.to_string(), (width, height));
        self
    }

    /// Fail the availability check, as with no ffprobe on PATH.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Report the tool as gone when probing `file_name`.
    pub fn vanishing_on(mut self, file_name: &str) -> Self {
        self.vanishes_on = Some(file_name.to_string());
        self
    }

    /// Paths probed so far, in call order.
    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }
}

impl Prober for ScriptedProber {
    fn check_available(&self) -> Result<(), ProbeError> {
        if self.unavailable {
            Err(ProbeError::ToolUnavailable("ffprobe: not found".into()))
        } else {
            Ok(())
        }
    }

    fn extract(&self, path: &Path) -> Result<VideoMetadata, ProbeError> {
        self.calls.lock().unwrap().push(path.to_path_buf());

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = keys::extension(&name);
        if !keys::is_supported(&extension) {
            return Err(ProbeError::UnsupportedExtension(extension));
        }
        if self.unavailable || self.vanishes_on.as_deref() == Some(name.as_str()) {
            return Err(ProbeError::ToolUnavailable("ffprobe: not found".into()));
        }
        if !path.exists() {
            return Err(ProbeError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not materialized", path.display()),
            )));
        }
        let (width, height) = self
            .dimensions
            .get(&name)
            .copied()
            .ok_or_else(|| ProbeError::MalformedOutput("garbage".into()))?;
        Ok(VideoMetadata::new(width, height, keys::mime_type(&extension))?)
    }
}

// =========================================================================
// Template fixtures
// =========================================================================

/// A temp directory holding the stock templates.
pub fn stock_templates_dir() -> TempDir {
    let tmp = TempDir::new().unwrap();
    write_template(tmp.path(), VIDEO_TEMPLATE, STOCK_VIDEO_TEMPLATE);
    write_template(tmp.path(), INDEX_TEMPLATE, STOCK_INDEX_TEMPLATE);
    tmp
}

/// Write `<name>.html` into `dir`.
pub fn write_template(dir: &Path, name: &str, source: &str) {
    std::fs::write(dir.join(format!("{name}.html")), source).unwrap();
}

// =========================================================================
// Lookups — panic with a clear message on miss
// =========================================================================

/// Find a manifest entry by page name. Panics if not found.
pub fn find_page<'a>(manifest: &'a Manifest, page_name: &str) -> &'a PageDescriptor {
    manifest
        .videos
        .iter()
        .find(|p| p.page_name == page_name)
        .unwrap_or_else(|| {
            let names = page_names(manifest);
            panic!("page '{page_name}' not in manifest. Available: {names:?}")
        })
}

/// All page names in manifest order.
pub fn page_names(manifest: &Manifest) -> Vec<&str> {
    manifest.videos.iter().map(|p| p.page_name.as_str()).collect()
}

/// Body of a stored object as UTF-8. Panics if missing.
pub fn body_text(store: &MemoryStore, key: &str) -> String {
    let object = store.object(key).unwrap_or_else(|| {
        let keys = store.keys();
        panic!("object '{key}' not in store. Available: {keys:?}")
    });
    String::from_utf8(object.body).unwrap()
}
