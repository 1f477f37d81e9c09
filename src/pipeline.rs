//! Run orchestration.
//!
//! A run moves through these states:
//!
//! ```text
//! Preflight → Listing → (per asset, in parallel:
//!     Materializing → Probing → Tagging → Rendering → Publishing)
//!   → RenderingIndex → PublishingIndex → ConfiguringSite → Done
//! ```
//!
//! Preflight checks that the probe tool exists and that the index template
//! loaded; without either the run aborts before anything is listed or
//! mutated. A listing failure aborts before any
//! worker starts.
//!
//! ## Per-asset work
//!
//! Each supported asset is processed on a local [rayon] pool of
//! [`effective_workers`] threads. A failure at any step ends that asset with
//! [`AssetOutcome::Skipped`] and never the run. Two things are decided before
//! the pool starts, in inventory order: unsupported extensions (counted, not
//! failures) and slug collisions (the first key keeps the slug).
//!
//! Workers send `(inventory index, outcome)` over a channel. The pool
//! returning is the barrier: only then is the channel drained and the
//! [`Manifest`] built, sorted by inventory index, so the index page does not
//! depend on which worker finished first.
//!
//! If a worker finds the probe tool gone mid-run it raises a shared
//! cancellation flag. Assets not yet started are marked cancelled and the run
//! aborts without publishing an index.

use crate::config::{ConfigError, SiteConfig, effective_workers};
use crate::inventory::{self, InventoryOptions};
use crate::keys;
use crate::probe::{FfprobeProber, ProbeError, Prober};
use crate::publish::{self, PublishError};
use crate::render::{self, TemplateError, Templates};
use crate::retry::{RetryPolicy, with_retry};
use crate::site;
use crate::storage::{ObjectStore, S3Store, StorageError};
use crate::tagger;
use crate::types::{Asset, AssetOutcome, Manifest, PageDescriptor, RunSummary, SkipReason};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("probe tool unavailable: {0}")]
    ToolUnavailable(String),
    #[error("could not list bucket: {0}")]
    Inventory(#[source] StorageError),
    #[error("could not build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
    #[error("index page could not be rendered: {0}")]
    IndexTemplate(#[source] TemplateError),
    #[error("index page could not be uploaded: {0}")]
    IndexPublish(#[source] StorageError),
    #[error("index page was uploaded but is not public: {0}")]
    IndexNotPublic(#[source] StorageError),
    #[error("website hosting could not be configured: {0}")]
    Website(#[source] StorageError),
}

/// Progress event for one asset, sent as each asset finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetEvent {
    /// Listing done; `total` candidate assets will report back
    Started { total: usize },
    Published {
        key: String,
        page: String,
    },
    PublishedNotPublic {
        key: String,
        page: String,
        detail: String,
    },
    Skipped {
        key: String,
        reason: SkipReason,
        detail: String,
    },
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Pages listed on the index, in inventory order
    pub manifest: Manifest,
    pub summary: RunSummary,
    /// Key the index page was published at
    pub index_key: String,
}

/// What happens to an asset, decided before any worker starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Process { slug: String, staging_path: PathBuf },
    Unsupported,
    Skip { reason: SkipReason, detail: String },
}

/// Decide, in inventory order, which assets get processed.
///
/// Returns one plan per asset, in the same order.
pub fn plan_assets(assets: &[Asset], staging_dir: &Path) -> Vec<Plan> {
    let mut owners: HashMap<&str, &str> = HashMap::new();
    assets
        .iter()
        .map(|asset| {
            if !keys::is_supported(&asset.extension) {
                debug!(key = %asset.key, "Unsupported extension, skipping");
                return Plan::Unsupported;
            }
            let Some(staging_path) = keys::staging_path(staging_dir, &asset.key) else {
                return Plan::Skip {
                    reason: SkipReason::InvalidKey,
                    detail: "key cannot be staged locally".to_string(),
                };
            };
            let slug = keys::slug(&asset.key);
            if let Some(owner) = owners.get(slug) {
                return Plan::Skip {
                    reason: SkipReason::DuplicateSlug,
                    detail: format!("page '{slug}' belongs to {owner}"),
                };
            }
            owners.insert(slug, &asset.key);
            Plan::Process {
                slug: slug.to_string(),
                staging_path,
            }
        })
        .collect()
}

/// Run the pipeline against S3 with `ffprobe`.
///
/// `runtime` drives the async S3 client and probe subprocesses; it must not
/// be the runtime of the calling thread.
pub fn run(
    config: &SiteConfig,
    runtime: Handle,
    events: Option<Sender<AssetEvent>>,
) -> Result<RunReport, RunError> {
    config.validate()?;
    let prober = FfprobeProber::new(&config.probe.ffprobe, config.probe_timeout(), runtime.clone());
    let templates = Templates::from_dir(&config.templates_dir).map_err(RunError::IndexTemplate)?;
    let store = S3Store::connect(config.store_config(), runtime);
    run_with(&store, &prober, &templates, config, events)
}

/// Run the pipeline with the given store, prober and templates.
pub fn run_with(
    store: &impl ObjectStore,
    prober: &impl Prober,
    templates: &Templates,
    config: &SiteConfig,
    events: Option<Sender<AssetEvent>>,
) -> Result<RunReport, RunError> {
    config.validate()?;
    let retry = config.retry_policy();

    // Preflight
    prober
        .check_available()
        .map_err(|e| RunError::ToolUnavailable(e.to_string()))?;
    templates
        .check_template(render::INDEX_TEMPLATE)
        .map_err(RunError::IndexTemplate)?;

    // Listing
    let options = InventoryOptions {
        region: &config.bucket.region,
        public_base_url: config.bucket.public_base_url.as_deref(),
        pages_prefix: &config.pages_prefix,
        index_document: &config.index_document,
    };
    let assets = inventory::list_assets(store, &retry, &options).map_err(RunError::Inventory)?;
    let plans = plan_assets(&assets, &config.staging_dir);

    let emit = |event: Option<AssetEvent>| {
        if let (Some(tx), Some(event)) = (&events, event) {
            tx.send(event).ok();
        }
    };

    let mut outcomes: Vec<Option<AssetOutcome>> = vec![None; assets.len()];
    let mut jobs = Vec::new();
    let mut total = 0;
    for (index, plan) in plans.into_iter().enumerate() {
        match plan {
            Plan::Unsupported => outcomes[index] = Some(AssetOutcome::Unsupported),
            Plan::Skip { reason, detail } => {
                total += 1;
                outcomes[index] = Some(AssetOutcome::Skipped { reason, detail });
            }
            Plan::Process { slug, staging_path } => {
                total += 1;
                jobs.push(Job {
                    index,
                    asset: &assets[index],
                    slug,
                    staging_path,
                });
            }
        }
    }
    emit(Some(AssetEvent::Started { total }));
    for (asset, outcome) in assets.iter().zip(&outcomes) {
        if let Some(outcome @ AssetOutcome::Skipped { .. }) = outcome {
            emit(asset_event(asset, outcome, &config.pages_prefix));
        }
    }

    // Per-asset work
    let worker = Worker {
        store,
        prober,
        templates,
        config,
        retry: &retry,
        cancelled: AtomicBool::new(false),
        fatal: Mutex::new(None),
    };
    let threads = effective_workers(&config.processing);
    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
    info!(assets = jobs.len(), threads, "Processing assets");

    let (tx, rx) = mpsc::channel();
    pool.install(|| {
        jobs.par_iter().for_each_with(tx, |tx, job| {
            let outcome = worker.process(job);
            emit(asset_event(job.asset, &outcome, &config.pages_prefix));
            tx.send((job.index, outcome)).ok();
        })
    });

    // Barrier: every sender is gone once the pool returns.
    for (index, outcome) in rx {
        outcomes[index] = Some(outcome);
    }

    if let Some(detail) = worker.fatal_error() {
        return Err(RunError::ToolUnavailable(detail));
    }

    let outcomes: Vec<AssetOutcome> = outcomes
        .into_iter()
        .map(|o| {
            o.unwrap_or(AssetOutcome::Skipped {
                reason: SkipReason::Cancelled,
                detail: "no result from worker".to_string(),
            })
        })
        .collect();

    let manifest = Manifest::from_indexed(
        outcomes
            .iter()
            .enumerate()
            .filter_map(|(index, outcome)| match outcome {
                AssetOutcome::Published(page) => Some((index, page.clone())),
                _ => None,
            })
            .collect(),
    );
    let summary = RunSummary::from_outcomes(
        assets
            .iter()
            .map(|asset| asset.key.as_str())
            .zip(outcomes.iter()),
    );

    // Index and hosting
    let index = render::render_index(
        templates,
        &manifest,
        &config.pages_prefix,
        &config.index_document,
    )
    .map_err(RunError::IndexTemplate)?;
    publish::publish(store, &retry, &index).map_err(|e| match e {
        PublishError::UploadFailed { source, .. } => RunError::IndexPublish(source),
        PublishError::AclFailed { source, .. } => RunError::IndexNotPublic(source),
    })?;
    site::configure_website(store, &retry, &config.index_document).map_err(RunError::Website)?;

    info!(
        published = summary.published,
        not_public = summary.published_not_public,
        skipped = summary.skipped_total(),
        unsupported = summary.unsupported,
        "Site published"
    );
    if summary.mostly_skipped() {
        warn!(
            skipped = summary.skipped_total(),
            candidates = summary.candidates,
            "More than half of the videos were skipped"
        );
    }

    Ok(RunReport {
        manifest,
        summary,
        index_key: index.key,
    })
}

/// Progress event for a finished asset. Unsupported assets stay silent.
fn asset_event(asset: &Asset, outcome: &AssetOutcome, pages_prefix: &str) -> Option<AssetEvent> {
    let key = asset.key.clone();
    let event = match outcome {
        AssetOutcome::Published(page) => AssetEvent::Published {
            key,
            page: keys::page_key(pages_prefix, &page.page_name),
        },
        AssetOutcome::PublishedNotPublic { page, detail } => AssetEvent::PublishedNotPublic {
            key,
            page: keys::page_key(pages_prefix, &page.page_name),
            detail: detail.clone(),
        },
        AssetOutcome::Skipped { reason, detail } => AssetEvent::Skipped {
            key,
            reason: *reason,
            detail: detail.clone(),
        },
        AssetOutcome::Unsupported => return None,
    };
    Some(event)
}

struct Job<'a> {
    index: usize,
    asset: &'a Asset,
    slug: String,
    staging_path: PathBuf,
}

/// Shared state of the worker pool.
struct Worker<'a, S, P> {
    store: &'a S,
    prober: &'a P,
    templates: &'a Templates,
    config: &'a SiteConfig,
    retry: &'a RetryPolicy,
    cancelled: AtomicBool,
    fatal: Mutex<Option<String>>,
}

fn skipped(reason: SkipReason, detail: impl ToString) -> AssetOutcome {
    AssetOutcome::Skipped {
        reason,
        detail: detail.to_string(),
    }
}

impl<S: ObjectStore, P: Prober> Worker<'_, S, P> {
    fn process(&self, job: &Job<'_>) -> AssetOutcome {
        if self.cancelled.load(Ordering::SeqCst) {
            return skipped(SkipReason::Cancelled, "run cancelled");
        }
        let key = job.asset.key.as_str();
        let outcome = self.process_asset(job);
        match &outcome {
            AssetOutcome::Skipped { reason, detail } => {
                warn!(key, %reason, "Skipped: {}", detail);
            }
            AssetOutcome::PublishedNotPublic { detail, .. } => {
                warn!(key, "Page published but not public: {}", detail);
            }
            AssetOutcome::Published(_) => info!(key, "Published"),
            AssetOutcome::Unsupported => {}
        }
        outcome
    }

    fn process_asset(&self, job: &Job<'_>) -> AssetOutcome {
        let asset = job.asset;

        if let Err(e) = self.materialize(asset, &job.staging_path) {
            return skipped(SkipReason::DownloadFailed, e);
        }

        let metadata = match self.prober.extract(&job.staging_path) {
            Ok(metadata) => metadata,
            Err(ProbeError::UnsupportedExtension(_)) => return AssetOutcome::Unsupported,
            Err(e) if e.is_fatal() => {
                self.cancel(e.to_string());
                return skipped(SkipReason::ProbeFailed, e);
            }
            Err(e) => return skipped(SkipReason::ProbeFailed, e),
        };

        let mut asset = asset.clone();
        tagger::read_stored_metadata(self.store, self.retry, &mut asset);
        if let Err(e) = tagger::tag_asset(self.store, self.retry, &asset, &metadata) {
            return skipped(SkipReason::TagFailed, e);
        }

        let page = PageDescriptor::new(&asset, &metadata, &job.slug);
        let document =
            match render::render_video_page(self.templates, &page, &self.config.pages_prefix) {
                Ok(document) => document,
                Err(e) => return skipped(SkipReason::RenderFailed, e),
            };

        match publish::publish(self.store, self.retry, &document) {
            Ok(()) => AssetOutcome::Published(page),
            Err(PublishError::AclFailed { source, .. }) => AssetOutcome::PublishedNotPublic {
                page,
                detail: source.to_string(),
            },
            Err(e @ PublishError::UploadFailed { .. }) => skipped(SkipReason::UploadFailed, e),
        }
    }

    /// Make a local copy of the asset, reusing one of the listed size.
    fn materialize(&self, asset: &Asset, path: &Path) -> Result<(), StorageError> {
        if let Ok(existing) = std::fs::metadata(path) {
            if existing.is_file() && existing.len() == asset.size {
                debug!(key = %asset.key, "Reusing staged copy {}", path.display());
                return Ok(());
            }
        }
        with_retry(self.retry, "get_object", || self.store.download(&asset.key, path))
    }

    fn cancel(&self, detail: String) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            warn!("Probe tool unavailable, cancelling remaining assets");
            if let Ok(mut fatal) = self.fatal.lock() {
                *fatal = Some(detail);
            }
        }
    }

    fn fatal_error(&self) -> Option<String> {
        self.fatal.lock().ok().and_then(|fatal| fatal.clone())
    }
}
