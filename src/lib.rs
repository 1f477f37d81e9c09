//! # vidsite
//!
//! Publishes a bucket of videos as a static website. The bucket is the data
//! source: every `.mp4` and `.mov` object becomes a page, and an index page
//! lists them all. Pages are served straight from the bucket's website
//! endpoint.
//!
//! # Architecture: One Run, Many Assets
//!
//! ```text
//! 1. Preflight   probe tool, config, index template  (abort before touching the bucket)
//! 2. List        bucket      →  assets      (inventory)
//! 3. Per asset   download → probe → tag → render → publish   (rayon pool)
//! 4. Index       manifest    →  index.html  (render + publish)
//! 5. Hosting     bucket website → index.html
//! ```
//!
//! Step 3 runs concurrently and never fails the run: each asset ends in an
//! [`types::AssetOutcome`], and the outcomes are tallied in a
//! [`types::RunSummary`]. Steps 1, 2, 4 and 5 are run-level and abort on error.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`pipeline`] | Run orchestration: preflight, planning, the worker pool, the index |
//! | [`inventory`] | Lists the bucket into candidate assets |
//! | [`probe`] | `Prober` trait and the `ffprobe` implementation |
//! | [`tagger`] | Writes probed dimensions and MIME type onto the video object |
//! | [`render`] | Template registry (minijinja) and page rendering |
//! | [`publish`] | Upload + public-read ACL for rendered pages |
//! | [`site`] | Bucket website configuration |
//! | [`storage`] | `ObjectStore` trait and the S3 implementation |
//! | [`retry`] | Exponential backoff for transient storage errors |
//! | [`config`] | `config.toml` + environment loading, validation, first-run prompts |
//! | [`keys`] | Pure functions over object keys: slugs, MIME types, URLs |
//! | [`types`] | Shared types: `Asset`, `PageDescriptor`, `Manifest`, `RunSummary` |
//! | [`output`] | CLI output formatting for progress, summary and `check` |
//!
//! # Design Decisions
//!
//! ## Capabilities at the Seams
//!
//! The pipeline sees storage only through [`storage::ObjectStore`] and the
//! probe tool only through [`probe::Prober`]. Both are `Sync` so the worker
//! pool can share them, and tests swap in an in-memory bucket and a scripted
//! prober.
//!
//! ## Sync Workers, Async Clients
//!
//! The AWS SDK and subprocess handling are async; the per-asset work is
//! CPU-shaped and runs on rayon. One tokio runtime is created in `main` and
//! its handle is passed to the S3 store and the prober, which block on it from
//! worker threads.
//!
//! ## Runtime Templates
//!
//! Pages are rendered with minijinja from files the site owner edits, loaded
//! once per run into a shared [`render::Templates`] registry. Undefined
//! variables are errors, not empty strings.
//!
//! ## Ordered Index From Unordered Work
//!
//! Workers finish in any order. Each result carries its inventory index, and
//! the [`types::Manifest`] is sorted by it after the pool returns, so the
//! index page is byte-identical across runs of an unchanged bucket.

pub mod config;
pub mod inventory;
pub mod keys;
pub mod output;
pub mod pipeline;
pub mod probe;
pub mod publish;
pub mod render;
pub mod retry;
pub mod site;
pub mod storage;
pub mod tagger;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
