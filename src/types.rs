//! Shared types used across all pipeline stages.
//!
//! An [`Asset`] comes out of the inventory, gains a [`VideoMetadata`] once
//! probed, and is turned into a [`PageDescriptor`] for rendering. Descriptors
//! of published assets accumulate into the [`Manifest`] that the index page is
//! rendered from. Every asset ends the run with one [`AssetOutcome`], and the
//! outcomes are tallied into a [`RunSummary`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

/// Content type attached to every published page.
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// A stored object under consideration for page generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Storage key (the asset's identity)
    pub key: String,
    /// Lower-cased extension without the dot, empty when the key has none
    pub extension: String,
    /// Public URL the video is served from once tagged
    pub public_url: String,
    /// Size reported by the listing, used to reuse staged copies
    pub size: u64,
    /// Metadata as last read from the store (empty until read)
    pub stored_metadata: HashMap<String, String>,
}

/// Technical properties of a video, as extracted by the prober.
///
/// Only constructible through [`VideoMetadata::new`], so every instance has
/// positive dimensions and a non-empty MIME type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoMetadata {
    width: u32,
    height: u32,
    mime_type: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum InvalidMetadata {
    #[error("width must be positive")]
    ZeroWidth,
    #[error("height must be positive")]
    ZeroHeight,
    #[error("MIME type must not be empty")]
    EmptyMimeType,
}

impl VideoMetadata {
    pub fn new(width: u32, height: u32, mime_type: impl Into<String>) -> Result<Self, InvalidMetadata> {
        let mime_type = mime_type.into();
        if width == 0 {
            return Err(InvalidMetadata::ZeroWidth);
        }
        if height == 0 {
            return Err(InvalidMetadata::ZeroHeight);
        }
        if mime_type.trim().is_empty() {
            return Err(InvalidMetadata::EmptyMimeType);
        }
        Ok(Self {
            width,
            height,
            mime_type,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }
}

/// Everything a video page (and its index entry) is rendered from.
///
/// Field names double as template variable names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDescriptor {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub video_url: String,
    pub mime_type: String,
    /// Page slug: the video's filename without extension
    pub page_name: String,
}

impl PageDescriptor {
    /// Derive the descriptor for a probed asset. `slug` comes from
    /// [`keys::slug`](crate::keys::slug).
    pub fn new(asset: &Asset, metadata: &VideoMetadata, slug: &str) -> Self {
        Self {
            title: asset.key.clone(),
            width: metadata.width(),
            height: metadata.height(),
            video_url: asset.public_url.clone(),
            mime_type: metadata.mime_type().to_string(),
            page_name: slug.to_string(),
        }
    }
}

/// Ordered descriptors of every successfully published video page.
///
/// Order follows inventory enumeration, independent of which worker finished
/// first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub videos: Vec<PageDescriptor>,
}

impl Manifest {
    /// Build from `(inventory index, descriptor)` pairs in any order.
    pub fn from_indexed(mut entries: Vec<(usize, PageDescriptor)>) -> Self {
        entries.sort_by_key(|(index, _)| *index);
        Self {
            videos: entries.into_iter().map(|(_, page)| page).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }
}

/// A rendered page ready for publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
}

impl RenderedDocument {
    pub fn html(key: impl Into<String>, body: String) -> Self {
        Self {
            key: key.into(),
            body: body.into_bytes(),
            content_type: HTML_CONTENT_TYPE.to_string(),
        }
    }
}

/// Why an asset dropped out of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InvalidKey,
    DuplicateSlug,
    DownloadFailed,
    ProbeFailed,
    TagFailed,
    RenderFailed,
    UploadFailed,
    /// The run was cancelled before this asset started
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SkipReason::InvalidKey => "invalid key",
            SkipReason::DuplicateSlug => "duplicate slug",
            SkipReason::DownloadFailed => "download failed",
            SkipReason::ProbeFailed => "probe failed",
            SkipReason::TagFailed => "tagging failed",
            SkipReason::RenderFailed => "render failed",
            SkipReason::UploadFailed => "upload failed",
            SkipReason::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Terminal result for one asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetOutcome {
    /// Page uploaded and publicly readable
    Published(PageDescriptor),
    /// Page uploaded but making it public failed
    PublishedNotPublic { page: PageDescriptor, detail: String },
    /// Extension not in the supported set; not a failure
    Unsupported,
    Skipped { reason: SkipReason, detail: String },
}

/// One asset that dropped out, as listed in the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedAsset {
    pub key: String,
    pub reason: SkipReason,
    pub detail: String,
}

/// Counts of what happened to every listed asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Assets returned by the inventory
    pub listed: usize,
    /// Listed assets with a supported extension
    pub candidates: usize,
    pub unsupported: usize,
    pub published: usize,
    pub published_not_public: usize,
    /// Skip count per reason
    pub skipped: BTreeMap<SkipReason, usize>,
    pub skipped_assets: Vec<SkippedAsset>,
    /// Keys of videos whose page exists but is not public
    pub not_public: Vec<String>,
}

impl RunSummary {
    /// Tally `(key, outcome)` pairs, in inventory order.
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = (&'a str, &'a AssetOutcome)>) -> Self {
        let mut summary = Self::default();
        for (key, outcome) in outcomes {
            summary.listed += 1;
            match outcome {
                AssetOutcome::Unsupported => summary.unsupported += 1,
                AssetOutcome::Published(_) => summary.published += 1,
                AssetOutcome::PublishedNotPublic { .. } => {
                    summary.published_not_public += 1;
                    summary.not_public.push(key.to_string());
                }
                AssetOutcome::Skipped { reason, detail } => {
                    *summary.skipped.entry(*reason).or_default() += 1;
                    summary.skipped_assets.push(SkippedAsset {
                        key: key.to_string(),
                        reason: *reason,
                        detail: detail.clone(),
                    });
                }
            }
        }
        summary.candidates = summary.listed - summary.unsupported;
        summary
    }

    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }

    /// More than half of the candidates were skipped.
    pub fn mostly_skipped(&self) -> bool {
        self.skipped_total() * 2 > self.candidates
    }

    /// Every candidate was published and is public.
    pub fn is_clean(&self) -> bool {
        self.skipped_total() == 0 && self.published_not_public == 0
    }
}
