//! CLI output formatting.
//!
//! Progress is **asset-centric**: every line leads with the object key, with
//! the published page or the skip reason as context. Logs (via `tracing`) are
//! for operators debugging a run; these lines are what a user reads.
//!
//! # Output Format
//!
//! ## Run
//!
//! ```text
//! Processing 4 videos
//! 001 cat.mp4 → pages/cat.html
//! 002 clips/dog.mov → pages/dog.html (not public)
//!     Reason: put_object_acl failed: AccessDenied
//! 003 broken.mp4 skipped: probe failed
//!     Reason: malformed probe output: "N/A"
//!
//! Published 1 page, 1 not public, 1 skipped, 1 unsupported → index.html
//! Skipped:
//!     broken.mp4: probe failed
//! ```
//!
//! ## Check
//!
//! ```text
//! Bucket media: 3 objects
//! 001 cat.mp4 → pages/cat.html
//! 002 b/cat.mp4 skipped: duplicate slug
//! 003 notes.txt unsupported
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format functions
//! are pure: no I/O, no side effects.

use crate::keys;
use crate::pipeline::{AssetEvent, Plan};
use crate::types::{Asset, RunSummary};

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

// ============================================================================
// Run progress
// ============================================================================

/// Format a progress event as display lines.
///
/// `position` is the 1-based order in which the asset finished; it is ignored
/// for [`AssetEvent::Started`].
pub fn format_asset_event(event: &AssetEvent, position: usize) -> Vec<String> {
    match event {
        AssetEvent::Started { total } => vec![format!("Processing {}", plural(*total, "video"))],
        AssetEvent::Published { key, page } => {
            vec![format!("{} {} \u{2192} {}", format_index(position), key, page)]
        }
        AssetEvent::PublishedNotPublic { key, page, detail } => vec![
            format!(
                "{} {} \u{2192} {} (not public)",
                format_index(position),
                key,
                page
            ),
            format!("{}Reason: {}", indent(1), detail),
        ],
        AssetEvent::Skipped {
            key,
            reason,
            detail,
        } => vec![
            format!("{} {} skipped: {}", format_index(position), key, reason),
            format!("{}Reason: {}", indent(1), detail),
        ],
    }
}

/// Print progress events as they arrive until the sender side hangs up.
pub fn print_asset_events(events: impl IntoIterator<Item = AssetEvent>) {
    let mut position = 0;
    for event in events {
        if !matches!(event, AssetEvent::Started { .. }) {
            position += 1;
        }
        for line in format_asset_event(&event, position) {
            println!("{}", line);
        }
    }
}

// ============================================================================
// Run summary
// ============================================================================

/// Format the end-of-run summary.
pub fn format_run_summary(summary: &RunSummary, index_key: &str) -> Vec<String> {
    let mut lines = vec![String::new()];

    let mut parts = vec![plural(summary.published, "page")];
    if summary.published_not_public > 0 {
        parts.push(format!("{} not public", summary.published_not_public));
    }
    if summary.skipped_total() > 0 {
        parts.push(format!("{} skipped", summary.skipped_total()));
    }
    if summary.unsupported > 0 {
        parts.push(format!("{} unsupported", summary.unsupported));
    }
    lines.push(format!("Published {} \u{2192} {}", parts.join(", "), index_key));

    if !summary.not_public.is_empty() {
        lines.push("Not public:".to_string());
        for key in &summary.not_public {
            lines.push(format!("{}{}", indent(1), key));
        }
    }

    if !summary.skipped_assets.is_empty() {
        lines.push("Skipped:".to_string());
        for skipped in &summary.skipped_assets {
            lines.push(format!("{}{}: {}", indent(1), skipped.key, skipped.reason));
        }
    }

    if summary.mostly_skipped() {
        lines.push(format!(
            "Warning: {} of {} videos were skipped",
            summary.skipped_total(),
            summary.candidates
        ));
    }

    lines
}

pub fn print_run_summary(summary: &RunSummary, index_key: &str) {
    for line in format_run_summary(summary, index_key) {
        println!("{}", line);
    }
}

// ============================================================================
// Check
// ============================================================================

/// Format what a run would do with each listed asset.
pub fn format_check_output(
    bucket: &str,
    assets: &[Asset],
    plans: &[Plan],
    pages_prefix: &str,
) -> Vec<String> {
    let mut lines = vec![format!("Bucket {}: {}", bucket, plural(assets.len(), "object"))];
    for (pos, (asset, plan)) in assets.iter().zip(plans).enumerate() {
        let index = format_index(pos + 1);
        lines.push(match plan {
            Plan::Process { slug, .. } => format!(
                "{} {} \u{2192} {}",
                index,
                asset.key,
                keys::page_key(pages_prefix, slug)
            ),
            Plan::Unsupported => format!("{} {} unsupported", index, asset.key),
            Plan::Skip { reason, .. } => format!("{} {} skipped: {}", index, asset.key, reason),
        });
    }
    lines
}

pub fn print_check_output(bucket: &str, assets: &[Asset], plans: &[Plan], pages_prefix: &str) {
    for line in format_check_output(bucket, assets, plans, pages_prefix) {
        println!("{}", line);
    }
}
