//! Centralized object-key handling.
//!
//! Every stage derives things from a storage key: the extension decides
//! whether the asset is a video at all, the filename stem becomes the page
//! slug, and the key maps to a public URL and to a path in the staging
//! directory. Keeping these here means the inventory, the prober and the
//! renderer always agree.
//!
//! ## Examples
//!
//! - `clips/Cat.MP4` → extension `mp4`, slug `Cat`, page `pages/Cat.html`
//! - `holiday.2019.mov` → extension `mov`, slug `holiday.2019`
//! - `readme` → extension `""` (unsupported)

use std::path::{Component, Path, PathBuf};

/// Extensions the pipeline builds pages for (compared case-insensitively).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp4", "mov"];

/// Fallback MIME type for extensions missing from [`MIME_TYPES`].
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

const MIME_TYPES: &[(&str, &str)] = &[
    ("mp4", "video/mp4"),
    ("mov", "video/quicktime"),
    ("m4v", "video/x-m4v"),
    ("webm", "video/webm"),
    ("mkv", "video/x-matroska"),
    ("avi", "video/x-msvideo"),
];

/// Last `/`-separated segment of a key.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Lower-cased extension of the key's filename, without the dot.
///
/// Dotfiles (`.hidden`) have no extension.
pub fn extension(key: &str) -> String {
    let name = file_name(key);
    match name.rfind('.') {
        Some(0) | None => String::new(),
        Some(dot) => name[dot + 1..].to_ascii_lowercase(),
    }
}

pub fn is_supported(extension: &str) -> bool {
    SUPPORTED_EXTENSIONS
        .iter()
        .any(|ext| ext.eq_ignore_ascii_case(extension))
}

/// MIME type for an extension, falling back to [`DEFAULT_MIME_TYPE`].
pub fn mime_type(extension: &str) -> &'static str {
    MIME_TYPES
        .iter()
        .find(|(ext, _)| ext.eq_ignore_ascii_case(extension))
        .map(|(_, mime)| *mime)
        .unwrap_or(DEFAULT_MIME_TYPE)
}

/// Page slug: the filename with its last extension removed.
pub fn slug(key: &str) -> &str {
    let name = file_name(key);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(dot) => &name[..dot],
    }
}

/// Destination key of a video page, e.g. `pages/cat.html`.
pub fn page_key(pages_prefix: &str, slug: &str) -> String {
    let prefix = pages_prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{slug}.html")
    } else {
        format!("{prefix}/{slug}.html")
    }
}

/// Percent-encode each `/`-separated segment of a key.
pub fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Public URL of an object.
///
/// With a configured base URL the key is appended to it; otherwise the
/// virtual-hosted S3 form `https://<bucket>.s3.<region>.amazonaws.com/<key>`
/// is used.
pub fn public_url(bucket: &str, region: &str, base_url: Option<&str>, key: &str) -> String {
    let encoded = encode_key(key);
    match base_url {
        Some(base) => format!("{}/{}", base.trim_end_matches('/'), encoded),
        None => format!("https://{bucket}.s3.{region}.amazonaws.com/{encoded}"),
    }
}

/// Where a key is materialized inside the staging directory.
///
/// Returns `None` for keys that would escape the staging directory or name
/// no file (`..`, absolute paths, empty segments).
pub fn staging_path(staging_dir: &Path, key: &str) -> Option<PathBuf> {
    if key.is_empty() || key.ends_with('/') || key.split('/').any(str::is_empty) {
        return None;
    }
    let relative = Path::new(key);
    let safe = relative
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    safe.then(|| staging_dir.join(relative))
}
