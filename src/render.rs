//! HTML page rendering.
//!
//! Two templates make up a site, both Jinja-syntax files in the templates
//! directory:
//!
//! - **`video.html`**: one page per video, published at `pages/<slug>.html`.
//!   Receives `title`, `width`, `height`, `video_url`, `mime_type` and
//!   `page_name`.
//! - **`index.html`**: the entry page. Receives `videos`, the manifest in
//!   inventory order, each entry exposing the same fields as a video page
//!   plus `page_url`, the percent-encoded site-absolute path of its page.
//!
//! Both templates also receive `pages_path` (the pages prefix with a trailing
//! slash, or empty) so links can be built without hardcoding the layout.
//!
//! Templates are loaded into a [`Templates`] registry exactly once per run and
//! shared by reference across the worker pool. Rendering is strict: an
//! undefined variable is an error rather than an empty string, and every
//! value is HTML-escaped unless a template opts out with `|safe`.
//!
//! A template that is missing or fails to parse does not fail loading. The
//! error is kept and reported by every [`Templates::render`] call for that
//! template, so a broken `video.html` skips video pages one by one while a
//! broken `index.html` is still caught when the index is rendered.

use crate::keys;
use crate::types::{Manifest, PageDescriptor, RenderedDocument};
use minijinja::{AutoEscape, Environment, ErrorKind, UndefinedBehavior};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const VIDEO_TEMPLATE: &str = "video";
pub const INDEX_TEMPLATE: &str = "index";

/// Variables each template must be given.
const REQUIRED_VARIABLES: &[(&str, &[&str])] = &[
    (
        VIDEO_TEMPLATE,
        &["title", "width", "height", "video_url", "mime_type"],
    ),
    (INDEX_TEMPLATE, &["videos"]),
];

pub const STOCK_VIDEO_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{{ title }}</title>
</head>
<body>
  <header><a href="/">All videos</a></header>
  <main>
    <h1>{{ title }}</h1>
    <video controls preload="metadata" width="{{ width }}" height="{{ height }}">
      <source src="{{ video_url }}" type="{{ mime_type }}">
    </video>
    <p>{{ width }} &times; {{ height }}</p>
  </main>
</body>
</html>
"#;

pub const STOCK_INDEX_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Videos</title>
</head>
<body>
  <main>
    <h1>Videos</h1>
    {% if videos %}
    <ul>
      {% for video in videos %}
      <li><a href="{{ video.page_url }}">{{ video.title }}</a> ({{ video.width }}&times;{{ video.height }})</li>
      {% endfor %}
    </ul>
    {% else %}
    <p>No videos yet.</p>
    {% endif %}
  </main>
</body>
</html>
"#;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("template '{name}' not found at {}", path.display())]
    MissingTemplate { name: String, path: PathBuf },
    #[error("template '{template}' is missing variable '{variable}'")]
    MissingVariable { template: String, variable: String },
    #[error("syntax error in template '{template}': {message}")]
    Syntax { template: String, message: String },
    #[error("failed to render '{template}': {message}")]
    Render { template: String, message: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a template could not be loaded; replayed on each render.
#[derive(Debug, Clone)]
enum LoadFailure {
    Missing(PathBuf),
    Syntax(String),
}

/// The loaded template registry.
pub struct Templates {
    env: Environment<'static>,
    failures: HashMap<&'static str, LoadFailure>,
}

fn new_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    // Registry names carry no `.html` suffix, so escaping is forced.
    env.set_auto_escape_callback(|_| AutoEscape::Html);
    env
}

impl Templates {
    /// Load `video.html` and `index.html` from `dir`.
    ///
    /// Only unexpected IO errors fail here; missing or unparsable templates
    /// surface when rendered.
    pub fn from_dir(dir: &Path) -> Result<Self, TemplateError> {
        let mut templates = Self {
            env: new_environment(),
            failures: HashMap::new(),
        };
        for name in [VIDEO_TEMPLATE, INDEX_TEMPLATE] {
            let path = dir.join(format!("{name}.html"));
            match std::fs::read_to_string(&path) {
                Ok(source) => templates.add(name, source),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("Template {} not found", path.display());
                    templates.failures.insert(name, LoadFailure::Missing(path));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(templates)
    }

    /// Build a registry from in-memory sources, e.g. the stock templates.
    pub fn from_sources(video: &str, index: &str) -> Self {
        let mut templates = Self {
            env: new_environment(),
            failures: HashMap::new(),
        };
        templates.add(VIDEO_TEMPLATE, video.to_string());
        templates.add(INDEX_TEMPLATE, index.to_string());
        templates
    }

    pub fn stock() -> Self {
        Self::from_sources(STOCK_VIDEO_TEMPLATE, STOCK_INDEX_TEMPLATE)
    }

    fn add(&mut self, name: &'static str, source: String) {
        if let Err(e) = self.env.add_template_owned(name, source) {
            self.failures
                .insert(name, LoadFailure::Syntax(error_message(&e)));
        }
    }

    /// Report the first template that cannot be rendered at all.
    pub fn check(&self) -> Result<(), TemplateError> {
        for name in [VIDEO_TEMPLATE, INDEX_TEMPLATE] {
            self.check_template(name)?;
        }
        Ok(())
    }

    /// Report whether template `name` was missing or failed to parse.
    pub fn check_template(&self, name: &str) -> Result<(), TemplateError> {
        match self.failures.get(name) {
            Some(failure) => Err(load_error(name, failure)),
            None => Ok(()),
        }
    }

    /// Render template `name` with `variables`.
    ///
    /// Required variables are checked by name first; any other undefined
    /// lookup during rendering is reported the same way.
    pub fn render(&self, name: &str, variables: &Map<String, Value>) -> Result<String, TemplateError> {
        if let Some(failure) = self.failures.get(name) {
            return Err(load_error(name, failure));
        }

        let required = REQUIRED_VARIABLES
            .iter()
            .find(|(template, _)| *template == name)
            .map(|(_, vars)| *vars)
            .unwrap_or(&[]);
        if let Some(missing) = required.iter().find(|var| !variables.contains_key(**var)) {
            return Err(TemplateError::MissingVariable {
                template: name.to_string(),
                variable: missing.to_string(),
            });
        }

        let template = self.env.get_template(name).map_err(|e| match e.kind() {
            ErrorKind::TemplateNotFound => TemplateError::MissingTemplate {
                name: name.to_string(),
                path: PathBuf::from(format!("{name}.html")),
            },
            _ => TemplateError::Render {
                template: name.to_string(),
                message: error_message(&e),
            },
        })?;

        template.render(variables).map_err(|e| match e.kind() {
            ErrorKind::UndefinedError => TemplateError::MissingVariable {
                template: name.to_string(),
                variable: e.detail().unwrap_or("undefined value").to_string(),
            },
            ErrorKind::SyntaxError => TemplateError::Syntax {
                template: name.to_string(),
                message: error_message(&e),
            },
            _ => TemplateError::Render {
                template: name.to_string(),
                message: error_message(&e),
            },
        })
    }
}

fn load_error(name: &str, failure: &LoadFailure) -> TemplateError {
    match failure {
        LoadFailure::Missing(path) => TemplateError::MissingTemplate {
            name: name.to_string(),
            path: path.clone(),
        },
        LoadFailure::Syntax(message) => TemplateError::Syntax {
            template: name.to_string(),
            message: message.clone(),
        },
    }
}

fn error_message(err: &minijinja::Error) -> String {
    match (err.detail(), err.line()) {
        (Some(detail), Some(line)) => format!("{detail} (line {line})"),
        (Some(detail), None) => detail.to_string(),
        _ => err.to_string(),
    }
}

/// `pages/` for prefix `pages`, empty for an empty prefix.
fn pages_path(pages_prefix: &str) -> String {
    let prefix = pages_prefix.trim_matches('/');
    if prefix.is_empty() {
        String::new()
    } else {
        format!("{prefix}/")
    }
}

/// Site-absolute URL path of a page, e.g. `/pages/clip%231.html`.
fn page_url(pages_prefix: &str, page_name: &str) -> String {
    format!("/{}", keys::encode_key(&keys::page_key(pages_prefix, page_name)))
}

fn page_variables(page: &PageDescriptor) -> Map<String, Value> {
    match serde_json::to_value(page) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Render the page of one video.
pub fn render_video_page(
    templates: &Templates,
    page: &PageDescriptor,
    pages_prefix: &str,
) -> Result<RenderedDocument, TemplateError> {
    let mut variables = page_variables(page);
    variables.insert("pages_path".into(), Value::String(pages_path(pages_prefix)));
    let html = templates.render(VIDEO_TEMPLATE, &variables)?;
    Ok(RenderedDocument::html(
        keys::page_key(pages_prefix, &page.page_name),
        html,
    ))
}

/// Render the index page listing every manifest entry.
pub fn render_index(
    templates: &Templates,
    manifest: &Manifest,
    pages_prefix: &str,
    index_document: &str,
) -> Result<RenderedDocument, TemplateError> {
    let videos = manifest
        .videos
        .iter()
        .map(|page| {
            let mut entry = page_variables(page);
            entry.insert(
                "page_url".into(),
                Value::String(page_url(pages_prefix, &page.page_name)),
            );
            Value::Object(entry)
        })
        .collect();
    let mut variables = Map::new();
    variables.insert("videos".into(), Value::Array(videos));
    variables.insert("pages_path".into(), Value::String(pages_path(pages_prefix)));
    let html = templates.render(INDEX_TEMPLATE, &variables)?;
    Ok(RenderedDocument::html(index_document, html))
}

/// Write the stock templates into `dir`.
///
/// Existing files are left alone unless `force` is set. Returns the paths
/// written.
pub fn write_stock_templates(dir: &Path, force: bool) -> Result<Vec<PathBuf>, TemplateError> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for (name, source) in [
        (VIDEO_TEMPLATE, STOCK_VIDEO_TEMPLATE),
        (INDEX_TEMPLATE, STOCK_INDEX_TEMPLATE),
    ] {
        let path = dir.join(format!("{name}.html"));
        if path.exists() && !force {
            debug!("Keeping existing {}", path.display());
            continue;
        }
        std::fs::write(&path, source)?;
        written.push(path);
    }
    Ok(written)
}
