//! Request lookup for the dev transport: in-memory build output first, then
//! the public directory, then the HTML page for client-side routes.

use crate::bundler::emit::HTML_FILE;
use crate::bundler::transform::mime_type;
use crate::bundler::OutputFile;
use crate::config::BuildContext;
use std::path::{Component, Path};
use std::sync::Arc;

/// A file answered for a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
    /// Output-relative path that was served.
    pub path: String,
    pub contents: Arc<[u8]>,
    pub content_type: &'static str,
}

/// Look up `request` (a URL path such as `/static/js/main.js`).
///
/// With `history_api_fallback`, extension-less paths that match nothing get
/// `index.html`.
#[must_use]
pub fn resolve_request(
    files: &[OutputFile],
    ctx: &BuildContext,
    history_api_fallback: bool,
    request: &str,
) -> Option<Served> {
    let path = request.split(['?', '#']).next().unwrap_or_default();
    let rel = strip_public_path(path, &ctx.public_path)?;
    let rel = if rel.is_empty() || rel.ends_with('/') {
        format!("{rel}{HTML_FILE}")
    } else {
        rel.to_string()
    };

    if let Some(file) = files.iter().find(|f| f.path == rel) {
        return Some(served(&file.path, file.contents.clone()));
    }
    if let Some(bytes) = read_public(ctx, &rel) {
        return Some(served(&rel, Arc::from(bytes)));
    }
    if history_api_fallback && Path::new(&rel).extension().is_none() {
        tracing::debug!(request, "history fallback");
        return files
            .iter()
            .find(|f| f.path == HTML_FILE)
            .map(|f| served(&f.path, f.contents.clone()));
    }
    None
}

fn strip_public_path<'a>(path: &'a str, public_path: &str) -> Option<&'a str> {
    let base = public_path.trim_end_matches('/');
    let rest = path.strip_prefix(base)?;
    if !base.is_empty() && !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    Some(rest.trim_start_matches('/'))
}

fn read_public(ctx: &BuildContext, rel: &str) -> Option<Vec<u8>> {
    let rel = Path::new(rel);
    if !rel.components().all(|c| matches!(c, Component::Normal(_))) {
        return None;
    }
    let path = ctx.public_dir.join(rel);
    if !path.is_file() {
        return None;
    }
    std::fs::read(path).ok()
}

fn served(path: &str, contents: Arc<[u8]>) -> Served {
    Served {
        path: path.to_string(),
        contents,
        content_type: content_type(path),
    }
}

/// Content type by file extension.
#[must_use]
pub fn content_type(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "html" => "text/html; charset=utf-8",
        "json" | "map" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        other => mime_type(other),
    }
}
