//! Per-module transform pipeline.
//!
//! Raw bytes + matching rules → module code, plus an extracted stylesheet
//! or an emitted asset file when the module produces one.

use super::rules::{ModuleType, RuleSet};
use super::stage::{Artifact, StageContext};
use super::stages::{self, replace_defines, StyleExtractStage, StyleInjectStage};
use crate::bundler::stage::Stage;
use crate::config::BuildContext;
use crate::error::TransformError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

const STYLE_EXTENSIONS: &[&str] = &["css", "scss", "sass", "less", "styl"];

const ASSET_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "bmp", "avif", "woff", "woff2", "ttf",
    "otf", "eot", "mp4", "webm", "ogg", "mp3", "wav", "flac", "aac",
];

/// Detected module kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Script,
    Style,
    Asset,
}

impl ModuleKind {
    /// Kind from the rule's module type, falling back to the extension.
    #[must_use]
    pub fn detect(path: &Path, module_type: Option<ModuleType>) -> Self {
        if module_type.is_some() {
            return Self::Asset;
        }
        let ext = extension(path);
        if STYLE_EXTENSIONS.contains(&ext.as_str()) {
            Self::Style
        } else if ASSET_EXTENSIONS.contains(&ext.as_str()) {
            Self::Asset
        } else {
            Self::Script
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Style => "style",
            Self::Asset => "asset",
        }
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

/// An asset emitted as its own file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFile {
    /// Output path relative to the output directory.
    pub file_name: String,
    pub bytes: Arc<[u8]>,
}

/// Result of transforming one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedOutput {
    pub kind: ModuleKind,
    /// Module code (CommonJS-style body or ESM to be linked).
    pub code: String,
    /// Stylesheet destined for the chunk's `.css` file.
    pub css: Option<String>,
    /// File to emit alongside the chunks.
    pub asset: Option<AssetFile>,
    /// Accepts hot updates without reloading importers.
    pub self_accepting: bool,
}

/// Transform one module's source.
pub fn transform(
    path: &Path,
    source: &[u8],
    rules: &RuleSet,
    ctx: &BuildContext,
) -> Result<TransformedOutput, TransformError> {
    let matched = rules.matching(path);
    let kind = ModuleKind::detect(path, matched.module_type);

    if kind == ModuleKind::Asset {
        let module_type = matched.module_type.unwrap_or(ModuleType::Asset);
        let threshold = matched.max_inline_size.unwrap_or(ctx.inline_threshold);
        return transform_asset(path, source, module_type, threshold, ctx);
    }

    let key = ctx.module_key(path);
    let cx = StageContext {
        build: ctx,
        path,
        key: &key,
    };

    let mut artifact = Artifact::new(String::from_utf8_lossy(source));
    let mut terminal = false;
    for stage in &matched.stages {
        tracing::trace!(module = %key, stage = stage.name(), "apply stage");
        artifact = stage
            .stage
            .apply(artifact, &stage.options, &cx)
            .map_err(|e| TransformError {
                module: path.to_path_buf(),
                stage: stage.name().to_string(),
                cause: e.message,
            })?;
        terminal |= matches!(stage.name(), stages::STYLE_INJECT | stages::STYLE_EXTRACT);
    }

    // A stylesheet chain without a style stage still has to become a module.
    if kind == ModuleKind::Style && !terminal {
        let (name, result) = if ctx.mode.is_production() {
            (
                stages::STYLE_EXTRACT,
                StyleExtractStage.apply(artifact, &serde_json::Value::Null, &cx),
            )
        } else {
            (
                stages::STYLE_INJECT,
                StyleInjectStage.apply(artifact, &serde_json::Value::Null, &cx),
            )
        };
        artifact = result.map_err(|e| TransformError {
            module: path.to_path_buf(),
            stage: name.to_string(),
            cause: e.message,
        })?;
    }

    let code = if kind == ModuleKind::Script {
        replace_defines(&artifact.code, &ctx.define)
    } else {
        artifact.code
    };

    Ok(TransformedOutput {
        kind,
        code,
        css: artifact.extracted_css,
        asset: None,
        self_accepting: artifact.self_accepting,
    })
}

/// Inline as a data URL or emit as a file. Inlining requires the size to be
/// strictly below `threshold`.
fn transform_asset(
    path: &Path,
    source: &[u8],
    module_type: ModuleType,
    threshold: u64,
    ctx: &BuildContext,
) -> Result<TransformedOutput, TransformError> {
    let ext = extension(path);
    let inline = match module_type {
        ModuleType::AssetInline => true,
        ModuleType::AssetResource => false,
        ModuleType::Asset => (source.len() as u64) < threshold,
    };

    let (url, asset) = if inline {
        let url = format!("data:{};base64,{}", mime_type(&ext), STANDARD.encode(source));
        (url, None)
    } else {
        let file_name = media_file_name(path, source, ctx);
        let url = format!("{}{}", ctx.public_path, file_name);
        let asset = AssetFile {
            file_name,
            bytes: Arc::from(source),
        };
        (url, Some(asset))
    };

    let literal = serde_json::to_string(&url).map_err(|e| TransformError {
        module: path.to_path_buf(),
        stage: "asset".to_string(),
        cause: e.to_string(),
    })?;

    Ok(TransformedOutput {
        kind: ModuleKind::Asset,
        code: format!("module.exports = {literal};\n"),
        css: None,
        asset,
        self_accepting: false,
    })
}

/// `static/media/<hash><.ext>` with hashing. Without it the name keeps the
/// file stem plus a short hash of the module key, so same-named files in
/// different directories stay apart.
fn media_file_name(path: &Path, source: &[u8], ctx: &BuildContext) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    let stem = if ctx.hashing() {
        packwork_util::hash::fingerprint(source, ctx.hash_length)
    } else {
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("asset");
        let key = ctx.module_key(path);
        format!("{stem}.{}", packwork_util::hash::fingerprint(key.as_bytes(), DEV_MEDIA_HASH_LENGTH))
    };
    format!("static/media/{stem}{ext}")
}

const DEV_MEDIA_HASH_LENGTH: usize = 8;

/// MIME type for data URLs.
#[must_use]
pub fn mime_type(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "bmp" => "image/bmp",
        "avif" => "image/avif",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "eot" => "application/vnd.ms-fontobject",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "ogg" => "audio/ogg",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}
