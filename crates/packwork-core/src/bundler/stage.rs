//! Transform stage interface.
//!
//! A stage turns one [`Artifact`] into another. Stages are looked up by name
//! once, when rules are built from configuration, and held as
//! `Arc<dyn Stage>` afterwards.
//!
//! ## Example
//!
//! ```ignore
//! struct Upper;
//!
//! impl Stage for Upper {
//!     fn name(&self) -> &str { "upper" }
//!
//!     fn apply(&self, input: Artifact, _options: &Value, _cx: &StageContext<'_>) -> Result<Artifact, StageError> {
//!         Ok(Artifact { code: input.code.to_uppercase(), ..input })
//!     }
//! }
//!
//! let mut catalog = StageCatalog::builtin();
//! catalog.register("upper", Arc::new(Upper));
//! ```

use super::stages;
use crate::config::{BuildContext, Mode};
use crate::error::ConfigError;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Value flowing between stages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifact {
    /// Module code (stylesheet text before a style stage, JS after).
    pub code: String,
    /// Stylesheet moved out of the module for the chunk's `.css` file.
    pub extracted_css: Option<String>,
    /// Module accepts hot updates without reloading its importers.
    pub self_accepting: bool,
}

impl Artifact {
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Default::default()
        }
    }
}

/// Per-module information available to stages.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub build: &'a BuildContext,
    /// Absolute module path.
    pub path: &'a Path,
    /// Project-relative module key.
    pub key: &'a str,
}

/// Stage failure. The pipeline wraps it into a `TransformError` naming
/// the stage and module.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct StageError {
    pub message: String,
}

impl StageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A content transform.
pub trait Stage: Send + Sync {
    /// Stage name used in configuration and error reports.
    fn name(&self) -> &str;

    /// Transform `input`. `options` is the JSON object from the rule (or
    /// `null`).
    fn apply(
        &self,
        input: Artifact,
        options: &Value,
        cx: &StageContext<'_>,
    ) -> Result<Artifact, StageError>;
}

/// A stage bound to the options of one rule.
#[derive(Clone)]
pub struct StageUse {
    pub stage: Arc<dyn Stage>,
    pub options: Value,
}

impl StageUse {
    #[must_use]
    pub fn new(stage: Arc<dyn Stage>, options: Value) -> Self {
        Self { stage, options }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.stage.name()
    }
}

impl fmt::Debug for StageUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageUse")
            .field("stage", &self.stage.name())
            .field("options", &self.options)
            .finish()
    }
}

/// Name → stage table. Holds the built-ins plus anything registered by the
/// embedding application (Less or Stylus compilers, a transpiler).
#[derive(Clone)]
pub struct StageCatalog {
    stages: FxHashMap<String, Arc<dyn Stage>>,
}

impl StageCatalog {
    /// Catalog with the built-in stages.
    #[must_use]
    pub fn builtin() -> Self {
        let mut catalog = Self {
            stages: FxHashMap::default(),
        };
        catalog.register(stages::CSS, Arc::new(stages::CssStage));
        catalog.register(stages::SASS, Arc::new(stages::SassStage));
        catalog.register(stages::STYLE_INJECT, Arc::new(stages::StyleInjectStage));
        catalog.register(stages::STYLE_EXTRACT, Arc::new(stages::StyleExtractStage));
        catalog.register(stages::DEFINE, Arc::new(stages::DefineStage));
        catalog.register(stages::REFRESH, Arc::new(stages::RefreshStage));
        catalog.register(stages::JSON, Arc::new(stages::JsonStage));
        catalog
    }

    /// Add or replace a stage.
    pub fn register(&mut self, name: &str, stage: Arc<dyn Stage>) {
        self.stages.insert(name.to_string(), stage);
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    /// Bind a configured stage name. `style` picks the inject or extract
    /// stage for the mode, and a trailing `-loader` is ignored.
    pub fn bind(&self, name: &str, options: Value, mode: Mode) -> Result<StageUse, ConfigError> {
        let name = name.strip_suffix("-loader").unwrap_or(name);
        let name = match name {
            "style" if mode.is_production() => stages::STYLE_EXTRACT,
            "style" => stages::STYLE_INJECT,
            other => other,
        };
        self.stages
            .get(name)
            .map(|stage| StageUse::new(Arc::clone(stage), options))
            .ok_or_else(|| ConfigError::UnknownStage {
                name: name.to_string(),
            })
    }
}

impl Default for StageCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for StageCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.stages.keys().collect();
        names.sort();
        f.debug_struct("StageCatalog").field("stages", &names).finish()
    }
}
