//! Development orchestration.
//!
//! The orchestrator keeps the latest build in memory and rebuilds
//! incrementally when files change: only invalidated modules are
//! re-transformed, everything else comes from the module cache. Each
//! rebuild yields a [`DevUpdate`] for the transport:
//!
//! - `Update` when every changed module accepts hot updates
//! - `Reload` when anything else changed
//! - `Error` when a module failed; the previous output stays served
//!
//! Transport (HTTP, websocket) is outside this crate; it gets
//! [`DevOrchestrator::serve`] for requests and the updates for pushing.

pub mod serve;
pub mod watch;

pub use serve::{resolve_request, Served};
pub use watch::{DevWatcher, WatchError, COALESCE_WINDOW};

use crate::bundler::emit::render_hot_update;
use crate::bundler::link::link_module;
use crate::bundler::{BuildOutput, Bundler};
use crate::config::DevServerConfig;
use crate::error::BuildError;
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A replacement module factory for a hot update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HotModule {
    /// Module id (project-relative key).
    pub key: String,
    /// Linked factory body.
    pub code: String,
}

/// What the page should do after a rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DevUpdate {
    /// Swap these modules in place.
    Update { modules: Vec<HotModule> },
    /// Reload the page.
    Reload,
    /// A module (or the build) failed. `module` is the failing module's key
    /// when known.
    Error {
        module: Option<String>,
        message: String,
    },
}

impl DevUpdate {
    /// Script applying an `Update` in the page.
    #[must_use]
    pub fn script(&self) -> Option<String> {
        match self {
            Self::Update { modules } => {
                let factories: Vec<(&str, &str)> = modules
                    .iter()
                    .map(|m| (m.key.as_str(), m.code.as_str()))
                    .collect();
                Some(render_hot_update(&factories))
            }
            Self::Reload | Self::Error { .. } => None,
        }
    }
}

/// In-memory development builds.
#[derive(Debug)]
pub struct DevOrchestrator {
    bundler: Bundler,
    server: DevServerConfig,
    current: Option<BuildOutput>,
    write: bool,
}

impl DevOrchestrator {
    #[must_use]
    pub fn new(bundler: Bundler, server: DevServerConfig) -> Self {
        Self {
            bundler,
            server,
            current: None,
            write: false,
        }
    }

    /// Also write every successful build to the output directory.
    #[must_use]
    pub fn with_write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    #[must_use]
    pub fn bundler(&self) -> &Bundler {
        &self.bundler
    }

    #[must_use]
    pub fn server(&self) -> &DevServerConfig {
        &self.server
    }

    /// Latest build, possibly with stale modules.
    #[must_use]
    pub fn current(&self) -> Option<&BuildOutput> {
        self.current.as_ref()
    }

    /// First build. Failing modules are kept as stale; only an unresolvable
    /// entry fails outright.
    pub fn initial_build(&mut self) -> Result<&BuildOutput, BuildError> {
        let output = self.bundler.rebuild(None)?;
        for module in output.graph.stale() {
            if let Some(err) = &module.stale {
                warn!(module = %module.key, error = %err, "module failed");
            }
        }
        info!(
            modules = output.graph.len(),
            files = output.files().len(),
            url = %format!("http://{}:{}{}", self.server.host, self.server.port, self.bundler.context().public_path),
            "dev build ready"
        );
        self.persist(&output);
        Ok(self.current.insert(output))
    }

    /// Drop cached modules for `paths` and rebuild.
    ///
    /// Returns `None` when the rebuild produced exactly the files already
    /// served.
    pub fn invalidate(&mut self, paths: &[PathBuf]) -> Option<DevUpdate> {
        let paths: Vec<PathBuf> = paths.iter().map(|p| normalize(p)).collect();
        let cache = self.bundler.cache();
        let mut structural = false;
        for path in &paths {
            let known = cache.invalidate(path);
            // New or removed files can change what specifiers resolve to.
            if !known || !path.exists() {
                structural = true;
            }
        }
        if structural {
            self.bundler.resolver().clear();
        }
        debug!(count = paths.len(), structural, "invalidated");

        let output = match self.bundler.rebuild(self.current.as_ref()) {
            Ok(output) => output,
            Err(err) => {
                warn!(code = err.code(), error = %err, "rebuild failed");
                return Some(DevUpdate::Error {
                    module: failing_module(&err, &self.bundler),
                    message: err.to_string(),
                });
            }
        };

        let first_stale = output.graph.stale().next();
        if let Some(module) = first_stale {
            let message = module
                .stale
                .as_ref()
                .map_or_else(String::new, ToString::to_string);
            warn!(module = %module.key, error = %message, "module failed");
            let update = DevUpdate::Error {
                module: Some(module.key.clone()),
                message,
            };
            self.persist(&output);
            self.current = Some(output);
            return Some(update);
        }

        let update = self
            .current
            .as_ref()
            .and_then(|previous| classify(previous, &output, &paths));
        if update.is_some() {
            self.persist(&output);
        }
        self.current = Some(output);
        if let Some(update) = &update {
            info!(
                update = match update {
                    DevUpdate::Update { .. } => "hot",
                    DevUpdate::Reload => "reload",
                    DevUpdate::Error { .. } => "error",
                },
                "rebuilt"
            );
        }
        update
    }

    fn persist(&self, output: &BuildOutput) {
        if !self.write {
            return;
        }
        if let Err(err) = self.bundler.write(output) {
            warn!(code = err.code(), error = %err, "failed to write dev output");
        }
    }

    /// Answer a request path from the latest build.
    #[must_use]
    pub fn serve(&self, request: &str) -> Option<Served> {
        let output = self.current.as_ref()?;
        resolve_request(
            output.files(),
            self.bundler.context(),
            self.server.history_api_fallback,
            request,
        )
    }

    /// Rebuild on every coalesced batch of file changes and forward the
    /// resulting updates. Runs until the watcher or the receiver goes away.
    ///
    /// Rebuilds run one at a time; changes made during a rebuild form the
    /// next batch.
    pub async fn run(&mut self, watcher: &mut DevWatcher, updates: mpsc::UnboundedSender<DevUpdate>) {
        while let Some(batch) = watcher.next_batch().await {
            // Rebuilds are CPU-bound; keep the other tasks on this runtime moving.
            let Some(update) = tokio::task::block_in_place(|| self.invalidate(&batch)) else {
                continue;
            };
            if updates.send(update).is_err() {
                debug!("update receiver closed");
                break;
            }
        }
    }
}

/// Decide between a hot update and a reload by comparing two successful
/// builds. `None` when no emitted file changed.
fn classify(previous: &BuildOutput, next: &BuildOutput, paths: &[PathBuf]) -> Option<DevUpdate> {
    let unchanged = previous.files().len() == next.files().len()
        && previous
            .files()
            .iter()
            .zip(next.files())
            .all(|(a, b)| a.path == b.path && a.contents == b.contents);
    if unchanged {
        return None;
    }

    let old_keys: FxHashSet<&str> = previous.graph.iter().map(|m| m.key.as_str()).collect();
    let new_keys: FxHashSet<&str> = next.graph.iter().map(|m| m.key.as_str()).collect();
    if old_keys != new_keys {
        return Some(DevUpdate::Reload);
    }

    let changed: Vec<_> = paths
        .iter()
        .filter_map(|p| next.graph.by_path(p))
        .collect();
    if changed.is_empty() || !changed.iter().all(|m| m.output().self_accepting) {
        return Some(DevUpdate::Reload);
    }

    // A module that gained or lost an import changes the graph shape even
    // when the module set is the same.
    let rewired = changed.iter().any(|m| {
        previous.graph.by_key(&m.key).map_or(true, |old| {
            old.specifier_keys(&previous.graph) != m.specifier_keys(&next.graph)
        })
    });
    if rewired {
        return Some(DevUpdate::Reload);
    }

    let modules = changed
        .into_iter()
        .map(|m| HotModule {
            key: m.key.clone(),
            code: link_module(&m.output().code, &m.specifier_keys(&next.graph)),
        })
        .collect();
    Some(DevUpdate::Update { modules })
}

fn failing_module(err: &BuildError, bundler: &Bundler) -> Option<String> {
    match err {
        BuildError::Graph(e) => e.chain.last().map(|p| bundler.context().module_key(p)),
        _ => None,
    }
}

fn normalize(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
