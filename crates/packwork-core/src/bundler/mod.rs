//! Front-end bundler.
//!
//! ## Pipeline
//!
//! 1. **Resolve** - map specifiers to files (aliases, extension order,
//!    `node_modules`)
//! 2. **Transform** - run each module through its rule-matched stages
//! 3. **Graph** - breadth-first from the entries, transforms in parallel
//! 4. **Chunk** - runtime, cache group, common, entry and async chunks
//! 5. **Emit** - link modules, render chunks, minimize (production),
//!    fingerprint, then page and manifest
//!
//! ## Usage
//!
//! ```ignore
//! use packwork_core::bundler::Bundler;
//! use packwork_core::config::{BuildContext, Mode, ProjectConfig};
//!
//! let config = ProjectConfig::load(root, None)?;
//! let ctx = BuildContext::from_config(root, Mode::Production, &config);
//! let bundler = Bundler::new(ctx, &config)?;
//! let output = bundler.build()?;
//! bundler.write(&output)?;
//! ```

pub mod chunks;
pub mod emit;
pub mod graph;
pub mod html;
pub mod imports;
pub mod link;
pub mod optimize;
pub mod resolve;
pub mod rules;
pub mod sourcemap;
pub mod stage;
pub mod stages;
pub mod transform;

#[cfg(test)]
pub(crate) mod fixture;

pub use chunks::{partition, CacheGroup, Chunk, ChunkGraph, ChunkId, ChunkKind};
pub use emit::{AssetManifest, Emission, OutputFile, OutputKind};
pub use graph::{GraphBuilder, Module, ModuleCache, ModuleGraph, ModuleId};
pub use optimize::{AssetKind, Minimizer, Optimizer};
pub use resolve::Resolver;
pub use rules::RuleSet;
pub use stage::{Stage, StageCatalog};
pub use transform::ModuleKind;

use crate::config::{BuildContext, ProjectConfig};
use crate::error::{BuildError, ConfigError, EmitError, GraphError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of one build.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub graph: ModuleGraph,
    pub chunks: ChunkGraph,
    pub emission: Emission,
    pub duration: Duration,
}

impl BuildOutput {
    #[must_use]
    pub fn files(&self) -> &[OutputFile] {
        &self.emission.files
    }

    /// Whether any module failed in a tolerant build.
    #[must_use]
    pub fn has_stale(&self) -> bool {
        self.graph.stale().next().is_some()
    }
}

/// Compiled build setup: context, rules, cache groups and minimizers,
/// plus the module cache and resolver that persist across rebuilds.
#[derive(Debug)]
pub struct Bundler {
    ctx: BuildContext,
    entries: Vec<(String, String)>,
    rules: RuleSet,
    groups: Vec<CacheGroup>,
    optimizer: Optimizer,
    resolver: Resolver,
    cache: ModuleCache,
}

impl Bundler {
    /// Bundler with the built-in stages.
    pub fn new(ctx: BuildContext, config: &ProjectConfig) -> Result<Self, ConfigError> {
        Self::with_catalog(ctx, config, &StageCatalog::builtin())
    }

    /// Bundler with a custom stage catalog (external transpilers and
    /// preprocessors register there).
    pub fn with_catalog(
        ctx: BuildContext,
        config: &ProjectConfig,
        catalog: &StageCatalog,
    ) -> Result<Self, ConfigError> {
        let entries = config.entries();
        if entries.is_empty() {
            return Err(ConfigError::NoEntries);
        }
        let rules = RuleSet::for_project(config.rules.as_deref(), catalog, &ctx)?;
        let split = config.split_chunks.clone().unwrap_or_default();
        let groups = CacheGroup::compile_all(&split.cache_groups)?;
        let optimizer = Optimizer::for_context(&ctx);
        let resolver = Resolver::new(&ctx);

        tracing::debug!(
            mode = %ctx.mode,
            entries = entries.len(),
            rules = rules.rules().len(),
            groups = groups.len(),
            minimizers = ?optimizer.names(),
            "bundler configured"
        );
        Ok(Self {
            ctx,
            entries,
            rules,
            groups,
            optimizer,
            resolver,
            cache: ModuleCache::new(),
        })
    }

    /// Add a minimizer to the production pipeline. Development builds
    /// never minimize, so the minimizer is dropped there.
    #[must_use]
    pub fn minimizer(mut self, minimizer: Arc<dyn Minimizer>) -> Self {
        if self.ctx.mode.is_production() {
            self.optimizer.push(minimizer);
        } else {
            tracing::debug!(minimizer = minimizer.name(), "skipping minimizer outside production");
        }
        self
    }

    #[must_use]
    pub fn context(&self) -> &BuildContext {
        &self.ctx
    }

    #[must_use]
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    #[must_use]
    pub fn cache(&self) -> &ModuleCache {
        &self.cache
    }

    #[must_use]
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Build the module graph, failing on the first module error.
    pub fn build_graph(&self) -> Result<ModuleGraph, GraphError> {
        GraphBuilder::new(&self.ctx, &self.rules, &self.resolver, &self.cache).build(&self.entries)
    }

    /// Full build: graph, chunks, emission. Nothing is written.
    pub fn build(&self) -> Result<BuildOutput, BuildError> {
        let started = Instant::now();
        let graph = self.build_graph()?;
        self.finish(graph, started)
    }

    /// Build that keeps failing modules as stale, reusing their output from
    /// `previous` when there is one. Entry resolution failures still abort.
    pub fn rebuild(&self, previous: Option<&BuildOutput>) -> Result<BuildOutput, BuildError> {
        let started = Instant::now();
        let graph = GraphBuilder::new(&self.ctx, &self.rules, &self.resolver, &self.cache)
            .tolerant(previous.map(|p| &p.graph))
            .build(&self.entries)?;
        self.finish(graph, started)
    }

    fn finish(&self, graph: ModuleGraph, started: Instant) -> Result<BuildOutput, BuildError> {
        let chunks = partition(&graph, &self.groups);
        let emission = emit::emit(&graph, &chunks, &self.ctx, &self.optimizer)?;
        let duration = started.elapsed();
        tracing::info!(
            mode = %self.ctx.mode,
            modules = graph.len(),
            chunks = chunks.len(),
            files = emission.files.len(),
            duration_ms = duration.as_millis() as u64,
            "build finished"
        );
        Ok(BuildOutput {
            graph,
            chunks,
            emission,
            duration,
        })
    }

    /// Write a build's files to the output directory.
    pub fn write(&self, output: &BuildOutput) -> Result<(), EmitError> {
        emit::write(&output.emission.files, &self.ctx)
    }
}
