//! Module dependency graph.
//!
//! Built breadth-first from the entry points. Each BFS level is loaded and
//! transformed in parallel, then merged in frontier order so module ids are
//! the same on every run.

use super::imports::{scan_imports, ImportSpec};
use super::resolve::Resolver;
use super::rules::RuleSet;
use super::transform::{transform, ModuleKind, TransformedOutput};
use crate::config::{BuildContext, CONFIG_FILE};
use crate::error::{GraphError, ModuleError, ResolveError};
use dashmap::DashMap;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Index of a module in its graph.
pub type ModuleId = usize;

/// Loaded and transformed module, shared between graphs through the cache.
#[derive(Debug, Clone)]
pub struct ProcessedModule {
    pub source: Arc<[u8]>,
    pub output: TransformedOutput,
    /// Imports found in the transformed code.
    pub imports: Vec<ImportSpec>,
}

impl ProcessedModule {
    /// Stand-in for a module that never transformed successfully. Evaluating
    /// it throws the failure message.
    fn failed(message: &str) -> Self {
        let literal = serde_json::to_string(message).unwrap_or_else(|_| "\"\"".to_string());
        Self {
            source: Arc::from(Vec::<u8>::new()),
            output: TransformedOutput {
                kind: ModuleKind::Script,
                code: format!("throw new Error({literal});\n"),
                css: None,
                asset: None,
                self_accepting: false,
            },
            imports: Vec::new(),
        }
    }
}

/// Resolved import edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub specifier: String,
    pub target: ModuleId,
    pub dynamic: bool,
}

/// A module in the graph.
#[derive(Debug, Clone)]
pub struct Module {
    pub id: ModuleId,
    /// Canonical absolute path.
    pub path: PathBuf,
    /// Project-relative key, also the module's runtime id.
    pub key: String,
    pub processed: Arc<ProcessedModule>,
    /// Resolved imports in source order.
    pub dependencies: Vec<Dependency>,
    /// Latest failure for modules kept in a tolerant build.
    pub stale: Option<Arc<ModuleError>>,
}

impl Module {
    #[must_use]
    pub fn kind(&self) -> ModuleKind {
        self.processed.output.kind
    }

    #[must_use]
    pub fn output(&self) -> &TransformedOutput {
        &self.processed.output
    }

    pub fn static_dependencies(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.dependencies
            .iter()
            .filter(|d| !d.dynamic)
            .map(|d| d.target)
    }

    pub fn dynamic_dependencies(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.dependencies
            .iter()
            .filter(|d| d.dynamic)
            .map(|d| d.target)
    }

    /// Specifier → target key, as the linker wants it.
    #[must_use]
    pub fn specifier_keys(&self, graph: &ModuleGraph) -> FxHashMap<String, String> {
        self.dependencies
            .iter()
            .filter_map(|d| {
                graph
                    .get(d.target)
                    .map(|m| (d.specifier.clone(), m.key.clone()))
            })
            .collect()
    }
}

/// A named entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub name: String,
    pub module: ModuleId,
}

/// The module dependency graph.
#[derive(Debug, Default, Clone)]
pub struct ModuleGraph {
    modules: Vec<Module>,
    by_path: FxHashMap<PathBuf, ModuleId>,
    entries: Vec<EntryPoint>,
}

impl ModuleGraph {
    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(id)
    }

    #[must_use]
    pub fn by_path(&self, path: &Path) -> Option<&Module> {
        self.by_path.get(path).map(|&id| &self.modules[id])
    }

    #[must_use]
    pub fn by_key(&self, key: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.key == key)
    }

    #[must_use]
    pub fn entries(&self) -> &[EntryPoint] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter()
    }

    /// Modules whose latest transform failed.
    pub fn stale(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter().filter(|m| m.stale.is_some())
    }

    /// Modules that import `id`, statically or dynamically.
    #[must_use]
    pub fn importers(&self, id: ModuleId) -> Vec<ModuleId> {
        self.modules
            .iter()
            .filter(|m| m.dependencies.iter().any(|d| d.target == id))
            .map(|m| m.id)
            .collect()
    }

    /// Dependencies before dependents over static edges. Modules left over
    /// by a cycle are appended in id (discovery) order.
    #[must_use]
    pub fn toposort(&self) -> Vec<ModuleId> {
        let n = self.modules.len();
        let mut in_degree = vec![0usize; n];
        let mut dependents: Vec<Vec<ModuleId>> = vec![Vec::new(); n];

        for module in &self.modules {
            let mut seen = Vec::new();
            for dep in module.static_dependencies() {
                if dep != module.id && !seen.contains(&dep) {
                    seen.push(dep);
                    dependents[dep].push(module.id);
                    in_degree[module.id] += 1;
                }
            }
        }

        let mut queue: VecDeque<ModuleId> = (0..n).filter(|&id| in_degree[id] == 0).collect();
        let mut placed = vec![false; n];
        let mut order = Vec::with_capacity(n);

        while let Some(id) = queue.pop_front() {
            placed[id] = true;
            order.push(id);
            for &next in &dependents[id] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() < n {
            order.extend((0..n).filter(|&id| !placed[id]));
        }
        order
    }
}

type Claim = Result<Arc<ProcessedModule>, Arc<ModuleError>>;

/// Memo of processed modules keyed by canonical path.
///
/// The first caller for a path loads and transforms it; concurrent callers
/// for the same path wait on the same cell. Failures are cached too, until
/// the path is invalidated.
#[derive(Debug, Default)]
pub struct ModuleCache {
    cells: DashMap<PathBuf, Arc<OnceLock<Claim>>>,
    transforms: AtomicUsize,
}

impl ModuleCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_process(&self, path: &Path, rules: &RuleSet, ctx: &BuildContext) -> Claim {
        // Clone the cell out so the shard lock is released before transforming.
        let cell = self.cells.entry(path.to_path_buf()).or_default().clone();
        cell.get_or_init(|| self.process(path, rules, ctx)).clone()
    }

    fn process(&self, path: &Path, rules: &RuleSet, ctx: &BuildContext) -> Claim {
        self.transforms.fetch_add(1, Ordering::Relaxed);
        let source = std::fs::read(path).map_err(|source| {
            Arc::new(ModuleError::Read {
                path: path.to_path_buf(),
                source,
            })
        })?;
        let output =
            transform(path, &source, rules, ctx).map_err(|e| Arc::new(ModuleError::from(e)))?;
        let imports = if output.kind == ModuleKind::Script {
            scan_imports(&output.code)
        } else {
            Vec::new()
        };
        tracing::debug!(module = %ctx.module_key(path), imports = imports.len(), "processed");
        Ok(Arc::new(ProcessedModule {
            source: Arc::from(source),
            output,
            imports,
        }))
    }

    /// Drop the entry for `path`. Returns whether one existed.
    pub fn invalidate(&self, path: &Path) -> bool {
        self.cells.remove(path).is_some()
    }

    pub fn clear(&self) {
        self.cells.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Number of load+transform runs performed so far.
    #[must_use]
    pub fn transforms(&self) -> usize {
        self.transforms.load(Ordering::Relaxed)
    }
}

struct Slot {
    path: PathBuf,
    key: String,
    parent: Option<ModuleId>,
    processed: Option<Arc<ProcessedModule>>,
    dependencies: Vec<Dependency>,
    stale: Option<Arc<ModuleError>>,
}

type LevelResult = Result<(Arc<ProcessedModule>, Vec<Result<PathBuf, ResolveError>>), Arc<ModuleError>>;

/// Builds a [`ModuleGraph`] from entry points.
pub struct GraphBuilder<'a> {
    ctx: &'a BuildContext,
    rules: &'a RuleSet,
    resolver: &'a Resolver,
    cache: &'a ModuleCache,
    tolerant: bool,
    previous: Option<&'a ModuleGraph>,
}

impl<'a> GraphBuilder<'a> {
    #[must_use]
    pub fn new(
        ctx: &'a BuildContext,
        rules: &'a RuleSet,
        resolver: &'a Resolver,
        cache: &'a ModuleCache,
    ) -> Self {
        Self {
            ctx,
            rules,
            resolver,
            cache,
            tolerant: false,
            previous: None,
        }
    }

    /// Keep failing modules in the graph as stale instead of aborting.
    /// Stale modules reuse their output from `previous` when present.
    #[must_use]
    pub fn tolerant(mut self, previous: Option<&'a ModuleGraph>) -> Self {
        self.tolerant = true;
        self.previous = previous;
        self
    }

    /// Build the graph for `(name, specifier)` entries. Entry specifiers
    /// resolve relative to the project root.
    pub fn build(&self, entries: &[(String, String)]) -> Result<ModuleGraph, GraphError> {
        let anchor = self.ctx.root.join(CONFIG_FILE);
        let mut slots: Vec<Slot> = Vec::new();
        let mut by_path: FxHashMap<PathBuf, ModuleId> = FxHashMap::default();
        let mut entry_points = Vec::new();
        let mut frontier = Vec::new();

        for (name, specifier) in entries {
            let path = self
                .resolver
                .resolve(specifier, &anchor)
                .map_err(|e| GraphError {
                    chain: Vec::new(),
                    source: Arc::new(e.into()),
                })?;
            let (id, new) = self.intern(&mut slots, &mut by_path, path, None);
            if new {
                frontier.push(id);
            }
            entry_points.push(EntryPoint {
                name: name.clone(),
                module: id,
            });
        }

        while !frontier.is_empty() {
            let paths: Vec<&Path> = frontier.iter().map(|&id| slots[id].path.as_path()).collect();
            let results: Vec<LevelResult> = paths.par_iter().map(|path| self.load(path)).collect();

            let mut next = Vec::new();
            for (&id, result) in frontier.iter().zip(results) {
                let (processed, resolved) = match result {
                    Ok(loaded) => loaded,
                    Err(err) => {
                        if !self.tolerant {
                            return Err(GraphError {
                                chain: chain(&slots, id),
                                source: err,
                            });
                        }
                        tracing::warn!(module = %slots[id].key, error = %err, "module failed, keeping stale");
                        let fallback = self.fallback(&slots[id].path, &err);
                        let resolved = fallback
                            .imports
                            .iter()
                            .map(|imp| self.resolver.resolve(&imp.specifier, &slots[id].path))
                            .collect();
                        slots[id].stale = Some(err);
                        (fallback, resolved)
                    }
                };

                let mut dependencies = Vec::with_capacity(processed.imports.len());
                for (import, target) in processed.imports.iter().zip(resolved) {
                    match target {
                        Ok(target) => {
                            let (target_id, new) =
                                self.intern(&mut slots, &mut by_path, target, Some(id));
                            if new {
                                next.push(target_id);
                            }
                            dependencies.push(Dependency {
                                specifier: import.specifier.clone(),
                                target: target_id,
                                dynamic: import.dynamic,
                            });
                        }
                        Err(err) => {
                            let err = Arc::new(ModuleError::from(err));
                            if !self.tolerant {
                                return Err(GraphError {
                                    chain: chain(&slots, id),
                                    source: err,
                                });
                            }
                            tracing::warn!(module = %slots[id].key, error = %err, "unresolved import");
                            slots[id].stale.get_or_insert(err);
                        }
                    }
                }

                let slot = &mut slots[id];
                slot.processed = Some(processed);
                slot.dependencies = dependencies;
            }
            frontier = next;
        }

        let modules: Vec<Module> = slots
            .into_iter()
            .enumerate()
            .map(|(id, slot)| Module {
                id,
                processed: slot
                    .processed
                    .unwrap_or_else(|| Arc::new(ProcessedModule::failed("module was not loaded"))),
                path: slot.path,
                key: slot.key,
                dependencies: slot.dependencies,
                stale: slot.stale,
            })
            .collect();

        tracing::debug!(modules = modules.len(), entries = entry_points.len(), "graph built");
        Ok(ModuleGraph {
            modules,
            by_path,
            entries: entry_points,
        })
    }

    fn load(&self, path: &Path) -> LevelResult {
        let processed = self.cache.get_or_process(path, self.rules, self.ctx)?;
        let resolved = processed
            .imports
            .iter()
            .map(|imp| self.resolver.resolve(&imp.specifier, path))
            .collect();
        Ok((processed, resolved))
    }

    fn fallback(&self, path: &Path, err: &ModuleError) -> Arc<ProcessedModule> {
        self.previous
            .and_then(|g| g.by_path(path))
            .map(|m| Arc::clone(&m.processed))
            .unwrap_or_else(|| Arc::new(ProcessedModule::failed(&err.to_string())))
    }

    fn intern(
        &self,
        slots: &mut Vec<Slot>,
        by_path: &mut FxHashMap<PathBuf, ModuleId>,
        path: PathBuf,
        parent: Option<ModuleId>,
    ) -> (ModuleId, bool) {
        if let Some(&id) = by_path.get(&path) {
            return (id, false);
        }
        let id = slots.len();
        by_path.insert(path.clone(), id);
        slots.push(Slot {
            key: self.ctx.module_key(&path),
            path,
            parent,
            processed: None,
            dependencies: Vec::new(),
            stale: None,
        });
        (id, true)
    }
}

/// Paths from the entry that first reached `id` down to `id`.
fn chain(slots: &[Slot], id: ModuleId) -> Vec<PathBuf> {
    let mut out = vec![slots[id].path.clone()];
    let mut current = slots[id].parent;
    while let Some(p) = current {
        out.push(slots[p].path.clone());
        current = slots[p].parent;
    }
    out.reverse();
    out
}
