//! Code splitting and chunk generation.
//!
//! Every graph module lands in exactly one chunk:
//!
//! 1. one `runtime~<entry>` chunk per entry (loader only, no modules)
//! 2. cache groups, highest priority first, claim matching modules
//! 3. dynamic import targets not reachable statically from an entry become
//!    async roots with their own chunk
//! 4. remaining modules reachable from more than one root go to `common`,
//!    the rest to the single root that reaches them

use super::graph::{ModuleGraph, ModuleId};
use crate::config::CacheGroupConfig;
use crate::error::ConfigError;
use regex_lite::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

/// Index of a chunk in its chunk graph.
pub type ChunkId = usize;

/// Name of the chunk holding modules shared between roots.
pub const COMMON_CHUNK: &str = "common";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Runtime,
    Group,
    Common,
    Entry,
    Async,
}

impl ChunkKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Runtime => "runtime",
            Self::Group => "group",
            Self::Common => "common",
            Self::Entry => "entry",
            Self::Async => "async",
        }
    }

    /// Chunks loaded on demand or shared get the `.chunk` file suffix.
    #[must_use]
    pub fn is_split(&self) -> bool {
        matches!(self, Self::Group | Self::Common | Self::Async)
    }
}

/// A group of modules loaded together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: ChunkId,
    pub name: String,
    pub kind: ChunkKind,
    /// Modules in topological order.
    pub modules: Vec<ModuleId>,
    /// Entry names that load this chunk up front.
    pub entries: Vec<String>,
    /// Entry module or async split point.
    pub root: Option<ModuleId>,
    /// Chunks that must be loaded before this one runs.
    pub dependencies: Vec<ChunkId>,
}

/// A compiled cache group.
#[derive(Debug, Clone)]
pub struct CacheGroup {
    pub name: String,
    pub test: Regex,
    pub priority: i32,
}

impl CacheGroup {
    pub fn compile(config: &CacheGroupConfig) -> Result<Self, ConfigError> {
        let test = Regex::new(&config.test).map_err(|e| ConfigError::InvalidPattern {
            pattern: config.test.clone(),
            message: e.to_string(),
        })?;
        Ok(Self {
            name: config.name.clone(),
            test,
            priority: config.priority,
        })
    }

    /// Compile groups and order them by priority, highest first. Equal
    /// priorities keep declaration order.
    pub fn compile_all(configs: &[CacheGroupConfig]) -> Result<Vec<Self>, ConfigError> {
        let mut groups = configs
            .iter()
            .map(Self::compile)
            .collect::<Result<Vec<_>, _>>()?;
        groups.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(groups)
    }
}

/// Result of partitioning a module graph.
#[derive(Debug, Clone, Default)]
pub struct ChunkGraph {
    chunks: Vec<Chunk>,
    module_chunk: FxHashMap<ModuleId, ChunkId>,
}

impl ChunkGraph {
    #[must_use]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    #[must_use]
    pub fn get(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.name == name)
    }

    /// Chunk owning a module.
    #[must_use]
    pub fn chunk_of(&self, module: ModuleId) -> Option<ChunkId> {
        self.module_chunk.get(&module).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunks an entry needs at page load, in script order: runtime,
    /// shared chunks, then the entry chunk itself. An entry whose module is
    /// also another entry's module shares that entry's chunk.
    #[must_use]
    pub fn initial_chunks(&self, entry: &str) -> Vec<ChunkId> {
        let entry_chunks = || self.chunks.iter().filter(|c| c.kind == ChunkKind::Entry);
        let Some(entry_chunk) = entry_chunks()
            .find(|c| c.name == entry)
            .or_else(|| entry_chunks().find(|c| c.entries.iter().any(|e| e == entry)))
        else {
            return Vec::new();
        };
        let mut out = Vec::new();
        if let Some(runtime) = self.by_name(&runtime_name(entry)) {
            out.push(runtime.id);
        }
        out.extend(entry_chunk.dependencies.iter().copied());
        out.push(entry_chunk.id);
        out
    }
}

/// `runtime~<entry>`.
#[must_use]
pub fn runtime_name(entry: &str) -> String {
    format!("runtime~{entry}")
}

/// Partition `graph` into chunks. `groups` must already be in priority order
/// (see [`CacheGroup::compile_all`]).
#[must_use]
pub fn partition(graph: &ModuleGraph, groups: &[CacheGroup]) -> ChunkGraph {
    let order = graph.toposort();
    let mut position = vec![0usize; graph.len()];
    for (pos, &id) in order.iter().enumerate() {
        position[id] = pos;
    }

    let entry_modules: FxHashSet<ModuleId> = graph.entries().iter().map(|e| e.module).collect();

    // Cache group claims. Entry modules always stay with their entry.
    let mut group_of: FxHashMap<ModuleId, usize> = FxHashMap::default();
    for module in graph.iter() {
        if entry_modules.contains(&module.id) {
            continue;
        }
        let path = module.path.to_string_lossy().replace('\\', "/");
        if let Some(idx) = groups.iter().position(|g| g.test.is_match(&path)) {
            group_of.insert(module.id, idx);
        }
    }

    // Roots: entries first, then async split points in discovery order.
    let mut roots: Vec<ModuleId> = Vec::new();
    for entry in graph.entries() {
        if !roots.contains(&entry.module) {
            roots.push(entry.module);
        }
    }
    let statically_initial = static_closure(graph, &roots, &FxHashSet::default());
    for module in graph.iter() {
        for target in module.dynamic_dependencies() {
            if !group_of.contains_key(&target)
                && !statically_initial.contains(&target)
                && !roots.contains(&target)
            {
                roots.push(target);
            }
        }
    }
    let root_set: FxHashSet<ModuleId> = roots.iter().copied().collect();

    // Reach of each root, stopping at other roots.
    let reaches: Vec<FxHashSet<ModuleId>> = roots
        .iter()
        .map(|&root| {
            let others: FxHashSet<ModuleId> =
                root_set.iter().copied().filter(|&r| r != root).collect();
            static_closure(graph, &[root], &others)
        })
        .collect();

    let mut reach_count: FxHashMap<ModuleId, Vec<usize>> = FxHashMap::default();
    for (root_idx, reach) in reaches.iter().enumerate() {
        for &m in reach {
            reach_count.entry(m).or_default().push(root_idx);
        }
    }

    let mut chunks: Vec<Chunk> = Vec::new();
    for entry in graph.entries() {
        push_chunk(&mut chunks, runtime_name(&entry.name), ChunkKind::Runtime, None);
    }

    // Groups sharing a name share a chunk.
    let mut group_chunk: FxHashMap<usize, ChunkId> = FxHashMap::default();
    for (idx, group) in groups.iter().enumerate() {
        if !group_of.values().any(|&g| g == idx) {
            continue;
        }
        let existing = chunks
            .iter()
            .find(|c| c.kind == ChunkKind::Group && c.name == group.name)
            .map(|c| c.id);
        let id = match existing {
            Some(id) => id,
            None => push_chunk(&mut chunks, group.name.clone(), ChunkKind::Group, None),
        };
        group_chunk.insert(idx, id);
    }

    let needs_common = graph.iter().any(|m| {
        !group_of.contains_key(&m.id)
            && !root_set.contains(&m.id)
            && reach_count.get(&m.id).map_or(0, Vec::len) != 1
    });
    let common = needs_common
        .then(|| push_chunk(&mut chunks, COMMON_CHUNK.to_string(), ChunkKind::Common, None));

    let mut used_names: FxHashSet<String> = chunks.iter().map(|c| c.name.clone()).collect();
    used_names.extend(graph.entries().iter().map(|e| e.name.clone()));
    let mut root_chunk: Vec<ChunkId> = Vec::with_capacity(roots.len());
    for (idx, &root) in roots.iter().enumerate() {
        let id = match graph.entries().iter().find(|e| e.module == root) {
            Some(entry) => push_chunk(&mut chunks, entry.name.clone(), ChunkKind::Entry, Some(root)),
            None => {
                let stem = graph
                    .get(root)
                    .and_then(|m| m.path.file_stem())
                    .and_then(|s| s.to_str())
                    .unwrap_or("chunk")
                    .to_string();
                let name = unique_name(&stem, idx, &mut used_names);
                push_chunk(&mut chunks, name, ChunkKind::Async, Some(root))
            }
        };
        root_chunk.push(id);
    }

    // Assign every module.
    let mut module_chunk: FxHashMap<ModuleId, ChunkId> = FxHashMap::default();
    for &id in &order {
        let chunk = if let Some(idx) = roots.iter().position(|&r| r == id) {
            root_chunk[idx]
        } else if let Some(group) = group_of.get(&id) {
            group_chunk[group]
        } else {
            match (reach_count.get(&id).map(Vec::as_slice), common) {
                (Some([single]), _) => root_chunk[*single],
                (_, Some(common)) => common,
                (_, None) => continue,
            }
        };
        module_chunk.insert(id, chunk);
        chunks[chunk].modules.push(id);
    }
    for chunk in &mut chunks {
        chunk.modules.sort_by_key(|&m| position[m]);
    }

    // Root chunks depend on every other chunk their reach touches.
    for (idx, reach) in reaches.iter().enumerate() {
        let own = root_chunk[idx];
        let mut deps: Vec<ChunkId> = reach
            .iter()
            .filter_map(|m| module_chunk.get(m).copied())
            .filter(|&c| c != own)
            .collect();
        let root = roots[idx];
        for m in reach {
            if let Some(module) = graph.get(*m) {
                for dep in module.static_dependencies() {
                    if root_set.contains(&dep) && dep != root {
                        if let Some(c) = module_chunk.get(&dep) {
                            deps.push(*c);
                        }
                    }
                }
            }
        }
        deps.sort_unstable();
        deps.dedup();
        chunks[own].dependencies = deps;
    }

    // Entry names served up front.
    for (idx, entry) in graph.entries().iter().enumerate() {
        chunks[idx].entries.push(entry.name.clone());
        if let Some(pos) = roots.iter().position(|&r| r == entry.module) {
            let entry_chunk = root_chunk[pos];
            let deps = chunks[entry_chunk].dependencies.clone();
            for c in std::iter::once(entry_chunk).chain(deps) {
                if !chunks[c].entries.contains(&entry.name) {
                    chunks[c].entries.push(entry.name.clone());
                }
            }
        }
    }

    tracing::debug!(
        chunks = chunks.len(),
        async_roots = roots.len() - graph.entries().len().min(roots.len()),
        "partitioned"
    );
    ChunkGraph {
        chunks,
        module_chunk,
    }
}

fn push_chunk(
    chunks: &mut Vec<Chunk>,
    name: String,
    kind: ChunkKind,
    root: Option<ModuleId>,
) -> ChunkId {
    let id = chunks.len();
    chunks.push(Chunk {
        id,
        name,
        kind,
        modules: Vec::new(),
        entries: Vec::new(),
        root,
        dependencies: Vec::new(),
    });
    id
}

/// Modules statically reachable from `starts`, not entering `stop`.
fn static_closure(
    graph: &ModuleGraph,
    starts: &[ModuleId],
    stop: &FxHashSet<ModuleId>,
) -> FxHashSet<ModuleId> {
    let mut seen: FxHashSet<ModuleId> = FxHashSet::default();
    let mut stack: Vec<ModuleId> = starts.to_vec();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(module) = graph.get(id) {
            for dep in module.static_dependencies() {
                if !stop.contains(&dep) && !seen.contains(&dep) {
                    stack.push(dep);
                }
            }
        }
    }
    seen
}

fn unique_name(stem: &str, idx: usize, used: &mut FxHashSet<String>) -> String {
    let name = if used.contains(stem) {
        format!("{stem}-{idx}")
    } else {
        stem.to_string()
    };
    used.insert(name.clone());
    name
}
