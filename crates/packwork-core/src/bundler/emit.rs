//! Asset emission.
//!
//! Renders each chunk into a script that pushes its module factories onto a
//! shared queue, extracts chunk stylesheets, copies media and public files,
//! and writes the page and the asset manifest.
//!
//! ## Output layout
//!
//! | file | development | production |
//! |---|---|---|
//! | entry / runtime chunk | `static/js/<name>.js` | `static/js/<name>.<hash>.js` |
//! | split chunk | `static/js/<name>.chunk.js` | `static/js/<name>.<hash>.chunk.js` |
//! | stylesheet | `static/css/<name>.css` | `static/css/<name>.<hash>.css` |
//! | media | `static/media/<stem>.<key hash><ext>` | `static/media/<hash><ext>` |
//!
//! With source maps on, every script or stylesheet that carries module code
//! gets a `<file>.map` next to it and a trailing `sourceMappingURL` comment.
//! The fingerprint covers the file without that comment.

use super::chunks::{Chunk, ChunkGraph, ChunkKind};
use super::graph::{Module, ModuleGraph};
use super::html::{render_page, PageAssets};
use super::link::{link_module_mapped, Linked};
use super::optimize::{AssetKind, Optimizer};
use super::sourcemap::{mapping_url_comment, LineOrigin, MappedText};
use super::transform::ModuleKind;
use crate::config::BuildContext;
use crate::error::{BuildError, ConfigError, EmitError};
use packwork_util::hash::fingerprint;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use walkdir::WalkDir;

/// Global array chunks push themselves onto.
pub const CHUNK_QUEUE: &str = "packworkChunks";

pub const MANIFEST_FILE: &str = "asset-manifest.json";

pub const HTML_FILE: &str = "index.html";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Script,
    Style,
    Media,
    Html,
    Manifest,
    Public,
    SourceMap,
}

/// One file to write under the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    /// Relative path with `/` separators.
    pub path: String,
    pub contents: Arc<[u8]>,
    pub kind: OutputKind,
    /// Chunk the file was rendered from.
    pub chunk: Option<String>,
}

impl OutputFile {
    #[must_use]
    pub fn size(&self) -> usize {
        self.contents.len()
    }
}

/// `asset-manifest.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetManifest {
    /// Logical name → public URL.
    pub files: BTreeMap<String, String>,
    /// Entry name → initial files (relative paths) in load order.
    pub entrypoints: BTreeMap<String, Vec<String>>,
}

/// Files rendered for one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFiles {
    pub js: String,
    pub css: Option<String>,
}

/// Everything one build emits.
#[derive(Debug, Clone, Default)]
pub struct Emission {
    pub files: Vec<OutputFile>,
    pub manifest: AssetManifest,
    chunk_files: Vec<Option<ChunkFiles>>,
}

impl Emission {
    /// Output paths for a chunk.
    #[must_use]
    pub fn chunk_files(&self, chunk: usize) -> Option<&ChunkFiles> {
        self.chunk_files.get(chunk).and_then(Option::as_ref)
    }

    #[must_use]
    pub fn file(&self, path: &str) -> Option<&OutputFile> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Total bytes across all files.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.files.iter().map(OutputFile::size).sum()
    }
}

/// A rendered file after minimizing and naming.
struct Finished {
    path: String,
    bytes: Vec<u8>,
    /// `<path>.map` and its JSON.
    map: Option<(String, Vec<u8>)>,
}

struct RenderedChunk {
    js: Finished,
    css: Option<Finished>,
}

/// Render every output file for a partitioned graph.
///
/// Minimizers run on each rendered file before its name is fingerprinted.
/// Runtime chunks are rendered last because they embed the other chunks'
/// file names.
pub fn emit(
    graph: &ModuleGraph,
    chunks: &ChunkGraph,
    ctx: &BuildContext,
    optimizer: &Optimizer,
) -> Result<Emission, BuildError> {
    let modules: Vec<_> = graph.iter().collect();
    let linked: Vec<Linked> = modules
        .par_iter()
        .map(|m| link_module_mapped(&m.output().code, &m.specifier_keys(graph)))
        .collect();

    let mut rendered: Vec<Option<RenderedChunk>> = (0..chunks.len()).map(|_| None).collect();

    for chunk in chunks.chunks().iter().filter(|c| c.kind != ChunkKind::Runtime) {
        let entry_key = match chunk.kind {
            ChunkKind::Entry => chunk.root.and_then(|r| graph.get(r)).map(|m| m.key.as_str()),
            _ => None,
        };
        let deps: Vec<&str> = chunk
            .dependencies
            .iter()
            .filter_map(|&d| chunks.get(d))
            .map(|c| c.name.as_str())
            .collect();
        let factories: Vec<(&Module, &Linked)> = chunk
            .modules
            .iter()
            .filter_map(|&id| graph.get(id).map(|m| (m, &linked[id])))
            .collect();

        let js = render_chunk_mapped(&chunk.name, &factories, entry_key, &deps, ctx.source_maps);
        let js = finish(chunk, "js", js, AssetKind::Script, ctx, optimizer)?;

        let css = render_stylesheet(chunk, graph, ctx.source_maps)
            .map(|css| finish(chunk, "css", css, AssetKind::Style, ctx, optimizer))
            .transpose()?;
        rendered[chunk.id] = Some(RenderedChunk { js, css });
    }

    let url = |path: &str| format!("{}{}", ctx.public_path, path);
    let mut js_files = BTreeMap::new();
    let mut css_files = BTreeMap::new();
    for chunk in chunks.chunks() {
        if let Some(r) = &rendered[chunk.id] {
            js_files.insert(chunk.name.clone(), url(&r.js.path));
            if let Some(css) = &r.css {
                css_files.insert(chunk.name.clone(), url(&css.path));
            }
        }
    }
    let mut async_roots = BTreeMap::new();
    let mut chunk_deps = BTreeMap::new();
    for chunk in chunks.chunks().iter().filter(|c| c.kind == ChunkKind::Async) {
        if let Some(root) = chunk.root.and_then(|r| graph.get(r)) {
            async_roots.insert(root.key.clone(), chunk.name.clone());
        }
        let deps: Vec<String> = chunk
            .dependencies
            .iter()
            .filter_map(|&d| chunks.get(d))
            .map(|c| c.name.clone())
            .collect();
        chunk_deps.insert(chunk.name.clone(), deps);
    }
    let runtime_maps = RuntimeMaps {
        js_files: &js_files,
        css_files: &css_files,
        async_roots: &async_roots,
        chunk_deps: &chunk_deps,
    };

    for chunk in chunks.chunks().iter().filter(|c| c.kind == ChunkKind::Runtime) {
        let mut js = MappedText::new();
        js.push_unmapped(&render_runtime(&runtime_maps, !ctx.mode.is_production()));
        let js = finish(chunk, "js", js, AssetKind::Script, ctx, optimizer)?;
        rendered[chunk.id] = Some(RenderedChunk { js, css: None });
    }

    let mut files = Vec::new();
    let mut manifest = AssetManifest::default();
    let mut chunk_files = vec![None; chunks.len()];
    for chunk in chunks.chunks() {
        let Some(r) = rendered[chunk.id].take() else {
            continue;
        };
        let mut add = |ext: &str, file: Finished, kind: OutputKind| {
            let name = format!("{}.{ext}", chunk.name);
            manifest.files.insert(name.clone(), url(&file.path));
            files.push(OutputFile {
                path: file.path.clone(),
                contents: Arc::from(file.bytes),
                kind,
                chunk: Some(chunk.name.clone()),
            });
            if let Some((map_path, map)) = file.map {
                manifest.files.insert(format!("{name}.map"), url(&map_path));
                files.push(OutputFile {
                    path: map_path,
                    contents: Arc::from(map),
                    kind: OutputKind::SourceMap,
                    chunk: Some(chunk.name.clone()),
                });
            }
            file.path
        };
        let js = add("js", r.js, OutputKind::Script);
        let css = r.css.map(|css| add("css", css, OutputKind::Style));
        chunk_files[chunk.id] = Some(ChunkFiles { js, css });
    }

    // Media files. Modules with identical bytes may share a file; different
    // bytes under one name is an error.
    let mut media: FxHashMap<&str, &[u8]> = FxHashMap::default();
    for module in graph.iter() {
        let Some(asset) = &module.output().asset else {
            continue;
        };
        manifest
            .files
            .insert(module.key.clone(), url(&asset.file_name));
        if let Some(existing) = media.get(asset.file_name.as_str()) {
            if *existing != &*asset.bytes {
                return Err(EmitError::Conflict {
                    path: asset.file_name.clone(),
                }
                .into());
            }
            continue;
        }
        media.insert(&asset.file_name, &asset.bytes);
        let bytes = optimizer.run(AssetKind::Media, &asset.file_name, asset.bytes.to_vec())?;
        files.push(OutputFile {
            path: asset.file_name.clone(),
            contents: Arc::from(bytes),
            kind: OutputKind::Media,
            chunk: None,
        });
    }

    for entry in graph.entries() {
        let initial: Vec<String> = chunks
            .initial_chunks(&entry.name)
            .into_iter()
            .filter_map(|id| chunk_files[id].as_ref())
            .flat_map(|f| f.css.iter().chain(std::iter::once(&f.js)).cloned())
            .collect();
        manifest.entrypoints.insert(entry.name.clone(), initial);
    }

    let template_path = ctx.public_dir.join(HTML_FILE);
    if template_path.is_file() {
        let template = std::fs::read_to_string(&template_path).map_err(|source| EmitError::Read {
            path: template_path.clone(),
            source,
        })?;
        let mut assets = PageAssets::default();
        for entry in graph.entries() {
            for id in chunks.initial_chunks(&entry.name) {
                let Some(f) = &chunk_files[id] else { continue };
                let js = url(&f.js);
                if !assets.scripts.contains(&js) {
                    assets.scripts.push(js);
                }
                if let Some(css) = &f.css {
                    let css = url(css);
                    if !assets.styles.contains(&css) {
                        assets.styles.push(css);
                    }
                }
            }
        }
        let page = render_page(&template, &assets, &ctx.public_path);
        manifest.files.insert(HTML_FILE.to_string(), url(HTML_FILE));
        files.push(OutputFile {
            path: HTML_FILE.to_string(),
            contents: Arc::from(page.into_bytes()),
            kind: OutputKind::Html,
            chunk: None,
        });
    }

    if ctx.mode.is_production() {
        for (path, bytes) in collect_public(ctx)? {
            if files.iter().any(|f| f.path == path) {
                continue;
            }
            manifest.files.insert(path.clone(), url(&path));
            files.push(OutputFile {
                path,
                contents: Arc::from(bytes),
                kind: OutputKind::Public,
                chunk: None,
            });
        }
    }

    let manifest_json = serde_json::to_vec_pretty(&manifest).map_err(|e| EmitError::Write {
        path: ctx.out_dir.join(MANIFEST_FILE),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;
    files.push(OutputFile {
        path: MANIFEST_FILE.to_string(),
        contents: Arc::from(manifest_json),
        kind: OutputKind::Manifest,
        chunk: None,
    });

    tracing::debug!(files = files.len(), "emitted");
    Ok(Emission {
        files,
        manifest,
        chunk_files,
    })
}

/// Minimize, then name with the content fingerprint. Files with mapped
/// sources also get their map.
fn finish(
    chunk: &Chunk,
    ext: &str,
    text: MappedText,
    kind: AssetKind,
    ctx: &BuildContext,
    optimizer: &Optimizer,
) -> Result<Finished, BuildError> {
    let label = format!("{}.{ext}", chunk.name);
    let (code, sources, lines) = text.into_parts();
    let name = |bytes: &[u8]| {
        let hash = ctx
            .hashing()
            .then(|| fingerprint(bytes, ctx.hash_length));
        chunk_file_name(&chunk.name, ext, chunk.kind.is_split(), hash.as_deref())
    };

    if !ctx.source_maps || sources.sources.is_empty() {
        let bytes = optimizer.run(kind, &label, code.into_bytes())?;
        return Ok(Finished {
            path: name(&bytes),
            bytes,
            map: None,
        });
    }

    let (mut bytes, lines) = optimizer.run_mapped(kind, &label, code.into_bytes(), lines)?;
    let path = name(&bytes);
    let map_path = format!("{path}.map");
    let file_name = path.rsplit('/').next().unwrap_or(&path);
    let map = sources
        .into_map(file_name, &lines)
        .to_json()
        .map_err(|e| EmitError::Write {
            path: ctx.out_dir.join(&map_path),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
    if !bytes.is_empty() && !bytes.ends_with(b"\n") {
        bytes.push(b'\n');
    }
    bytes.extend_from_slice(mapping_url_comment(&map_path, kind == AssetKind::Style).as_bytes());
    Ok(Finished {
        path,
        bytes,
        map: Some((map_path, map)),
    })
}

/// Origins for a script module's linked lines. Script stages keep line
/// positions, so linked line `n` came from source line `n`. Other module
/// kinds are wrappers the bundler wrote and stay unmapped.
fn module_origins(text: &mut MappedText, module: &Module, linked: &Linked) -> Vec<Option<LineOrigin>> {
    if module.kind() != ModuleKind::Script || module.processed.source.is_empty() {
        return Vec::new();
    }
    let content = String::from_utf8_lossy(&module.processed.source).into_owned();
    let line_count = content.lines().count();
    let source = text.add_source(&module.key, Some(content));
    linked
        .lines
        .iter()
        .map(|line| {
            let line = (*line).filter(|&l| l < line_count)?;
            Some(LineOrigin {
                source,
                line: u32::try_from(line).ok()?,
            })
        })
        .collect()
}

/// Chunk stylesheet: module styles in chunk order. Every line of a module's
/// block maps to the start of that module's source.
fn render_stylesheet(chunk: &Chunk, graph: &ModuleGraph, maps: bool) -> Option<MappedText> {
    let mut text = MappedText::new();
    let mut any = false;
    for module in chunk.modules.iter().filter_map(|&id| graph.get(id)) {
        let Some(css) = module.output().css.as_deref() else {
            continue;
        };
        any = true;
        let origins = if maps {
            let content = String::from_utf8_lossy(&module.processed.source).into_owned();
            let source = text.add_source(&module.key, Some(content));
            vec![Some(LineOrigin { source, line: 0 }); css.lines().count().max(1)]
        } else {
            Vec::new()
        };
        text.push_mapped(css, &origins);
    }
    any.then_some(text)
}

/// `static/<ext>/<name>[.<hash>][.chunk].<ext>`.
#[must_use]
pub fn chunk_file_name(name: &str, ext: &str, split: bool, hash: Option<&str>) -> String {
    let mut file = format!("static/{ext}/{name}");
    if let Some(hash) = hash {
        file.push('.');
        file.push_str(hash);
    }
    if split {
        file.push_str(".chunk");
    }
    file.push('.');
    file.push_str(ext);
    file
}

fn json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Render a chunk script.
///
/// ```text
/// (self["packworkChunks"] = self["packworkChunks"] || []).push([["main"], {
/// "src/main.js": function (module, exports, require) {
/// ...
/// },
/// }, "src/main.js", ["chunk-libs"]]);
/// ```
#[must_use]
pub fn render_chunk(
    name: &str,
    factories: &[(&str, &str)],
    entry: Option<&str>,
    deps: &[&str],
) -> String {
    let mut text = MappedText::new();
    text.push_unmapped(&chunk_open(name));
    for (key, code) in factories {
        text.push_unmapped(&factory_open(key));
        text.push_mapped(code, &[]);
        text.push_unmapped("},\n");
    }
    text.push_unmapped(&chunk_close(entry, deps));
    text.into_parts().0
}

/// [`render_chunk`] over linked modules, with line origins when `maps`.
fn render_chunk_mapped(
    name: &str,
    factories: &[(&Module, &Linked)],
    entry: Option<&str>,
    deps: &[&str],
    maps: bool,
) -> MappedText {
    let mut text = MappedText::new();
    text.push_unmapped(&chunk_open(name));
    for (module, linked) in factories {
        text.push_unmapped(&factory_open(&module.key));
        let origins = if maps {
            module_origins(&mut text, module, linked)
        } else {
            Vec::new()
        };
        text.push_mapped(&linked.code, &origins);
        text.push_unmapped("},\n");
    }
    text.push_unmapped(&chunk_close(entry, deps));
    text
}

fn chunk_open(name: &str) -> String {
    format!(
        "(self[\"{CHUNK_QUEUE}\"] = self[\"{CHUNK_QUEUE}\"] || []).push([[{}], {{\n",
        json(name)
    )
}

fn factory_open(key: &str) -> String {
    format!("{}: function (module, exports, require) {{\n", json(key))
}

fn chunk_close(entry: Option<&str>, deps: &[&str]) -> String {
    match entry {
        Some(entry) => format!("}}, {}, {}]);\n", json(entry), json(deps)),
        None => "}]);\n".to_string(),
    }
}

/// Script that swaps module factories in a running development page:
/// `self.__packworkHot.apply({ "<key>": function (module, exports, require) { ... } })`.
#[must_use]
pub fn render_hot_update(factories: &[(&str, &str)]) -> String {
    let mut out = String::from("self.__packworkHot.apply({\n");
    for (key, code) in factories {
        out.push_str(&json(*key));
        out.push_str(": function (module, exports, require) {\n");
        out.push_str(code);
        if !code.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("},\n");
    }
    out.push_str("});\n");
    out
}

struct RuntimeMaps<'a> {
    js_files: &'a BTreeMap<String, String>,
    css_files: &'a BTreeMap<String, String>,
    async_roots: &'a BTreeMap<String, String>,
    chunk_deps: &'a BTreeMap<String, Vec<String>>,
}

const RUNTIME_HEAD: &str = r#"(function () {
  var queueName = "__QUEUE__";
  // Every runtime of a build carries the same maps; the first one loaded
  // serves the whole page.
  if (self[queueName] && self[queueName].ready) return;
  var jsFiles = __JS_FILES__;
  var cssFiles = __CSS_FILES__;
  var asyncChunks = __ASYNC_CHUNKS__;
  var chunkDeps = __CHUNK_DEPS__;
  var factories = {};
  var cache = {};
  var installed = {};
  var loading = {};
  var pending = [];

  function require(id) {
    var cached = cache[id];
    if (cached) return cached.exports;
    var factory = factories[id];
    if (!factory) throw new Error("Cannot find module '" + id + "'");
    var module = (cache[id] = { id: id, exports: {} });
"#;

const RUNTIME_HOT_REQUIRE: &str = r#"    module.hot = createHot(id);
"#;

const RUNTIME_BODY: &str = r#"    factory.call(module.exports, module, module.exports, require);
    return module.exports;
  }

  require.i = function (m) {
    return m && m.__esModule ? m["default"] : m;
  };

  require.load = function (id) {
    var name = asyncChunks[id];
    var names = name ? (chunkDeps[name] || []).concat([name]) : [];
    return Promise.all(names.map(loadChunk)).then(function () {
      return require(id);
    });
  };

  function loadChunk(name) {
    if (installed[name]) return Promise.resolve();
    if (loading[name]) return loading[name];
    var parts = [];
    if (cssFiles[name]) parts.push(appendTag("link", cssFiles[name], name));
    if (jsFiles[name]) parts.push(appendTag("script", jsFiles[name], name));
    loading[name] = Promise.all(parts);
    return loading[name];
  }

  function appendTag(tag, url, name) {
    return new Promise(function (resolve, reject) {
      var el = document.createElement(tag);
      if (tag === "link") {
        el.rel = "stylesheet";
        el.href = url;
      } else {
        el.src = url;
      }
      el.onload = resolve;
      el.onerror = function () {
        delete loading[name];
        reject(new Error("Loading chunk " + name + " failed (" + url + ")"));
      };
      document.head.appendChild(el);
    });
  }

  function install(item) {
    var names = item[0];
    var more = item[1];
    for (var id in more) factories[id] = more[id];
    for (var i = 0; i < names.length; i++) installed[names[i]] = true;
    if (item[2]) pending.push(item);
    runReady();
  }

  function runReady() {
    var waiting = [];
    var ready = [];
    pending.forEach(function (item) {
      var deps = item[3] || [];
      for (var i = 0; i < deps.length; i++) {
        if (!installed[deps[i]]) {
          waiting.push(item);
          return;
        }
      }
      ready.push(item);
    });
    pending = waiting;
    ready.forEach(function (item) {
      require(item[2]);
    });
  }
"#;

const RUNTIME_HOT: &str = r#"
  var hotState = {};

  function createHot(id) {
    var state = (hotState[id] = { accepted: false, disposers: [] });
    return {
      accept: function () {
        state.accepted = true;
      },
      dispose: function (fn) {
        state.disposers.push(fn);
      }
    };
  }

  // Called by the dev transport with replacement factories keyed by module id.
  self.__packworkHot = {
    apply: function (updates) {
      var id;
      for (id in updates) {
        if (cache[id] && !(hotState[id] && hotState[id].accepted)) {
          location.reload();
          return;
        }
      }
      for (id in updates) {
        if (hotState[id]) hotState[id].disposers.forEach(function (fn) { fn(); });
        delete cache[id];
        factories[id] = updates[id];
        require(id);
      }
    }
  };
"#;

const RUNTIME_TAIL: &str = r#"
  var queue = (self[queueName] = self[queueName] || []);
  queue.forEach(install);
  queue.push = install;
  queue.ready = true;
})();
"#;

fn render_runtime(maps: &RuntimeMaps<'_>, hot: bool) -> String {
    let head = RUNTIME_HEAD
        .replace("__QUEUE__", CHUNK_QUEUE)
        .replace("__JS_FILES__", &json(maps.js_files))
        .replace("__CSS_FILES__", &json(maps.css_files))
        .replace("__ASYNC_CHUNKS__", &json(maps.async_roots))
        .replace("__CHUNK_DEPS__", &json(maps.chunk_deps));
    let mut out = head;
    if hot {
        out.push_str(RUNTIME_HOT_REQUIRE);
    }
    out.push_str(RUNTIME_BODY);
    if hot {
        out.push_str(RUNTIME_HOT);
    }
    out.push_str(RUNTIME_TAIL);
    out
}

/// Public directory files to copy, minus `copy_ignore` matches.
fn collect_public(ctx: &BuildContext) -> Result<Vec<(String, Vec<u8>)>, BuildError> {
    if !ctx.public_dir.is_dir() {
        return Ok(Vec::new());
    }
    let patterns = ctx
        .copy_ignore
        .iter()
        .map(|p| {
            glob::Pattern::new(p).map_err(|e| ConfigError::InvalidPattern {
                pattern: p.clone(),
                message: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::new();
    for entry in WalkDir::new(&ctx.public_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| EmitError::Read {
            path: e.path().unwrap_or(&ctx.public_dir).to_path_buf(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = relative_slash(entry.path(), &ctx.public_dir);
        let dotted = format!("./{rel}");
        if patterns.iter().any(|p| p.matches(&rel) || p.matches(&dotted)) {
            continue;
        }
        let bytes = std::fs::read(entry.path()).map_err(|source| EmitError::Read {
            path: entry.path().to_path_buf(),
            source,
        })?;
        out.push((rel, bytes));
    }
    Ok(out)
}

fn relative_slash(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Write files under the output directory. Production builds remove the
/// previous output first.
pub fn write(files: &[OutputFile], ctx: &BuildContext) -> Result<(), EmitError> {
    if ctx.mode.is_production() {
        clean_out_dir(ctx)?;
    }
    for file in files {
        let path = ctx.out_dir.join(&file.path);
        packwork_util::fs::write_output(&path, &file.contents)
            .map_err(|source| EmitError::Write { path, source })?;
    }
    tracing::info!(files = files.len(), out_dir = %ctx.out_dir.display(), "wrote output");
    Ok(())
}

fn clean_out_dir(ctx: &BuildContext) -> Result<(), EmitError> {
    if ctx.root.starts_with(&ctx.out_dir) {
        return Err(EmitError::UnsafeClean {
            path: ctx.out_dir.clone(),
        });
    }
    packwork_util::fs::remove_dir_if_exists(&ctx.out_dir).map_err(|source| EmitError::Write {
        path: ctx.out_dir.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundler::chunks::{partition, CacheGroup};
    use crate::bundler::fixture::Project;
    use crate::config::{Mode, SplitChunksConfig};

    fn emit_project(p: &Project) -> Emission {
        let graph = p.main_graph();
        let groups = CacheGroup::compile_all(&SplitChunksConfig::default().cache_groups).unwrap();
        let chunks = partition(&graph, &groups);
        emit(&graph, &chunks, &p.ctx, &Optimizer::for_context(&p.ctx)).unwrap()
    }

    fn paths(e: &Emission) -> Vec<&str> {
        e.files.iter().map(|f| f.path.as_str()).collect()
    }

    fn app(mode: Mode) -> Project {
        Project::new(
            &[
                (
                    "src/main.js",
                    "import React from 'react';\nimport './main.css';\nimport('./Page');\n",
                ),
                ("src/Page.js", "export default function Page() {}\n"),
                ("src/main.css", ".app { color: red; }\n"),
                ("node_modules/react/index.js", "module.exports = { v: 18 };\n"),
                ("public/index.html", "<html><head></head><body></body></html>"),
                ("public/favicon.ico", "icon"),
            ],
            mode,
        )
    }

    #[test]
    fn test_chunk_file_names() {
        assert_eq!(chunk_file_name("main", "js", false, None), "static/js/main.js");
        assert_eq!(
            chunk_file_name("chunk-libs", "js", true, Some("0123456789")),
            "static/js/chunk-libs.0123456789.chunk.js"
        );
        assert_eq!(
            chunk_file_name("main", "css", false, Some("abcdef0123")),
            "static/css/main.abcdef0123.css"
        );
    }

    #[test]
    fn test_render_chunk_format() {
        let js = render_chunk(
            "main",
            &[("src/main.js", "require(\"src/a.js\");")],
            Some("src/main.js"),
            &["common"],
        );
        assert_eq!(
            js,
            "(self[\"packworkChunks\"] = self[\"packworkChunks\"] || []).push([[\"main\"], {\n\
             \"src/main.js\": function (module, exports, require) {\n\
             require(\"src/a.js\");\n\
             },\n\
             }, \"src/main.js\", [\"common\"]]);\n"
        );
    }

    #[test]
    fn test_render_hot_update() {
        let js = render_hot_update(&[("src/App.jsx", "exports.x = 1;\n")]);
        assert_eq!(
            js,
            "self.__packworkHot.apply({\n\
             \"src/App.jsx\": function (module, exports, require) {\n\
             exports.x = 1;\n\
             },\n\
             });\n"
        );
    }

    #[test]
    fn test_runtime_installs_once_per_page() {
        let empty = BTreeMap::new();
        let deps = BTreeMap::new();
        let maps = RuntimeMaps {
            js_files: &empty,
            css_files: &empty,
            async_roots: &empty,
            chunk_deps: &deps,
        };
        let js = render_runtime(&maps, false);
        let guard = js.find("if (self[queueName] && self[queueName].ready) return;").unwrap();
        let marker = js.find("queue.ready = true;").unwrap();
        assert!(guard < js.find("function require").unwrap());
        assert!(marker > js.find("queue.push = install;").unwrap());
    }

    #[test]
    fn test_development_layout() {
        let p = app(Mode::Development);
        let e = emit_project(&p);
        assert_eq!(
            paths(&e),
            vec![
                "static/js/runtime~main.js",
                "static/js/chunk-react.chunk.js",
                "static/js/chunk-react.chunk.js.map",
                "static/js/main.js",
                "static/js/main.js.map",
                "static/js/Page.chunk.js",
                "static/js/Page.chunk.js.map",
                "index.html",
                "asset-manifest.json",
            ]
        );
        let runtime = std::str::from_utf8(&e.file("static/js/runtime~main.js").unwrap().contents)
            .unwrap()
            .to_string();
        assert!(runtime.contains("\"Page\":\"/static/js/Page.chunk.js\""));
        assert!(runtime.contains("\"src/Page.js\":\"Page\""));
        assert!(runtime.contains("__packworkHot"));
    }

    #[test]
    fn test_production_layout_is_hashed_and_extracted() {
        let p = app(Mode::Production);
        let e = emit_project(&p);
        let all = paths(&e);

        assert!(all.iter().any(|f| f.starts_with("static/css/main.") && f.ends_with(".css")));
        assert!(all.contains(&"favicon.ico"));
        assert!(all.contains(&"index.html"));
        let runtime = all
            .iter()
            .find(|f| f.starts_with("static/js/runtime~main."))
            .unwrap();
        let hash = runtime
            .trim_start_matches("static/js/runtime~main.")
            .trim_end_matches(".js");
        assert_eq!(hash.len(), 10);

        let runtime_src = std::str::from_utf8(&e.file(runtime).unwrap().contents).unwrap();
        assert!(!runtime_src.contains("__packworkHot"));
    }

    #[test]
    fn test_manifest_lists_every_file() {
        let p = app(Mode::Production);
        let e = emit_project(&p);
        let urls: Vec<&String> = e.manifest.files.values().collect();
        for file in e.files.iter().filter(|f| f.kind != OutputKind::Manifest) {
            let url = format!("/{}", file.path);
            assert!(urls.contains(&&url), "{} missing from manifest", file.path);
        }

        let initial = &e.manifest.entrypoints["main"];
        assert!(initial[0].starts_with("static/js/runtime~main."));
        assert!(initial.last().unwrap().starts_with("static/js/main."));
    }

    fn text(e: &Emission, path: &str) -> String {
        String::from_utf8(e.file(path).unwrap().contents.to_vec()).unwrap()
    }

    #[test]
    fn test_source_maps_point_at_module_lines() {
        let p = app(Mode::Development);
        let e = emit_project(&p);
        let main = text(&e, "static/js/main.js");
        assert!(main.ends_with("//# sourceMappingURL=main.js.map\n"));

        let map: serde_json::Value = serde_json::from_str(&text(&e, "static/js/main.js.map")).unwrap();
        assert_eq!(map["file"], "main.js");
        let sources: Vec<&str> = map["sources"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s.as_str().unwrap())
            .collect();
        assert_eq!(sources, ["src/main.js"]);
        assert!(map["sourcesContent"][0].as_str().unwrap().starts_with("import React"));

        // The dynamic import is the third source line; find its generated line.
        let generated = main
            .lines()
            .position(|l| l.contains("require.load(\"src/Page.js\")"))
            .unwrap();
        let mappings: Vec<&str> = map["mappings"].as_str().unwrap().split(';').collect();
        assert!(!mappings[generated].is_empty());
        assert!(mappings[0].is_empty());
        assert!(e.manifest.files.contains_key("main.js.map"));
        assert!(!e.files.iter().any(|f| f.path == "static/js/runtime~main.js.map"));
    }

    #[test]
    fn test_production_maps_follow_hashed_names() {
        let p = app(Mode::Production);
        let e = emit_project(&p);
        for file in e.files.iter().filter(|f| matches!(f.kind, OutputKind::Script | OutputKind::Style)) {
            let body = std::str::from_utf8(&file.contents).unwrap();
            if file.path.starts_with("static/js/runtime~") {
                assert!(!body.contains("sourceMappingURL"));
                continue;
            }
            let map_path = format!("{}.map", file.path);
            let map_name = map_path.rsplit('/').next().unwrap();
            assert!(body.contains(&format!("sourceMappingURL={map_name}")), "{}", file.path);
            assert!(e.file(&map_path).is_some(), "{map_path}");
        }

        let css = e
            .files
            .iter()
            .find(|f| f.kind == OutputKind::Style)
            .unwrap();
        let body = std::str::from_utf8(&css.contents).unwrap();
        let hash = css.path.trim_start_matches("static/css/main.").trim_end_matches(".css");
        let without_comment = body.lines().next().unwrap();
        assert_eq!(fingerprint(without_comment.as_bytes(), 10), hash);
    }

    #[test]
    fn test_maps_can_be_turned_off() {
        let mut p = app(Mode::Production);
        p.ctx = p.ctx.clone().with_source_maps(false);
        let e = emit_project(&p);
        assert!(e.files.iter().all(|f| f.kind != OutputKind::SourceMap));
        assert!(e.files.iter().all(|f| !String::from_utf8_lossy(&f.contents).contains("sourceMappingURL")));
    }

    #[test]
    fn test_html_references_runtime_before_entry() {
        let p = app(Mode::Production);
        let e = emit_project(&p);
        let html = std::str::from_utf8(&e.file("index.html").unwrap().contents).unwrap();
        let runtime = html.find("/static/js/runtime~main.").unwrap();
        let react = html.find("/static/js/chunk-react.").unwrap();
        let main = html.find("/static/js/main.").unwrap();
        assert!(runtime < react && react < main);
        assert!(html.contains("rel=\"stylesheet\""));
    }

    #[test]
    fn test_emission_is_deterministic() {
        let p = app(Mode::Production);
        let first = emit_project(&p);
        let second = emit_project(&p);
        assert_eq!(first.files, second.files);
    }

    #[test]
    fn test_write_and_clean() {
        let p = app(Mode::Production);
        let e = emit_project(&p);
        std::fs::create_dir_all(p.ctx.out_dir.join("stale")).unwrap();
        std::fs::write(p.ctx.out_dir.join("stale/old.js"), "old").unwrap();

        write(&e.files, &p.ctx).unwrap();
        assert!(!p.ctx.out_dir.join("stale/old.js").exists());
        assert!(p.ctx.out_dir.join(MANIFEST_FILE).is_file());
        assert!(p.ctx.out_dir.join("favicon.ico").is_file());
    }

    #[test]
    fn test_refuses_to_clean_project_root() {
        let p = app(Mode::Production);
        let ctx = p.ctx.clone().with_out_dir(&p.ctx.root);
        let err = write(&[], &ctx).unwrap_err();
        assert_eq!(err.code(), "EMIT_UNSAFE_CLEAN");
    }
}
