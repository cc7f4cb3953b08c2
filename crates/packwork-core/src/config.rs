//! Project configuration and the per-build context.
//!
//! `packwork.json` is read once per invocation into a [`ProjectConfig`]; the
//! CLI then layers flags on top and freezes everything into a [`BuildContext`]
//! that is passed by reference to every component.
//!
//! ```json
//! {
//!   "entry": { "main": "./src/main.js" },
//!   "outDir": "dist",
//!   "alias": { "@": "./src" },
//!   "devtool": "source-map",
//!   "splitChunks": { "cacheGroups": [ { "name": "chunk-react", "test": "...", "priority": 40 } ] }
//! }
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Config file looked up in the project root when `--config` is not given.
pub const CONFIG_FILE: &str = "packwork.json";

/// Hex characters kept from a content hash in output file names.
pub const DEFAULT_HASH_LENGTH: usize = 10;

/// Assets strictly smaller than this many bytes are inlined as data URLs.
pub const DEFAULT_INLINE_THRESHOLD: u64 = 10 * 1024;

/// Extension search order for extensionless specifiers.
pub const DEFAULT_EXTENSIONS: &[&str] = &[".jsx", ".js", ".json"];

/// Entry used when the config names none.
pub const DEFAULT_ENTRY: &str = "./src/main.js";

/// Public files never copied verbatim (the page template is rendered instead).
pub const DEFAULT_COPY_IGNORE: &[&str] = &["**/index.html"];

/// Build mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Development,
    Production,
}

impl Mode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Mode implied by a `NODE_ENV` value. Only `production` selects
    /// production; anything else falls back to `fallback` when unset and
    /// development otherwise.
    #[must_use]
    pub fn from_node_env(value: Option<&str>, fallback: Mode) -> Mode {
        match value {
            Some("production") => Self::Production,
            Some(_) => Self::Development,
            None => fallback,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!(
                "invalid mode '{other}' (expected development or production)"
            )),
        }
    }
}

/// `entry` accepts a single path (named `main`) or a name → path map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryConfig {
    Single(String),
    Named(BTreeMap<String, String>),
}

impl EntryConfig {
    /// Entries as `(name, path)` pairs, sorted by name.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, String)> {
        match self {
            Self::Single(path) => vec![("main".to_string(), path.clone())],
            Self::Named(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}

/// One stage reference inside a rule's `use` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageConfig {
    Name(String),
    WithOptions {
        loader: String,
        #[serde(default)]
        options: serde_json::Value,
    },
}

impl StageConfig {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::WithOptions { loader, .. } => loader,
        }
    }

    #[must_use]
    pub fn options(&self) -> serde_json::Value {
        match self {
            Self::Name(_) => serde_json::Value::Null,
            Self::WithOptions { options, .. } => options.clone(),
        }
    }
}

/// `devtool`: `false` (or `"none"`) turns source maps off; any map name
/// (`"source-map"`, `"cheap-module-source-map"`) turns them on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DevtoolConfig {
    Enabled(bool),
    Name(String),
}

impl DevtoolConfig {
    #[must_use]
    pub fn source_maps(&self) -> bool {
        match self {
            Self::Enabled(on) => *on,
            Self::Name(name) => !name.is_empty() && name != "none",
        }
    }
}

/// A `rules` entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleConfig {
    /// Regex matched against the module's absolute path (`/` separators).
    pub test: String,
    /// Roots (relative to the project) the module must live under.
    pub include: Vec<String>,
    /// Roots the module must not live under.
    pub exclude: Vec<String>,
    /// Stages, declared last-runs-first like a loader chain.
    #[serde(rename = "use")]
    pub stages: Vec<StageConfig>,
    /// `asset`, `asset/resource` or `asset/inline`.
    #[serde(rename = "type")]
    pub module_type: Option<String>,
    /// Data-URL threshold override for `asset` rules.
    pub max_inline_size: Option<u64>,
}

/// A priority rule pulling matching modules into a named chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheGroupConfig {
    pub name: String,
    pub test: String,
    #[serde(default)]
    pub priority: i32,
}

/// `splitChunks` section. Groups are kept in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitChunksConfig {
    #[serde(default)]
    pub cache_groups: Vec<CacheGroupConfig>,
}

impl Default for SplitChunksConfig {
    fn default() -> Self {
        let group = |name: &str, test: &str, priority| CacheGroupConfig {
            name: name.to_string(),
            test: test.to_string(),
            priority,
        };
        Self {
            cache_groups: vec![
                group("chunk-react", r"[\\/]node_modules[\\/]react(.*)?[\\/]", 40),
                group("chunk-antd", r"[\\/]node_modules[\\/]antd[\\/]", 30),
                group("chunk-libs", r"[\\/]node_modules[\\/]", 20),
            ],
        }
    }
}

/// Settings handed to the external dev-server transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevServerConfig {
    pub host: String,
    pub port: u16,
    pub open: bool,
    pub hot: bool,
    pub history_api_fallback: bool,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3000,
            open: true,
            hot: true,
            history_api_fallback: true,
        }
    }
}

/// Contents of `packwork.json`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectConfig {
    pub entry: Option<EntryConfig>,
    pub out_dir: Option<PathBuf>,
    pub public_path: Option<String>,
    pub hash_length: Option<usize>,
    pub inline_threshold: Option<u64>,
    pub extensions: Option<Vec<String>>,
    pub alias: BTreeMap<String, String>,
    pub define: BTreeMap<String, String>,
    pub rules: Option<Vec<RuleConfig>>,
    pub split_chunks: Option<SplitChunksConfig>,
    pub copy_ignore: Option<Vec<String>>,
    pub devtool: Option<DevtoolConfig>,
    pub dev_server: DevServerConfig,
}

impl ProjectConfig {
    /// Load the project config.
    ///
    /// With `explicit`, that file must exist (relative paths are taken from
    /// `root`). Without it, `packwork.json` in `root` is used when present and
    /// defaults otherwise.
    pub fn load(root: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(p) => {
                let abs = if p.is_absolute() {
                    p.to_path_buf()
                } else {
                    root.join(p)
                };
                if !abs.is_file() {
                    return Err(ConfigError::NotFound { path: abs });
                }
                abs
            }
            None => {
                let candidate = root.join(CONFIG_FILE);
                if !candidate.is_file() {
                    tracing::debug!(root = %root.display(), "no config file, using defaults");
                    return Ok(Self::default());
                }
                candidate
            }
        };

        let source = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::parse(&source).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Parse config JSON.
    pub fn parse(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }

    /// Entry points as `(name, path)` pairs.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, String)> {
        match &self.entry {
            Some(entry) => entry.entries(),
            None => vec![("main".to_string(), DEFAULT_ENTRY.to_string())],
        }
    }
}

/// Immutable per-build values. Built once, then shared by reference.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub mode: Mode,
    /// Canonical project root.
    pub root: PathBuf,
    /// Absolute output directory.
    pub out_dir: PathBuf,
    /// URL prefix for emitted files, always ending in `/`.
    pub public_path: String,
    /// `<root>/public`.
    pub public_dir: PathBuf,
    /// `<root>/src`.
    pub src_dir: PathBuf,
    pub hash_length: usize,
    pub inline_threshold: u64,
    pub extensions: Vec<String>,
    /// Alias key → absolute (or bare) target.
    pub alias: Vec<(String, String)>,
    /// Literal replacements, longest key first.
    pub define: Vec<(String, String)>,
    pub copy_ignore: Vec<String>,
    /// Write `.map` files next to scripts and stylesheets.
    pub source_maps: bool,
}

impl BuildContext {
    /// Context with defaults for the given root. The root is canonicalized
    /// when it exists.
    #[must_use]
    pub fn new(root: &Path, mode: Mode) -> Self {
        let root = dunce::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        Self {
            mode,
            out_dir: root.join("dist"),
            public_path: "/".to_string(),
            public_dir: root.join("public"),
            src_dir: root.join("src"),
            hash_length: DEFAULT_HASH_LENGTH,
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| (*s).to_string()).collect(),
            alias: Vec::new(),
            define: default_define(mode),
            copy_ignore: DEFAULT_COPY_IGNORE.iter().map(|s| (*s).to_string()).collect(),
            source_maps: true,
            root,
        }
    }

    /// Context from a loaded project config.
    #[must_use]
    pub fn from_config(root: &Path, mode: Mode, config: &ProjectConfig) -> Self {
        let mut ctx = Self::new(root, mode);
        if let Some(out_dir) = &config.out_dir {
            ctx = ctx.with_out_dir(out_dir);
        }
        if let Some(public_path) = &config.public_path {
            ctx = ctx.with_public_path(public_path);
        }
        if let Some(len) = config.hash_length {
            ctx.hash_length = len;
        }
        if let Some(threshold) = config.inline_threshold {
            ctx.inline_threshold = threshold;
        }
        if let Some(exts) = &config.extensions {
            ctx.extensions.clone_from(exts);
        }
        if let Some(ignore) = &config.copy_ignore {
            ctx.copy_ignore.clone_from(ignore);
        }
        if let Some(devtool) = &config.devtool {
            ctx.source_maps = devtool.source_maps();
        }
        for (key, target) in &config.alias {
            ctx = ctx.with_alias(key, target);
        }
        for (key, value) in &config.define {
            ctx = ctx.with_define(key, value);
        }
        ctx
    }

    /// Set the output directory (relative paths are taken from the root).
    #[must_use]
    pub fn with_out_dir(mut self, dir: &Path) -> Self {
        self.out_dir = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.root.join(dir)
        };
        self
    }

    #[must_use]
    pub fn with_public_path(mut self, public_path: &str) -> Self {
        let mut path = public_path.to_string();
        if !path.ends_with('/') {
            path.push('/');
        }
        self.public_path = path;
        self
    }

    #[must_use]
    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|s| (*s).to_string()).collect();
        self
    }

    #[must_use]
    pub fn with_source_maps(mut self, on: bool) -> Self {
        self.source_maps = on;
        self
    }

    #[must_use]
    pub fn with_inline_threshold(mut self, threshold: u64) -> Self {
        self.inline_threshold = threshold;
        self
    }

    /// Add an alias. Relative targets (`./`, `../`) become absolute paths
    /// under the root; anything else is kept as a specifier.
    #[must_use]
    pub fn with_alias(mut self, key: &str, target: &str) -> Self {
        let target = if target.starts_with("./") || target.starts_with("../") {
            self.root.join(target).to_string_lossy().into_owned()
        } else {
            target.to_string()
        };
        self.alias.retain(|(k, _)| k != key);
        self.alias.push((key.to_string(), target));
        self
    }

    /// Add or replace a literal replacement.
    #[must_use]
    pub fn with_define(mut self, key: &str, value: &str) -> Self {
        self.define.retain(|(k, _)| k != key);
        self.define.push((key.to_string(), value.to_string()));
        sort_define(&mut self.define);
        self
    }

    /// Whether output names carry a content fingerprint.
    #[must_use]
    pub fn hashing(&self) -> bool {
        self.mode.is_production()
    }

    /// Project-relative display key with `/` separators. Paths outside the
    /// root keep their full path.
    #[must_use]
    pub fn module_key(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        let key = rel.to_string_lossy().replace('\\', "/");
        key.trim_start_matches('/').to_string()
    }
}

fn default_define(mode: Mode) -> Vec<(String, String)> {
    vec![(
        "process.env.NODE_ENV".to_string(),
        format!("\"{}\"", mode.as_str()),
    )]
}

fn sort_define(define: &mut [(String, String)]) {
    define.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
}
