//! Import specifier resolution.
//!
//! Maps a specifier plus the importing file to a canonical module path.
//!
//! ## Specifier Types
//!
//! - Aliased: `@/components/App` (alias map applied first, longest key wins)
//! - Relative: `./utils`, `../lib/foo`
//! - Absolute: `/abs/path/to/module`
//! - Bare: `lodash`, `@scope/pkg`, `react/jsx-runtime`
//!
//! Extensionless candidates are tried verbatim, then with each configured
//! extension in order, then as a directory `index` with each extension.

use crate::config::BuildContext;
use crate::error::ResolveError;
use dashmap::DashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Import resolver. Results are memoized for the lifetime of the resolver.
#[derive(Debug)]
pub struct Resolver {
    extensions: Vec<String>,
    /// `(key, target)` sorted longest key first.
    alias: Vec<(String, String)>,
    /// Permitted roots. Empty means anything goes.
    roots: Vec<PathBuf>,
    /// Stop walking up for `node_modules` here.
    project_root: PathBuf,
    cache: DashMap<(String, PathBuf), PathBuf>,
}

impl Resolver {
    /// Resolver for a build. The project root is the only permitted root.
    #[must_use]
    pub fn new(ctx: &BuildContext) -> Self {
        let mut alias = ctx.alias.clone();
        alias.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self {
            extensions: ctx.extensions.clone(),
            alias,
            roots: vec![ctx.root.clone()],
            project_root: ctx.root.clone(),
            cache: DashMap::new(),
        }
    }

    /// Replace the permitted include roots.
    #[must_use]
    pub fn with_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.roots = roots
            .into_iter()
            .map(|r| dunce::canonicalize(&r).unwrap_or(r))
            .collect();
        self
    }

    /// Resolve `specifier` imported from the file `from`.
    pub fn resolve(&self, specifier: &str, from: &Path) -> Result<PathBuf, ResolveError> {
        let key = (specifier.to_string(), from.to_path_buf());
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.clone());
        }

        let resolved = self.resolve_uncached(specifier, from)?;

        if !self.roots.is_empty() && !self.roots.iter().any(|r| resolved.starts_with(r)) {
            return Err(ResolveError::OutsideRoots {
                specifier: specifier.to_string(),
                from: from.to_path_buf(),
                path: resolved,
            });
        }

        tracing::trace!(specifier, from = %from.display(), resolved = %resolved.display(), "resolved");
        self.cache.insert(key, resolved.clone());
        Ok(resolved)
    }

    /// Number of memoized resolutions.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Forget memoized resolutions, e.g. after files were added or removed.
    pub fn clear(&self) {
        self.cache.clear();
    }

    fn resolve_uncached(&self, specifier: &str, from: &Path) -> Result<PathBuf, ResolveError> {
        let aliased = self.apply_alias(specifier);
        let target = aliased.as_deref().unwrap_or(specifier);

        let found = if target.starts_with("./") || target.starts_with("../") {
            let dir = from.parent().unwrap_or(Path::new("."));
            self.resolve_file_or_directory(&dir.join(target), specifier)?
        } else if Path::new(target).is_absolute() {
            self.resolve_file_or_directory(Path::new(target), specifier)?
        } else {
            self.resolve_bare(target, specifier, from)?
        };

        found.ok_or_else(|| ResolveError::NotFound {
            specifier: specifier.to_string(),
            from: from.to_path_buf(),
        })
    }

    /// Longest alias key matching the whole specifier or a `key/` prefix.
    fn apply_alias(&self, specifier: &str) -> Option<String> {
        for (key, target) in &self.alias {
            if specifier == key {
                return Some(target.clone());
            }
            if let Some(rest) = specifier
                .strip_prefix(key.as_str())
                .and_then(|r| r.strip_prefix('/'))
            {
                return Some(format!("{}/{rest}", target.trim_end_matches('/')));
            }
        }
        None
    }

    /// Resolve a bare specifier by walking up `node_modules` directories.
    fn resolve_bare(
        &self,
        target: &str,
        specifier: &str,
        from: &Path,
    ) -> Result<Option<PathBuf>, ResolveError> {
        let (pkg_name, subpath) = parse_bare_specifier(target);

        let mut current = from.parent();
        while let Some(dir) = current {
            let pkg_dir = dir.join("node_modules").join(&pkg_name);
            if stat(&pkg_dir, specifier)?.is_some_and(|m| m.is_dir()) {
                let found = match &subpath {
                    Some(sub) => self.resolve_file_or_directory(&pkg_dir.join(sub), specifier)?,
                    None => self.resolve_package_entry(&pkg_dir, specifier)?,
                };
                if found.is_some() {
                    return Ok(found);
                }
            }

            if dir == self.project_root {
                break;
            }
            current = dir.parent();
        }
        Ok(None)
    }

    /// Package entry: `module`, then `main`, then `index` + extensions.
    fn resolve_package_entry(
        &self,
        pkg_dir: &Path,
        specifier: &str,
    ) -> Result<Option<PathBuf>, ResolveError> {
        let pkg_json = pkg_dir.join("package.json");
        if let Some(content) = read_manifest(&pkg_json, specifier)? {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(&content) {
                for field in ["module", "main"] {
                    if let Some(entry) = json.get(field).and_then(|v| v.as_str()) {
                        if let Some(found) =
                            self.resolve_file_or_directory(&pkg_dir.join(entry), specifier)?
                        {
                            return Ok(Some(found));
                        }
                    }
                }
            }
        }
        self.resolve_index(pkg_dir, specifier)
    }

    /// Resolve a path that might be a file or directory.
    fn resolve_file_or_directory(
        &self,
        target: &Path,
        specifier: &str,
    ) -> Result<Option<PathBuf>, ResolveError> {
        if stat(target, specifier)?.is_some_and(|m| m.is_file()) {
            return Ok(Some(canonical(target, specifier)?));
        }

        for ext in &self.extensions {
            let with_ext = PathBuf::from(format!("{}{ext}", target.display()));
            if stat(&with_ext, specifier)?.is_some_and(|m| m.is_file()) {
                return Ok(Some(canonical(&with_ext, specifier)?));
            }
        }

        if stat(target, specifier)?.is_some_and(|m| m.is_dir()) {
            return self.resolve_index(target, specifier);
        }
        Ok(None)
    }

    fn resolve_index(&self, dir: &Path, specifier: &str) -> Result<Option<PathBuf>, ResolveError> {
        for ext in &self.extensions {
            let index = dir.join(format!("index{ext}"));
            if stat(&index, specifier)?.is_some_and(|m| m.is_file()) {
                return Ok(Some(canonical(&index, specifier)?));
            }
        }
        Ok(None)
    }
}

/// Split a bare specifier into package name and subpath.
fn parse_bare_specifier(specifier: &str) -> (String, Option<String>) {
    let parts: Vec<&str> = if specifier.starts_with('@') {
        specifier.splitn(3, '/').collect()
    } else {
        specifier.splitn(2, '/').collect()
    };
    let name_parts = if specifier.starts_with('@') { 2 } else { 1 };
    if parts.len() <= name_parts {
        return (specifier.to_string(), None);
    }
    (
        parts[..name_parts].join("/"),
        Some(parts[name_parts..].join("/")),
    )
}

/// Stat a path, retrying once when the failure is anything other
/// than "not found".
fn with_retry<T>(mut op: impl FnMut() -> io::Result<T>) -> io::Result<Option<T>> {
    let mut attempts = 0;
    loop {
        match op() {
            Ok(v) => return Ok(Some(v)),
            Err(e) if is_missing(&e) => return Ok(None),
            Err(e) if attempts == 0 => {
                tracing::debug!(error = %e, "transient stat failure, retrying");
                attempts += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Not found, or a path component is a file.
fn is_missing(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::NotFound {
        return true;
    }
    // ENOTDIR
    cfg!(unix) && e.raw_os_error() == Some(20)
}

fn stat(path: &Path, specifier: &str) -> Result<Option<std::fs::Metadata>, ResolveError> {
    with_retry(|| std::fs::metadata(path)).map_err(|source| io_error(path, specifier, source))
}

fn read_manifest(path: &Path, specifier: &str) -> Result<Option<String>, ResolveError> {
    with_retry(|| std::fs::read_to_string(path)).map_err(|source| io_error(path, specifier, source))
}

fn canonical(path: &Path, specifier: &str) -> Result<PathBuf, ResolveError> {
    dunce::canonicalize(path).map_err(|source| io_error(path, specifier, source))
}

fn io_error(path: &Path, specifier: &str, source: io::Error) -> ResolveError {
    ResolveError::Io {
        specifier: specifier.to_string(),
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use std::fs;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, BuildContext) {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/components")).unwrap();
        let ctx = BuildContext::new(dir.path(), Mode::Development);
        (dir, ctx)
    }

    #[test]
    fn test_parse_bare_specifier() {
        assert_eq!(parse_bare_specifier("lodash"), ("lodash".to_string(), None));
        assert_eq!(
            parse_bare_specifier("lodash/get"),
            ("lodash".to_string(), Some("get".to_string()))
        );
        assert_eq!(
            parse_bare_specifier("@types/node"),
            ("@types/node".to_string(), None)
        );
        assert_eq!(
            parse_bare_specifier("@babel/core/lib/parse"),
            ("@babel/core".to_string(), Some("lib/parse".to_string()))
        );
    }

    #[test]
    fn test_extension_order_wins() {
        let (_dir, ctx) = setup();
        let src = ctx.root.join("src");
        fs::write(src.join("a.jsx"), "export default 1;").unwrap();
        fs::write(src.join("a.js"), "export default 2;").unwrap();
        fs::write(src.join("main.js"), "import a from './a';").unwrap();

        let resolver = Resolver::new(&ctx);
        let resolved = resolver.resolve("./a", &src.join("main.js")).unwrap();
        assert!(resolved.ends_with("a.jsx"));

        let js_first = Resolver::new(&ctx.clone().with_extensions(&[".js", ".jsx"]));
        let resolved = js_first.resolve("./a", &src.join("main.js")).unwrap();
        assert!(resolved.ends_with("a.js"));
    }

    #[test]
    fn test_verbatim_before_extensions() {
        let (_dir, ctx) = setup();
        let src = ctx.root.join("src");
        fs::write(src.join("data.json"), "{}").unwrap();
        fs::write(src.join("data.json.js"), "").unwrap();

        let resolver = Resolver::new(&ctx);
        let resolved = resolver.resolve("./data.json", &src.join("main.js")).unwrap();
        assert!(resolved.ends_with("data.json"));
    }

    #[test]
    fn test_directory_index() {
        let (_dir, ctx) = setup();
        let src = ctx.root.join("src");
        fs::write(src.join("components/index.js"), "").unwrap();

        let resolver = Resolver::new(&ctx);
        let resolved = resolver.resolve("./components", &src.join("main.js")).unwrap();
        assert!(resolved.ends_with("components/index.js"));
    }

    #[test]
    fn test_alias_longest_key_wins() {
        let (_dir, ctx) = setup();
        let src = ctx.root.join("src");
        fs::write(src.join("components/Button.jsx"), "").unwrap();
        fs::create_dir_all(ctx.root.join("other")).unwrap();
        fs::write(ctx.root.join("other/Button.jsx"), "").unwrap();

        let ctx = ctx
            .with_alias("@", "./other")
            .with_alias("@/components", "./src/components");
        let resolver = Resolver::new(&ctx);
        let resolved = resolver
            .resolve("@/components/Button", &src.join("main.js"))
            .unwrap();
        assert!(resolved.ends_with("src/components/Button.jsx"));

        let resolved = resolver.resolve("@/Button", &src.join("main.js")).unwrap();
        assert!(resolved.ends_with("other/Button.jsx"));
    }

    #[test]
    fn test_alias_requires_segment_boundary() {
        let (_dir, ctx) = setup();
        let src = ctx.root.join("src");
        let ctx = ctx.with_alias("@", "./src");
        let resolver = Resolver::new(&ctx);
        let err = resolver.resolve("@scope/pkg", &src.join("main.js")).unwrap_err();
        assert_eq!(err.code(), "RESOLVE_NOT_FOUND");
    }

    #[test]
    fn test_bare_package_entry_fields() {
        let (_dir, ctx) = setup();
        let pkg = ctx.root.join("node_modules/react");
        fs::create_dir_all(pkg.join("esm")).unwrap();
        fs::write(
            pkg.join("package.json"),
            r#"{ "main": "index.js", "module": "esm/react.js" }"#,
        )
        .unwrap();
        fs::write(pkg.join("index.js"), "").unwrap();
        fs::write(pkg.join("esm/react.js"), "").unwrap();
        fs::write(pkg.join("jsx-runtime.js"), "").unwrap();

        let resolver = Resolver::new(&ctx);
        let from = ctx.root.join("src/main.js");
        assert!(resolver
            .resolve("react", &from)
            .unwrap()
            .ends_with("esm/react.js"));
        assert!(resolver
            .resolve("react/jsx-runtime", &from)
            .unwrap()
            .ends_with("jsx-runtime.js"));
    }

    #[test]
    fn test_not_found() {
        let (_dir, ctx) = setup();
        let resolver = Resolver::new(&ctx);
        let err = resolver
            .resolve("./missing", &ctx.root.join("src/main.js"))
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { .. }));
    }

    #[test]
    fn test_outside_roots() {
        let (_dir, ctx) = setup();
        fs::write(ctx.root.join("config.js"), "").unwrap();
        let resolver = Resolver::new(&ctx).with_roots(vec![ctx.root.join("src")]);
        let err = resolver
            .resolve("../config", &ctx.root.join("src/main.js"))
            .unwrap_err();
        assert_eq!(err.code(), "RESOLVE_OUTSIDE_ROOTS");
    }

    #[test]
    fn test_results_are_memoized() {
        let (_dir, ctx) = setup();
        let src = ctx.root.join("src");
        fs::write(src.join("a.js"), "").unwrap();
        let resolver = Resolver::new(&ctx);
        resolver.resolve("./a", &src.join("main.js")).unwrap();
        resolver.resolve("./a", &src.join("main.js")).unwrap();
        assert_eq!(resolver.cached(), 1);
    }

    #[test]
    fn test_retry_once_on_transient_error() {
        let mut calls = 0;
        let result = with_retry(|| {
            calls += 1;
            if calls == 1 {
                Err(io::Error::new(io::ErrorKind::Interrupted, "flaky"))
            } else {
                Ok(7)
            }
        })
        .unwrap();
        assert_eq!(result, Some(7));
        assert_eq!(calls, 2);

        let mut calls = 0;
        let err = with_retry::<()>(|| {
            calls += 1;
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        })
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(calls, 2);

        assert_eq!(
            with_retry::<()>(|| Err(io::Error::from(io::ErrorKind::NotFound))).unwrap(),
            None
        );
    }
}
