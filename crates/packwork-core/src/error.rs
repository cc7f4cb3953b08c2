use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Import specifier could not be mapped to a module.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Cannot resolve '{specifier}' from '{}'", .from.display())]
    NotFound { specifier: String, from: PathBuf },

    #[error(
        "'{specifier}' from '{}' resolves to '{}', outside the permitted roots",
        .from.display(),
        .path.display()
    )]
    OutsideRoots {
        specifier: String,
        from: PathBuf,
        path: PathBuf,
    },

    #[error("Failed to read '{}' while resolving '{specifier}': {source}", .path.display())]
    Io {
        specifier: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ResolveError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "RESOLVE_NOT_FOUND",
            Self::OutsideRoots { .. } => "RESOLVE_OUTSIDE_ROOTS",
            Self::Io { .. } => "RESOLVE_IO",
        }
    }
}

/// A transform stage failed on a module.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Stage '{stage}' failed on {}: {cause}", .module.display())]
pub struct TransformError {
    pub module: PathBuf,
    pub stage: String,
    pub cause: String,
}

/// Failure while producing a single module (read, transform, or resolving its imports).
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ModuleError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Resolve(e) => e.code(),
            Self::Transform(_) => "TRANSFORM_FAILED",
            Self::Read { .. } => "MODULE_READ_FAILED",
        }
    }
}

/// Graph construction failed. `chain` lists the importers from an entry point
/// down to the module that failed (inclusive).
#[derive(Error, Debug)]
#[error("{source}{}", format_chain(.chain))]
pub struct GraphError {
    pub chain: Vec<PathBuf>,
    #[source]
    pub source: Arc<ModuleError>,
}

impl GraphError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.source.code()
    }
}

fn format_chain(chain: &[PathBuf]) -> String {
    if chain.len() < 2 {
        return String::new();
    }
    let mut out = String::from("\n  import chain:");
    for path in chain {
        out.push_str("\n    ");
        out.push_str(&path.display().to_string());
    }
    out
}

/// Writing or collecting output files failed.
#[derive(Error, Debug)]
pub enum EmitError {
    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Refusing to clean output directory {}: it contains the project root", .path.display())]
    UnsafeClean { path: PathBuf },

    #[error("Conflicting contents for output file {path}")]
    Conflict { path: String },
}

impl EmitError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Write { .. } => "EMIT_WRITE_FAILED",
            Self::Read { .. } => "EMIT_READ_FAILED",
            Self::UnsafeClean { .. } => "EMIT_UNSAFE_CLEAN",
            Self::Conflict { .. } => "EMIT_CONFLICT",
        }
    }
}

/// A minimizer rejected an output file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Minimizer '{minimizer}' failed on {file}: {cause}")]
pub struct MinifyError {
    pub minimizer: String,
    pub file: String,
    pub cause: String,
}

/// Invalid or unreadable project configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config at {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Config file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Unknown stage '{name}'")]
    UnknownStage { name: String },

    #[error("Unknown module type '{name}'")]
    UnknownModuleType { name: String },

    #[error("No entry points configured")]
    NoEntries,
}

impl ConfigError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Read { .. } => "CONFIG_READ_FAILED",
            Self::Parse { .. } => "CONFIG_PARSE_FAILED",
            Self::NotFound { .. } => "CONFIG_NOT_FOUND",
            Self::InvalidPattern { .. } => "CONFIG_INVALID_PATTERN",
            Self::UnknownStage { .. } => "CONFIG_UNKNOWN_STAGE",
            Self::UnknownModuleType { .. } => "CONFIG_UNKNOWN_MODULE_TYPE",
            Self::NoEntries => "CONFIG_NO_ENTRIES",
        }
    }
}

/// Top-level error for a build invocation.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error(transparent)]
    Minify(#[from] MinifyError),
}

impl BuildError {
    /// Stable SCREAMING_SNAKE code for machine-readable output.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.code(),
            Self::Graph(e) => e.code(),
            Self::Emit(e) => e.code(),
            Self::Minify(_) => "MINIFY_FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_error_prints_chain() {
        let err = GraphError {
            chain: vec![PathBuf::from("/p/src/main.js"), PathBuf::from("/p/src/a.js")],
            source: Arc::new(ModuleError::Resolve(ResolveError::NotFound {
                specifier: "./missing".to_string(),
                from: PathBuf::from("/p/src/a.js"),
            })),
        };

        let msg = err.to_string();
        assert!(msg.starts_with("Cannot resolve './missing'"));
        assert!(msg.contains("import chain:"));
        assert!(msg.contains("/p/src/main.js"));
        assert_eq!(err.code(), "RESOLVE_NOT_FOUND");
    }

    #[test]
    fn test_codes_are_screaming_snake_case() {
        let codes = [
            BuildError::from(ConfigError::NoEntries).code(),
            BuildError::from(MinifyError {
                minimizer: "css".to_string(),
                file: "a.css".to_string(),
                cause: "bad".to_string(),
            })
            .code(),
            EmitError::UnsafeClean {
                path: PathBuf::from("/"),
            }
            .code(),
        ];
        for code in codes {
            assert!(code
                .chars()
                .all(|c| c.is_ascii_uppercase() || c == '_' || c.is_ascii_digit()));
        }
    }
}
