//! Subcommand implementations.

pub mod build;
pub mod dev;
pub mod inspect;
pub mod version;

use packwork_core::bundler::OutputFile;
use packwork_core::{BuildContext, BuildError, Bundler, Mode, ProjectConfig};
use serde::Serialize;
use std::path::PathBuf;

/// Options shared by every project command.
#[derive(Debug, Clone)]
pub struct ProjectAction {
    pub cwd: PathBuf,
    pub mode: Mode,
    pub config: Option<PathBuf>,
    pub out_dir: Option<PathBuf>,
}

impl ProjectAction {
    /// Load the config and set up a bundler. CLI flags override the file.
    pub fn open(&self) -> Result<(Bundler, ProjectConfig), BuildError> {
        let config = ProjectConfig::load(&self.cwd, self.config.as_deref())?;
        let mut ctx = BuildContext::from_config(&self.cwd, self.mode, &config);
        if let Some(out_dir) = &self.out_dir {
            ctx = ctx.with_out_dir(out_dir);
        }
        let bundler = Bundler::new(ctx, &config)?;
        Ok((bundler, config))
    }
}

#[derive(Debug, Serialize)]
pub struct FileJson {
    pub path: String,
    pub size: usize,
}

impl From<&OutputFile> for FileJson {
    fn from(file: &OutputFile) -> Self {
        Self {
            path: file.path.clone(),
            size: file.size(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorJson {
    pub code: String,
    pub message: String,
}

impl From<&BuildError> for ErrorJson {
    fn from(err: &BuildError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Print one JSON document on stdout.
pub fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("error: failed to serialize output: {e}"),
    }
}

/// `1.2 kB` style sizes.
pub fn format_size(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else {
        format!("{:.1} kB", bytes as f64 / 1024.0)
    }
}
