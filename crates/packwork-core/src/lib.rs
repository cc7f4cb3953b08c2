#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod bundler;
pub mod config;
pub mod dev;
pub mod error;

pub use bundler::{BuildOutput, Bundler};
pub use config::{BuildContext, Mode, ProjectConfig};
pub use dev::{DevOrchestrator, DevUpdate, DevWatcher};
pub use error::{BuildError, ConfigError, EmitError, GraphError, MinifyError, ResolveError};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
