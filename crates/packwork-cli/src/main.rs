#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

mod commands;
mod logging;

use clap::{Parser, ValueEnum};
use miette::Result;
use packwork_core::Mode;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "packwork")]
#[command(author, version, about = "Front-end bundler: production builds and incremental dev builds", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone)]
struct ProjectArgs {
    /// Build mode (defaults from NODE_ENV)
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Config file (defaults to packwork.json in the working directory)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output directory, overriding the config file
    #[arg(long, value_name = "DIR")]
    out_dir: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum ModeArg {
    Development,
    Production,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Development => Mode::Development,
            ModeArg::Production => Mode::Production,
        }
    }
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Build the project into the output directory
    Build {
        #[command(flatten)]
        project: ProjectArgs,
    },

    /// Build in memory and rebuild incrementally on file changes
    Dev {
        #[command(flatten)]
        project: ProjectArgs,

        /// Host reported for the dev server (overrides devServer.host)
        #[arg(long)]
        host: Option<String>,

        /// Port reported for the dev server (overrides devServer.port)
        #[arg(long)]
        port: Option<u16>,

        /// Also write each build to the output directory
        #[arg(long)]
        write: bool,
    },

    /// Show the module graph and chunk layout without writing anything
    Inspect {
        #[command(flatten)]
        project: ProjectArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let cwd = dunce::canonicalize(&cwd).unwrap_or(cwd);
    let node_env = std::env::var("NODE_ENV").ok();

    logging::init(cli.verbose, cli.json);

    let mode_for = |project: &ProjectArgs, fallback: Mode| {
        project
            .mode
            .map_or_else(|| Mode::from_node_env(node_env.as_deref(), fallback), Mode::from)
    };

    match cli.command {
        Commands::Version => commands::version::run(),
        Commands::Build { project } => {
            let span = tracing::info_span!("build", cmd = "build", cwd = %cwd.display());
            let _guard = span.enter();
            let action = commands::ProjectAction {
                cwd: cwd.clone(),
                mode: mode_for(&project, Mode::Production),
                config: project.config,
                out_dir: project.out_dir,
            };
            commands::build::run(action, cli.json)
        }
        Commands::Dev {
            project,
            host,
            port,
            write,
        } => {
            let span = tracing::info_span!("dev", cmd = "dev", cwd = %cwd.display());
            let _guard = span.enter();
            let action = commands::dev::DevAction {
                project: commands::ProjectAction {
                    cwd: cwd.clone(),
                    mode: mode_for(&project, Mode::Development),
                    config: project.config,
                    out_dir: project.out_dir,
                },
                host,
                port,
                write,
            };
            commands::dev::run(action, cli.json)
        }
        Commands::Inspect { project } => {
            let action = commands::ProjectAction {
                cwd: cwd.clone(),
                mode: mode_for(&project, Mode::Production),
                config: project.config,
                out_dir: project.out_dir,
            };
            commands::inspect::run(action, cli.json)
        }
    }
}
