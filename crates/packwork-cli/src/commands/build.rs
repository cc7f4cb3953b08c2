//! `packwork build` command implementation.
//!
//! Runs a full build and writes it to the output directory. Production
//! builds fail fast: nothing is written when any module, minimizer or
//! config error occurs.

use super::{format_size, print_json, ErrorJson, FileJson, ProjectAction};
use miette::{IntoDiagnostic, Result};
use packwork_core::bundler::OutputKind;
use packwork_core::{BuildError, BuildOutput, Bundler};
use serde::Serialize;
use std::time::Instant;

/// JSON output for the build command.
#[derive(Debug, Serialize)]
struct BuildResultJson {
    ok: bool,
    mode: &'static str,
    files: Vec<FileJson>,
    duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorJson>,
}

/// Run the build command.
pub fn run(action: ProjectAction, json: bool) -> Result<()> {
    let start = Instant::now();
    let result = build(&action);
    let duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok((bundler, output)) => {
            if json {
                print_json(&BuildResultJson {
                    ok: true,
                    mode: action.mode.as_str(),
                    files: output.files().iter().map(FileJson::from).collect(),
                    duration_ms,
                    error: None,
                });
            } else {
                print_summary(&bundler, &output, duration_ms);
            }
            Ok(())
        }
        Err(err) => {
            tracing::debug!(code = err.code(), "build failed");
            if json {
                print_json(&BuildResultJson {
                    ok: false,
                    mode: action.mode.as_str(),
                    files: Vec::new(),
                    duration_ms,
                    error: Some(ErrorJson::from(&err)),
                });
                std::process::exit(1);
            }
            Err(err).into_diagnostic()
        }
    }
}

fn build(action: &ProjectAction) -> Result<(Bundler, BuildOutput), BuildError> {
    let (bundler, _config) = action.open()?;
    let output = bundler.build()?;
    bundler.write(&output)?;
    Ok((bundler, output))
}

fn print_summary(bundler: &Bundler, output: &BuildOutput, duration_ms: u64) {
    let ctx = bundler.context();
    println!(
        "  {} build: {} modules, {} chunks -> {} ({}ms)",
        ctx.mode,
        output.graph.len(),
        output.chunks.len(),
        ctx.out_dir.display(),
        duration_ms
    );
    let listed: Vec<_> = output
        .files()
        .iter()
        .filter(|f| f.kind != OutputKind::SourceMap)
        .collect();
    let width = listed.iter().map(|f| f.path.len()).max().unwrap_or(0);
    for file in listed {
        println!("    {:<width$}  {}", file.path, format_size(file.size()));
    }
}
