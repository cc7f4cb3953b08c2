//! `packwork inspect` command implementation.
//!
//! Builds in memory and reports the module graph and chunk layout. Nothing
//! is written.

use super::{format_size, print_json, ErrorJson, ProjectAction};
use miette::{IntoDiagnostic, Result};
use packwork_core::bundler::ChunkKind;
use packwork_core::BuildOutput;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct InspectJson {
    ok: bool,
    mode: &'static str,
    modules: Vec<ModuleJson>,
    chunks: Vec<ChunkJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorJson>,
}

#[derive(Debug, Serialize)]
struct ModuleJson {
    key: String,
    kind: &'static str,
    chunk: Option<String>,
    dependencies: Vec<DependencyJson>,
}

#[derive(Debug, Serialize)]
struct DependencyJson {
    specifier: String,
    module: String,
    dynamic: bool,
}

#[derive(Debug, Serialize)]
struct ChunkJson {
    name: String,
    kind: ChunkKind,
    modules: Vec<String>,
    files: Vec<String>,
    size: usize,
}

/// Run the inspect command.
pub fn run(action: ProjectAction, json: bool) -> Result<()> {
    let result = action.open().and_then(|(bundler, _)| bundler.build());
    let output = match result {
        Ok(output) => output,
        Err(err) => {
            if json {
                print_json(&InspectJson {
                    ok: false,
                    mode: action.mode.as_str(),
                    modules: Vec::new(),
                    chunks: Vec::new(),
                    error: Some(ErrorJson::from(&err)),
                });
                std::process::exit(1);
            }
            return Err(err).into_diagnostic();
        }
    };

    let report = InspectJson {
        ok: true,
        mode: action.mode.as_str(),
        modules: modules(&output),
        chunks: chunks(&output),
        error: None,
    };
    if json {
        print_json(&report);
    } else {
        print_human(&report);
    }
    Ok(())
}

fn modules(output: &BuildOutput) -> Vec<ModuleJson> {
    output
        .graph
        .iter()
        .map(|m| ModuleJson {
            key: m.key.clone(),
            kind: m.kind().as_str(),
            chunk: output
                .chunks
                .chunk_of(m.id)
                .and_then(|c| output.chunks.get(c))
                .map(|c| c.name.clone()),
            dependencies: m
                .dependencies
                .iter()
                .filter_map(|d| {
                    output.graph.get(d.target).map(|t| DependencyJson {
                        specifier: d.specifier.clone(),
                        module: t.key.clone(),
                        dynamic: d.dynamic,
                    })
                })
                .collect(),
        })
        .collect()
}

fn chunks(output: &BuildOutput) -> Vec<ChunkJson> {
    output
        .chunks
        .chunks()
        .iter()
        .map(|chunk| {
            let files: Vec<String> = output
                .emission
                .chunk_files(chunk.id)
                .map(|f| f.css.iter().chain(std::iter::once(&f.js)).cloned().collect())
                .unwrap_or_default();
            let size = files
                .iter()
                .filter_map(|path| output.emission.file(path))
                .map(|f| f.size())
                .sum();
            ChunkJson {
                name: chunk.name.clone(),
                kind: chunk.kind,
                modules: chunk
                    .modules
                    .iter()
                    .filter_map(|&id| output.graph.get(id).map(|m| m.key.clone()))
                    .collect(),
                files,
                size,
            }
        })
        .collect()
}

fn print_human(report: &InspectJson) {
    println!("  {} modules, {} chunks ({})", report.modules.len(), report.chunks.len(), report.mode);
    for chunk in &report.chunks {
        println!(
            "  {} [{}] {}",
            chunk.name,
            chunk.kind.as_str(),
            format_size(chunk.size)
        );
        for module in &chunk.modules {
            println!("    {module}");
        }
    }
}
