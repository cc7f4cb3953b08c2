//! `packwork dev` command implementation.
//!
//! Builds in memory, then watches the project and rebuilds incrementally.
//! Each rebuild's [`DevUpdate`] is printed (one JSON object per line with
//! `--json`) for whatever transport pushes updates to the page. With
//! `--write`, every build is also written to the output directory.

use super::{print_json, ErrorJson, FileJson, ProjectAction};
use miette::{IntoDiagnostic, Result};
use packwork_core::{DevOrchestrator, DevUpdate, DevWatcher};
use serde::Serialize;
use tokio::sync::mpsc;

/// Dev command action.
#[derive(Debug, Clone)]
pub struct DevAction {
    pub project: ProjectAction,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub write: bool,
}

#[derive(Debug, Serialize)]
struct ReadyJson {
    ok: bool,
    mode: &'static str,
    url: String,
    files: Vec<FileJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorJson>,
}

/// Run the dev command until interrupted.
pub fn run(action: DevAction, json: bool) -> Result<()> {
    let mode = action.project.mode.as_str();
    let (bundler, config) = match action.project.open() {
        Ok(opened) => opened,
        Err(err) => {
            if json {
                print_ready_error(mode, &err);
                std::process::exit(1);
            }
            return Err(err).into_diagnostic();
        }
    };

    let mut server = config.dev_server.clone();
    if let Some(host) = action.host {
        server.host = host;
    }
    if let Some(port) = action.port {
        server.port = port;
    }
    let url = format!(
        "http://{}:{}{}",
        server.host,
        server.port,
        bundler.context().public_path
    );
    let root = bundler.context().root.clone();
    let out_dir = bundler.context().out_dir.clone();

    let mut dev = DevOrchestrator::new(bundler, server).with_write(action.write);
    match dev.initial_build() {
        Ok(output) => {
            if json {
                print_line(&ReadyJson {
                    ok: true,
                    mode,
                    url: url.clone(),
                    files: output.files().iter().map(FileJson::from).collect(),
                    error: None,
                });
            } else {
                println!(
                    "  dev build ready: {} modules, {} files at {url}",
                    output.graph.len(),
                    output.files().len()
                );
            }
        }
        Err(err) => {
            if json {
                print_ready_error(mode, &err);
                std::process::exit(1);
            }
            return Err(err).into_diagnostic();
        }
    }

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    runtime.block_on(async move {
        let mut watcher = DevWatcher::start(&root, vec![out_dir]).into_diagnostic()?;
        let (tx, mut rx) = mpsc::unbounded_channel::<DevUpdate>();
        let printer = tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                report(&update, json);
            }
        });

        tokio::select! {
            () = dev.run(&mut watcher, tx) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("stopping");
            }
        }
        // The sender went away with the rebuild loop; drain what was queued.
        let _ = printer.await;
        Ok(())
    })
}

fn report(update: &DevUpdate, json: bool) {
    if json {
        print_line(update);
        return;
    }
    match update {
        DevUpdate::Update { modules } => {
            let keys: Vec<&str> = modules.iter().map(|m| m.key.as_str()).collect();
            println!("  hot update: {}", keys.join(", "));
        }
        DevUpdate::Reload => println!("  reload"),
        DevUpdate::Error { module, message } => match module {
            Some(module) => eprintln!("  error in {module}: {message}"),
            None => eprintln!("  error: {message}"),
        },
    }
}

fn print_ready_error(mode: &'static str, err: &packwork_core::BuildError) {
    print_json(&ReadyJson {
        ok: false,
        mode,
        url: String::new(),
        files: Vec::new(),
        error: Some(ErrorJson::from(err)),
    });
}

/// Compact JSON, one object per line.
fn print_line<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("error: failed to serialize output: {e}"),
    }
}
