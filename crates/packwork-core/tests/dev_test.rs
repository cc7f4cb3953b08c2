//! Development loop: watcher batches drive incremental rebuilds.

use packwork_core::config::DevServerConfig;
use packwork_core::{BuildContext, Bundler, DevOrchestrator, DevUpdate, DevWatcher, Mode, ProjectConfig};
use serial_test::serial;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn orchestrator(root: &Path) -> DevOrchestrator {
    let config = ProjectConfig::default();
    let ctx = BuildContext::from_config(root, Mode::Development, &config);
    let bundler = Bundler::new(ctx, &config).unwrap();
    DevOrchestrator::new(bundler, DevServerConfig::default())
}

fn app() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "src/main.js",
        "import Counter from './Counter';\nimport './main.css';\nCounter();\n",
    );
    write(
        dir.path(),
        "src/Counter.jsx",
        "export default function Counter() { return 1; }\n",
    );
    write(dir.path(), "src/main.css", ".counter { color: red; }\n");
    dir
}

#[test]
fn test_stylesheet_edit_is_hot() {
    let dir = app();
    let mut dev = orchestrator(dir.path());
    dev.initial_build().unwrap();

    write(dir.path(), "src/main.css", ".counter { color: green; }\n");
    let update = dev
        .invalidate(&[dir.path().join("src/main.css")])
        .unwrap();
    let DevUpdate::Update { modules } = &update else {
        panic!("expected hot update, got {update:?}");
    };
    assert_eq!(modules[0].key, "src/main.css");
    assert!(modules[0].code.contains("color: green"));
}

#[test]
fn test_new_import_reloads() {
    let dir = app();
    let mut dev = orchestrator(dir.path());
    dev.initial_build().unwrap();

    write(dir.path(), "src/extra.js", "export const extra = 1;\n");
    write(
        dir.path(),
        "src/main.js",
        "import Counter from './Counter';\nimport './extra';\nCounter();\n",
    );
    let update = dev.invalidate(&[
        dir.path().join("src/extra.js"),
        dir.path().join("src/main.js"),
    ]);
    assert_eq!(update, Some(DevUpdate::Reload));
    let current = dev.current().unwrap();
    assert!(current.graph.by_key("src/extra.js").is_some());
    assert!(current.graph.by_key("src/main.css").is_none());
}

#[test]
fn test_write_mode_keeps_out_dir_in_sync() {
    let dir = app();
    let mut dev = orchestrator(dir.path()).with_write(true);
    dev.initial_build().unwrap();
    let main = dir.path().join("dist/static/js/main.js");
    assert!(main.is_file());

    write(
        dir.path(),
        "src/Counter.jsx",
        "export default function Counter() { return 2; }\n",
    );
    dev.invalidate(&[dir.path().join("src/Counter.jsx")]).unwrap();
    assert!(std::fs::read_to_string(main).unwrap().contains("return 2;"));
}

#[tokio::test(flavor = "multi_thread")]
#[serial(watcher)]
async fn test_watch_loop_emits_updates() {
    let dir = app();
    let root = dunce::canonicalize(dir.path()).unwrap();
    let mut dev = orchestrator(&root);
    dev.initial_build().unwrap();

    let mut watcher = DevWatcher::start(&root, vec![root.join("dist")]).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let edit_root = root.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        write(
            &edit_root,
            "src/Counter.jsx",
            "export default function Counter() { return 3; }\n",
        );
    });

    let update = tokio::select! {
        () = dev.run(&mut watcher, tx) => None,
        update = tokio::time::timeout(Duration::from_secs(10), rx.recv()) => update.ok().flatten(),
    };
    let Some(DevUpdate::Update { modules }) = &update else {
        panic!("expected hot update, got {update:?}");
    };
    assert_eq!(modules[0].key, "src/Counter.jsx");
    assert!(modules[0].code.contains("return 3;"));
}
