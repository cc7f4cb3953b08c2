//! Integration tests for `packwork build --json` and `packwork inspect --json`.
//!
//! These tests verify:
//! - JSON output is always valid JSON with an `ok` boolean
//! - Successful builds list every written file with its size
//! - Failures carry a SCREAMING_SNAKE error code and exit non-zero

use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

fn cargo_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO"));
    cmd.args(["run", "-q", "-p", "packwork-cli", "--bin", "packwork", "--"]);
    cmd.env_remove("NODE_ENV");
    cmd
}

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn project(root: &Path) {
    write(
        root,
        "src/main.js",
        "import { greet } from './greet';\nimport './main.css';\nconsole.log(greet());\n",
    );
    write(root, "src/greet.js", "export function greet() { return 'hi'; }\n");
    write(root, "src/main.css", ".app { color: red; }\n");
    write(
        root,
        "public/index.html",
        "<html><head><title>app</title></head><body></body></html>",
    );
    write(root, "public/robots.txt", "User-agent: *\n");
}

fn run_json(args: &[&str], root: &Path) -> (bool, serde_json::Value) {
    let output = cargo_bin()
        .args(args)
        .args(["--json", "--cwd"])
        .arg(root)
        .output()
        .expect("Failed to run packwork");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json = serde_json::from_str(&stdout)
        .unwrap_or_else(|e| panic!("stdout should be valid JSON ({e}): {stdout}"));
    (output.status.success(), json)
}

#[test]
fn test_build_json_success() {
    let dir = tempdir().unwrap();
    project(dir.path());

    let (success, json) = run_json(&["build"], dir.path());
    assert!(success);
    assert_eq!(json["ok"], true);
    assert_eq!(json["mode"], "production");
    assert!(json["duration_ms"].is_u64());
    assert!(json.get("error").is_none());

    let files = json["files"].as_array().unwrap();
    let paths: Vec<&str> = files.iter().map(|f| f["path"].as_str().unwrap()).collect();
    assert!(paths.iter().any(|p| p.starts_with("static/js/main.") && p.ends_with(".js")));
    assert!(paths.iter().any(|p| p.starts_with("static/js/runtime~main.")));
    assert!(paths.iter().any(|p| p.starts_with("static/css/main.") && p.ends_with(".css")));
    assert!(paths.contains(&"index.html"));
    assert!(paths.contains(&"robots.txt"));
    assert!(paths.contains(&"asset-manifest.json"));

    for file in files {
        let path = dir.path().join("dist").join(file["path"].as_str().unwrap());
        let size = std::fs::metadata(&path).unwrap().len();
        assert_eq!(file["size"].as_u64().unwrap(), size);
    }
}

#[test]
fn test_build_json_respects_mode_and_out_dir() {
    let dir = tempdir().unwrap();
    project(dir.path());

    let (success, json) = run_json(
        &["build", "--mode", "development", "--out-dir", "out"],
        dir.path(),
    );
    assert!(success);
    assert_eq!(json["mode"], "development");
    assert!(dir.path().join("out/static/js/main.js").is_file());
    assert!(!dir.path().join("dist").exists());
}

#[test]
fn test_build_json_error_code_is_screaming_snake_case() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/main.js", "import './missing';\n");

    let (success, json) = run_json(&["build"], dir.path());
    assert!(!success);
    assert_eq!(json["ok"], false);

    let code = json["error"]["code"].as_str().unwrap();
    assert_eq!(code, "RESOLVE_NOT_FOUND");
    assert!(code
        .chars()
        .all(|c| c.is_ascii_uppercase() || c == '_'));
    assert!(json["error"]["message"]
        .as_str()
        .unwrap()
        .contains("./missing"));
    assert!(!dir.path().join("dist").exists(), "failed builds write nothing");
}

#[test]
fn test_build_json_bad_config() {
    let dir = tempdir().unwrap();
    project(dir.path());
    write(dir.path(), "packwork.json", "{ \"entry\": ");

    let (success, json) = run_json(&["build"], dir.path());
    assert!(!success);
    assert_eq!(json["error"]["code"], "CONFIG_PARSE_FAILED");
}

#[test]
fn test_inspect_json_reports_chunks() {
    let dir = tempdir().unwrap();
    project(dir.path());

    let (success, json) = run_json(&["inspect"], dir.path());
    assert!(success);
    let chunks = json["chunks"].as_array().unwrap();
    let names: Vec<&str> = chunks.iter().map(|c| c["name"].as_str().unwrap()).collect();
    assert_eq!(names, ["runtime~main", "main"]);
    assert_eq!(chunks[1]["kind"], "entry");

    let modules = json["modules"].as_array().unwrap();
    assert_eq!(modules.len(), 3);
    assert!(modules.iter().all(|m| m["chunk"] == "main"));
    assert!(!dir.path().join("dist").exists(), "inspect writes nothing");
}
