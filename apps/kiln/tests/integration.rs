//! Integration tests for the kiln CLI

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const RECIPE: &str = r#"
metadata:
  name: demo
  version: 1.0.0
base: alpine:3.20
facts:
  APP_DIR: /app
environment:
  variables:
    GREETING: hello
steps:
  - mkdir: ${APP_DIR}
  - workdir: ${APP_DIR}
  - copy: { from: "*.txt", to: "." }
  - run: echo "$GREETING" > greeting.out
  - chmod: { path: /app/*.sh, mode: executable, allow_empty: true }
  - cmd: cat greeting.out
"#;

struct Workspace {
    _temp: TempDir,
    root: PathBuf,
}

impl Workspace {
    fn new(recipe: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        std::fs::create_dir_all(root.join("ctx")).unwrap();
        std::fs::write(root.join("ctx/notes.txt"), "notes").unwrap();
        std::fs::write(root.join("kiln.yml"), recipe).unwrap();
        std::fs::write(root.join("config.toml"), "").unwrap();
        Self { _temp: temp, root }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    fn kiln(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_kiln"))
            .args(args)
            .arg("--config")
            .arg(self.path("config.toml"))
            .arg("--color")
            .arg("never")
            .env_remove("KILN_OUTPUT")
            .env_remove("KILN_EMPTY_GLOB")
            .env_remove("KILN_STEP_TIMEOUT")
            .env_remove("KILN_SEQUENCE_TIMEOUT")
            .env_remove("KILN_SHELL")
            .env_remove("RUST_LOG")
            .output()
            .expect("Failed to execute kiln")
    }

    fn build(&self, extra: &[&str]) -> Output {
        let recipe = self.path("kiln.yml");
        let source = self.path("ctx");
        let output = self.path("out");
        let mut args = vec![
            "build",
            path_str(&recipe),
            "--source",
            path_str(&source),
            "--output",
            path_str(&output),
        ];
        args.extend_from_slice(extra);
        self.kiln(&args)
    }
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

fn stdout_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("invalid JSON ({e}): {stdout}"))
}

#[test]
fn test_cli_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_kiln"))
        .arg("--version")
        .output()
        .expect("Failed to execute kiln");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("kiln"));
}

#[test]
fn test_cli_help() {
    let output = Command::new(env!("CARGO_BIN_EXE_kiln"))
        .arg("--help")
        .output()
        .expect("Failed to execute kiln");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Declarative container image builder"));
    assert!(stdout.contains("build"));
    assert!(stdout.contains("plan"));
    assert!(stdout.contains("inspect"));
}

#[test]
fn test_cli_invalid_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_kiln"))
        .arg("invalid-command")
        .output()
        .expect("Failed to execute kiln");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unrecognized subcommand"));
}

#[test]
fn test_plan_lists_steps_without_running_them() {
    let ws = Workspace::new(RECIPE);
    let recipe = ws.path("kiln.yml");
    let output = ws.kiln(&["plan", path_str(&recipe), "--json"]);

    assert!(output.status.success(), "{output:?}");
    let value = stdout_json(&output);
    assert_eq!(value["type"], "plan");
    let steps = value["data"]["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 6);
    assert_eq!(steps[0]["kind"], "create-directory");
    assert_eq!(steps[0]["path"], "/app");
    assert_eq!(steps[5]["index"], 6);
    assert!(!ws.path("ctx/greeting.out").exists());
    assert!(!ws.path("out").exists());
}

#[test]
fn test_plan_renders_table() {
    let ws = Workspace::new(RECIPE);
    let recipe = ws.path("kiln.yml");
    let output = ws.kiln(&["plan", path_str(&recipe)]);

    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("demo:1.0.0"));
    assert!(stdout.contains("set-working-directory"));
    assert!(stdout.contains("set-startup-command"));
}

#[test]
fn test_build_then_inspect() {
    let ws = Workspace::new(RECIPE);
    let output = ws.build(&["--json"]);

    assert!(output.status.success(), "{output:?}");
    let report = stdout_json(&output);
    assert_eq!(report["type"], "build_report");
    assert_eq!(report["data"]["image"], "demo:1.0.0");
    assert_eq!(report["data"]["steps_executed"], 6);

    let rootfs = ws.path("out/rootfs");
    assert_eq!(
        std::fs::read_to_string(rootfs.join("app/greeting.out"))
            .unwrap()
            .trim(),
        "hello"
    );
    assert!(rootfs.join("app/notes.txt").is_file());

    let out = ws.path("out");
    let inspected = ws.kiln(&["inspect", path_str(&out), "--json"]);
    assert!(inspected.status.success(), "{inspected:?}");
    let descriptor = stdout_json(&inspected);
    assert_eq!(descriptor["type"], "image");
    assert_eq!(descriptor["data"]["startup_command"], "cat greeting.out");
    assert_eq!(descriptor["data"]["working_dir"], "/app");
}

#[test]
fn test_failing_step_exits_nonzero_and_names_step() {
    let ws = Workspace::new(&RECIPE.replace(r#"echo "$GREETING" > greeting.out"#, "exit 3"));
    let output = ws.build(&[]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("step 4"), "{stderr}");
    assert!(!ws.path("out").exists());
}

#[test]
fn test_failure_json_carries_step_index() {
    let ws = Workspace::new(&RECIPE.replace(r#"from: "*.txt""#, r#"from: "*.missing""#));
    let output = ws.build(&["--json"]);

    assert_eq!(output.status.code(), Some(1));
    let value = stdout_json(&output);
    assert_eq!(value["failed_step"], 3);
    assert!(value["error"].as_str().unwrap().contains("*.missing"));
    let source = &value["detail"]["StepFailed"]["source"];
    assert_eq!(source["Build"]["SourceNotFound"]["pattern"], "*.missing");
}

#[test]
fn test_empty_glob_flag_relaxes_policy() {
    let ws = Workspace::new(&RECIPE.replace(r#"from: "*.txt""#, r#"from: "*.missing""#));
    let output = ws.build(&["--empty-glob", "ignore", "--json"]);

    assert!(output.status.success(), "{output:?}");
    assert!(ws.path("out/image.json").is_file());
}

#[test]
fn test_inspect_missing_image_fails() {
    let ws = Workspace::new(RECIPE);
    let missing = ws.path("nowhere");
    let output = ws.kiln(&["inspect", path_str(&missing)]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Error:"), "{stderr}");
}
