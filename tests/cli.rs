//! CLI smoke tests for the `bsweep` binary.
//!
//! Only commands that never reach the toolchain are exercised here.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const SWEEP_TOML: &str = r#"
[project]
default_boards = ["uno"]

[board.uno]
platform = "atmelavr"

[board.esp32dev]
platform = "espressif32"
defines = ["ESP32_TEST"]
"#;

fn get_bsweep_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_bsweep"))
}

fn create_test_project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    fs::write(dir.path().join("sweep.toml"), SWEEP_TOML).expect("Failed to write sweep.toml");
    let blink = dir.path().join("examples").join("Blink");
    fs::create_dir_all(&blink).expect("Failed to create example");
    fs::write(blink.join("Blink.ino"), "void setup() {}\nvoid loop() {}\n")
        .expect("Failed to write sketch");
    fs::create_dir_all(dir.path().join("src")).expect("Failed to create src");
    dir
}

fn run_bsweep(project_dir: &Path, args: &[&str]) -> Option<Output> {
    let bin = get_bsweep_binary();
    if !bin.exists() {
        eprintln!("bsweep binary not found at {:?}, skipping", bin);
        return None;
    }
    Some(
        Command::new(bin)
            .args(args)
            .current_dir(project_dir)
            .env("BOARDSWEEP_NO_INTERACTIVE", "true")
            .env("NO_COLOR", "1")
            .output()
            .expect("Failed to run bsweep"),
    )
}

fn output_text(output: &Output) -> String {
    format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

#[test]
fn test_boards_lists_catalog() {
    let project = create_test_project();
    let Some(output) = run_bsweep(project.path(), &["boards"]) else {
        return;
    };
    let text = output_text(&output);
    assert!(output.status.success(), "{text}");
    assert!(text.contains("esp32dev"));
    assert!(text.contains("uno *"));
}

#[test]
fn test_unknown_board_fails_before_building() {
    let project = create_test_project();
    let Some(output) = run_bsweep(project.path(), &["build", "Blink", "--boards", "nope"]) else {
        return;
    };
    let text = output_text(&output);
    assert!(!output.status.success());
    assert!(text.contains("Unknown board 'nope'"), "{text}");
    assert!(!project.path().join(".build").exists());
}

#[test]
fn test_interactive_refused_when_disabled() {
    let project = create_test_project();
    let Some(output) = run_bsweep(project.path(), &["build", "--interactive"]) else {
        return;
    };
    assert!(!output.status.success());
    assert!(output_text(&output).contains("BOARDSWEEP_NO_INTERACTIVE"));
}

#[test]
fn test_cache_stats_and_clean_on_fresh_project() {
    let project = create_test_project();
    let cache_file = project.path().join(".build").join("uno").join("build_cache.json");
    fs::create_dir_all(cache_file.parent().unwrap()).unwrap();
    fs::write(
        &cache_file,
        r#"{"uno_Blink": {"Blink.ino": "0123abcd"}}"#,
    )
    .unwrap();

    let Some(output) = run_bsweep(project.path(), &["cache", "stats"]) else {
        return;
    };
    let text = output_text(&output);
    assert!(output.status.success(), "{text}");
    assert!(text.contains("Blink (1)"), "{text}");

    let Some(output) = run_bsweep(project.path(), &["cache", "clean", "--board", "uno"]) else {
        return;
    };
    assert!(output.status.success(), "{}", output_text(&output));
    assert!(!cache_file.exists());
}

#[test]
fn test_missing_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let Some(output) = run_bsweep(dir.path(), &["boards"]) else {
        return;
    };
    assert!(!output.status.success());
    assert!(output_text(&output).contains("sweep.toml not found"));
}
