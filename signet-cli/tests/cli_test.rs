//! Integration tests for the `signet` binary
//!
//! These run the built binary against throwaway projects and check its
//! output and exit status.

use anyhow::Result;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn signet(dir: &Path, args: &[&str]) -> Result<Output> {
    Ok(Command::new(env!("CARGO_BIN_EXE_signet"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()?)
}

fn project() -> Result<TempDir> {
    let dir = TempDir::new()?;
    fs::write(dir.path().join("hello.py"), "import world\nworld.greet()\n")?;
    fs::create_dir_all(dir.path().join("world"))?;
    fs::write(
        dir.path().join("world/__init__.py"),
        "def greet():\n    print('Hello world')\n",
    )?;
    fs::write(
        dir.path().join("signet.yml"),
        "build:\n  scripts: [hello.py]\n  probe_interpreter: false\n",
    )?;
    Ok(dir)
}

#[test]
fn test_sigs_json_lists_sorted_signatures() -> Result<()> {
    let dir = project()?;
    let output = signet(dir.path(), &["sigs", "--json"])?;
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let value: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let scripts = value.as_array().expect("array of scripts");
    assert_eq!(scripts.len(), 1);
    assert_eq!(scripts[0]["entry"], "hello");

    let modules: Vec<&str> = scripts[0]["signatures"]
        .as_array()
        .expect("signatures")
        .iter()
        .filter_map(|s| s["module_name"].as_str())
        .collect();
    assert_eq!(modules, vec!["hello", "world"]);

    for signature in scripts[0]["signatures"].as_array().unwrap_or(&Vec::new()) {
        let digest = signature["digest"].as_str().unwrap_or_default();
        assert!(digest.starts_with("sha256:") && digest.len() == 71, "{digest}");
    }
    Ok(())
}

#[test]
fn test_sigs_exclude_flag() -> Result<()> {
    let dir = project()?;
    let output = signet(dir.path(), &["sigs", "--json", "--exclude", "world"])?;
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(value[0]["signatures"].as_array().map(Vec::len), Some(1));
    Ok(())
}

#[test]
fn test_sigs_table_output() -> Result<()> {
    let dir = project()?;
    let output = signet(dir.path(), &["sigs"])?;
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("(2 signatures)"), "{stdout}");
    assert!(stdout.contains("Module"));
    assert!(stdout.contains("world"));
    Ok(())
}

#[test]
fn test_detection_level_out_of_range_is_rejected() -> Result<()> {
    let dir = project()?;
    let output = signet(dir.path(), &["sigs", "--detection", "7"])?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--detection"));
    Ok(())
}

#[test]
fn test_missing_template_fails_with_context() -> Result<()> {
    let dir = project()?;
    let output = signet(dir.path(), &["build", "--template", "nope.rs"])?;
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid build configuration"), "{stderr}");
    assert!(!dir.path().join("hello").exists());
    Ok(())
}

#[test]
fn test_no_scripts_configured() -> Result<()> {
    let dir = TempDir::new()?;
    let output = signet(dir.path(), &["sigs"])?;
    assert!(!output.status.success());
    Ok(())
}

#[test]
fn test_sign_missing_launcher() -> Result<()> {
    let dir = project()?;
    let tool = dir.path().join("signtool.exe");
    fs::write(&tool, b"")?;
    let output = signet(
        dir.path(),
        &[
            "sign",
            "--signtool",
            tool.to_str().unwrap_or_default(),
            "--pfx-file",
            "cert.pfx",
            "missing.exe",
        ],
    )?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("missing.exe"));
    Ok(())
}
