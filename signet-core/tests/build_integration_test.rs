//! Builds driven by a `signet.yml` project file

mod common;

use common::{hello_project, write};
use pretty_assertions::assert_eq;
use serial_test::serial;
use signet_core::config::{BuildConfig, BuildOverrides};
use signet_core::error::BuildError;
use signet_core::locate::{default_interpreter, INTERPRETER_ENV};
use signet_core::pipeline::{self, CompileJob, Compiler};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

/// Writes a placeholder executable instead of invoking cargo
#[derive(Default)]
struct FakeCompiler {
    sources: RefCell<Vec<String>>,
}

impl Compiler for FakeCompiler {
    fn compile(&self, job: &CompileJob) -> Result<PathBuf, BuildError> {
        let source = fs::read_to_string(&job.main_rs).map_err(|source| BuildError::Io {
            path: job.main_rs.clone(),
            source,
        })?;
        self.sources.borrow_mut().push(source);
        let out = job.work_dir.join(&job.name);
        fs::write(&out, b"\x7fELF").map_err(|source| BuildError::Io {
            path: out.clone(),
            source,
        })?;
        Ok(out)
    }
}

const PROJECT: &str = r#"
metadata:
  name: hello
  version: "1.0"
build:
  scripts: [hello.py]
  detection: 3
  excludes: [worldly]
  probe_interpreter: false
"#;

fn load(dir: &Path) -> BuildConfig {
    BuildConfig::builder(dir)
        .load_file()
        .unwrap()
        .build()
        .unwrap()
}

#[test]
fn test_project_file_drives_the_build() {
    let dir = hello_project();
    write(dir.path(), "signet.yml", PROJECT);

    let compiler = FakeCompiler::default();
    let reports = pipeline::run(&load(dir.path()), &compiler).unwrap();

    assert_eq!(reports.len(), 1);
    assert!(reports[0].launcher.is_file());

    let sources = compiler.sources.borrow();
    let source = &sources[0];
    assert!(source.contains("const SCRIPT: &str = \"hello.py\";"));
    assert!(source.contains("const TAMPER: u8 = 3;"));
    assert!(source.contains("\"world.sub\""));
    assert!(!source.contains("\"worldly\""));
}

#[test]
fn test_command_line_overrides_project_file() {
    let dir = hello_project();
    write(dir.path(), "signet.yml", PROJECT);

    let config = BuildConfig::builder(dir.path())
        .load_file()
        .unwrap()
        .with_overrides(BuildOverrides {
            detection: Some(1),
            excludes: vec!["world".to_string()],
            ..Default::default()
        })
        .build()
        .unwrap();

    let sigs = pipeline::signatures_for(&config, &dir.path().join("hello.py")).unwrap();
    let names: Vec<&str> = sigs
        .table
        .signatures()
        .iter()
        .map(|s| s.module_name.as_str())
        .collect();
    // excludes accumulate across file and flags
    assert_eq!(names, vec!["hello"]);
    assert_eq!(config.detection().as_u8(), 1);
}

#[test]
fn test_template_without_marker_fails_before_output() {
    let dir = hello_project();
    write(
        dir.path(),
        "custom.rs",
        "const SCRIPT: &str = \"\";\nconst TAMPER: u8 = 0;\nfn main() {}\n",
    );

    let config = BuildConfig::builder(dir.path())
        .with_overrides(BuildOverrides {
            scripts: vec![PathBuf::from("hello.py")],
            template: Some(PathBuf::from("custom.rs")),
            probe_interpreter: Some(false),
            ..Default::default()
        })
        .build()
        .unwrap();

    let err = pipeline::run(&config, &FakeCompiler::default()).unwrap_err();
    assert!(
        matches!(err, BuildError::MissingMarker { marker, .. } if marker.starts_with("const SIGS")),
        "{err}"
    );
    assert!(!pipeline::launcher_path(&dir.path().join("hello.py")).exists());
}

#[test]
fn test_unparseable_entry_script() {
    let dir = hello_project();
    write(dir.path(), "hello.py", "print('unterminated\n");

    let config = common::config(dir.path(), BuildOverrides::default());
    let err = pipeline::run(&config, &FakeCompiler::default()).unwrap_err();
    assert!(matches!(err, BuildError::EntryUnparseable { .. }), "{err}");
}

#[test]
#[serial]
fn test_interpreter_from_environment() {
    std::env::set_var(INTERPRETER_ENV, "/opt/python/bin/python3");
    assert_eq!(default_interpreter(), PathBuf::from("/opt/python/bin/python3"));

    std::env::remove_var(INTERPRETER_ENV);
    assert_ne!(default_interpreter(), PathBuf::from("/opt/python/bin/python3"));
}
