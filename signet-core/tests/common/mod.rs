//! Shared fixtures for integration tests

#![allow(dead_code)]

use signet_core::config::{BuildConfig, BuildOverrides};
use signet_core::launcher::engine::{Engine, Outcome};
use signet_core::launcher::trust::{BinaryTrust, SignatureStatus};
use signet_core::table::SignatureTable;
use signet_core::{DetectionLevel, EmbeddedSignature};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tempfile::TempDir;

static INIT: Once = Once::new();

/// Initialize logging for tests (only once per test run)
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// `hello.py` importing a package, a sibling module and a stdlib module
///
/// ```text
/// hello.py          import world, worldly, json
/// world/__init__.py from . import sub
/// world/sub.py
/// worldly.py
/// ```
pub fn hello_project() -> TempDir {
    init_test_logging();
    let dir = TempDir::new().expect("tempdir");
    write(
        dir.path(),
        "hello.py",
        "import json\nimport world\nimport worldly\n\nprint(world.greeting(), worldly.NAME)\n",
    );
    write(
        dir.path(),
        "world/__init__.py",
        "from . import sub\n\ndef greeting():\n    return sub.WORD\n",
    );
    write(dir.path(), "world/sub.py", "WORD = 'hello'\n");
    write(dir.path(), "worldly.py", "NAME = 'world'\n");
    dir
}

pub fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create fixture dir");
    }
    fs::write(path, content).expect("write fixture");
}

/// Append to a file, as a tampering user would
pub fn append(path: &Path, content: &str) {
    let mut existing = fs::read(path).expect("read fixture");
    existing.extend_from_slice(content.as_bytes());
    fs::write(path, existing).expect("rewrite fixture");
}

/// Build configuration for `hello.py` that never runs an interpreter
pub fn config(dir: &Path, overrides: BuildOverrides) -> BuildConfig {
    BuildConfig::builder(dir)
        .with_overrides(BuildOverrides {
            scripts: vec![dir.join("hello.py")],
            probe_interpreter: Some(false),
            ..overrides
        })
        .build()
        .expect("valid config")
}

/// The table as the generated launcher would embed it
pub fn embed(table: &SignatureTable) -> &'static [EmbeddedSignature] {
    let rows: Vec<EmbeddedSignature> = table
        .signatures()
        .iter()
        .map(|s| {
            EmbeddedSignature::new(
                Box::leak(s.digest.clone().into_boxed_str()),
                Box::leak(s.module_name.clone().into_boxed_str()),
            )
        })
        .collect();
    Box::leak(rows.into_boxed_slice())
}

/// Trust verdict fixed in advance
pub struct FixedTrust(pub SignatureStatus);

impl BinaryTrust for FixedTrust {
    fn verify(&self, _binary: &Path) -> SignatureStatus {
        self.0.clone()
    }
}

/// Run a launcher engine installed next to `hello.py`
pub fn launch(
    dir: &Path,
    table: &SignatureTable,
    compiled: DetectionLevel,
    args: &[&str],
    env_override: Option<&str>,
) -> (Outcome, String) {
    let binary: PathBuf = dir.join("hello");
    let mut engine = Engine::new("hello.py", embed(table), compiled, binary)
        .with_trust(FixedTrust(SignatureStatus::Unsigned));
    let mut diagnostics = Vec::new();
    let outcome = engine.run(
        args.iter().map(OsString::from).collect(),
        env_override,
        &mut diagnostics,
    );
    (outcome, String::from_utf8_lossy(&diagnostics).into_owned())
}
