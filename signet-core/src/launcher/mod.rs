//! Launcher runtime - verifies the embedded signature table, then runs the script
//!
//! Generated launchers are tiny `main` functions that call [`run_main`] with
//! their embedded constants. Everything here must work without the `build`
//! feature so the launcher links only hashing, module location and this
//! module.

pub mod delegate;
pub mod engine;
pub mod overrides;
pub mod trust;

use crate::locate::{default_interpreter, SearchPath};
use std::ffi::OsString;
use std::fmt;
use std::io::Write;
use tracing::debug;

pub use delegate::{Delegate, ProcessDelegate};
pub use engine::{Engine, Outcome, State, Violation};
pub use trust::{BinaryTrust, PlatformTrust, SignatureStatus};

/// Exit status of a launcher that refused to run its script
pub const VIOLATION_EXIT: i32 = -1;

/// Environment variable set for the delegated interpreter
pub const LAUNCHED_ENV: &str = "SIGNET";

/// How strictly the launcher enforces its table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum DetectionLevel {
    /// No verification at all
    Disabled = 0,
    /// Report violations, run anyway
    Warn = 1,
    /// Refuse to run on the first violation
    #[default]
    Normal = 2,
    /// Normal, plus the launcher binary must carry a trusted code signature
    RequireSigned = 3,
}

impl DetectionLevel {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(DetectionLevel::Disabled),
            1 => Some(DetectionLevel::Warn),
            2 => Some(DetectionLevel::Normal),
            3 => Some(DetectionLevel::RequireSigned),
            _ => None,
        }
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for DetectionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetectionLevel::Disabled => "disabled",
            DetectionLevel::Warn => "warn",
            DetectionLevel::Normal => "normal",
            DetectionLevel::RequireSigned => "signed",
        };
        write!(f, "{} ({})", self.as_u8(), name)
    }
}

/// One row of the embedded signature table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddedSignature {
    pub digest: &'static str,
    pub module: &'static str,
}

impl EmbeddedSignature {
    pub const fn new(digest: &'static str, module: &'static str) -> Self {
        EmbeddedSignature { digest, module }
    }
}

/// Entry point of a generated launcher
///
/// Returns the process exit status: the script's own status when it ran,
/// [`VIOLATION_EXIT`] when the launcher refused to run it.
pub fn run_main(script: &'static str, signatures: &'static [EmbeddedSignature], tamper: u8) -> i32 {
    init_tracing_from_env();

    let mut stderr = std::io::stderr();
    let Some(compiled) = DetectionLevel::from_u8(tamper) else {
        let _ = writeln!(stderr, "SECURITY VIOLATION: invalid compiled detection level {tamper}");
        return VIOLATION_EXIT;
    };

    let binary = match std::env::current_exe() {
        Ok(binary) => binary,
        Err(e) => {
            let _ = writeln!(stderr, "SECURITY VIOLATION: cannot locate the launcher binary: {e}");
            return VIOLATION_EXIT;
        }
    };

    let interpreter = default_interpreter();
    let install_dir = binary.parent().map(|p| p.to_path_buf()).unwrap_or_default();
    debug!(
        "launcher {} installed in {}, interpreter {}",
        binary.display(),
        install_dir.display(),
        interpreter.display()
    );

    let mut engine = Engine::new(script, signatures, compiled, binary)
        .with_search_path(SearchPath::for_runtime(&install_dir, None))
        .with_interpreter(interpreter.clone());

    let args: Vec<OsString> = std::env::args_os().skip(1).collect();
    let env_override = std::env::var(overrides::SECURITY_ENV).ok();

    match engine.run(args, env_override.as_deref(), &mut stderr) {
        Outcome::Exit(code) => code,
        Outcome::Delegate { args } => {
            let script_path = install_dir.join(script);
            match ProcessDelegate.delegate(&interpreter, &script_path, &args) {
                Ok(code) => code,
                Err(e) => {
                    let _ = writeln!(stderr, "failed to start {}: {}", interpreter.display(), e);
                    VIOLATION_EXIT
                }
            }
        }
    }
}

/// Enable tracing output when `SIGNET_LOGLEVEL` is set; silent otherwise
pub fn init_tracing_from_env() {
    let directive = std::env::var(overrides::LOG_ENV)
        .ok()
        .and_then(|value| overrides::log_directive(&value))
        .unwrap_or("off");

    let filter = tracing_subscriber::EnvFilter::new(format!("signet_core={directive}"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
