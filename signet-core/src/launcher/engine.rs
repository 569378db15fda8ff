//! Verification state machine
//!
//! ```text
//! Start ──► Verifying ──► Clean ──► Delegated
//!   │           │ └─────► Warned ──► Delegated      (Warn)
//!   │           └───────► Violated                  (Normal, RequireSigned)
//!   ├─────────────────────────────► Delegated      (Disabled)
//!   └─────────────────────────────► Violated       (bad override flag)
//! ```
//!
//! Diagnostics go straight to the supplied writer rather than through
//! `tracing`; their exact text is part of the launcher's contract.

use super::overrides::{self, ParsedArgs};
use super::trust::{BinaryTrust, PlatformTrust, SignatureStatus};
use super::{DetectionLevel, EmbeddedSignature, VIOLATION_EXIT};
use crate::hasher;
use crate::locate::{normalize_source, probe, SearchPath};
use std::cell::OnceCell;
use std::ffi::OsString;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Start,
    Verifying,
    Violated,
    Warned,
    Clean,
    Delegated,
}

/// One failed check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// The file's digest differs from the table
    Modified {
        module: String,
        path: PathBuf,
        expected: String,
        actual: String,
    },
    /// The module no longer resolves to any file
    Missing { module: String },
    /// The file exists but cannot be read
    Unreadable {
        module: String,
        path: PathBuf,
        reason: String,
    },
    /// The launcher binary lacks a trusted code signature
    Untrusted {
        binary: PathBuf,
        status: SignatureStatus,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Modified { module, path, .. } => {
                write!(f, "module '{}' ({}) has been modified", module, path.display())
            }
            Violation::Missing { module } => write!(f, "module '{module}' is missing"),
            Violation::Unreadable { module, path, reason } => write!(
                f,
                "module '{}' ({}) cannot be read: {}",
                module,
                path.display(),
                reason
            ),
            Violation::Untrusted { binary, status } => {
                write!(f, "launcher {}: {}", binary.display(), status)
            }
        }
    }
}

/// What the launcher process should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Run the script with these arguments
    Delegate { args: Vec<OsString> },
    /// Exit without running the script
    Exit(i32),
}

/// Checks an embedded table against the installed files
pub struct Engine<'a> {
    script: &'a str,
    signatures: &'a [EmbeddedSignature],
    compiled: DetectionLevel,
    binary: PathBuf,
    install_dir: PathBuf,
    search_path: SearchPath,
    interpreter: Option<PathBuf>,
    extended_search_path: OnceCell<Option<SearchPath>>,
    trust: Box<dyn BinaryTrust + 'a>,
    states: Vec<State>,
}

impl<'a> Engine<'a> {
    /// `binary` is the launcher executable; its directory is the install location
    pub fn new(
        script: &'a str,
        signatures: &'a [EmbeddedSignature],
        compiled: DetectionLevel,
        binary: PathBuf,
    ) -> Self {
        let install_dir = binary.parent().map(Path::to_path_buf).unwrap_or_default();
        Engine {
            script,
            signatures,
            compiled,
            search_path: SearchPath::new([install_dir.clone()]),
            install_dir,
            binary,
            interpreter: None,
            extended_search_path: OnceCell::new(),
            trust: Box::new(PlatformTrust),
            states: vec![State::Start],
        }
    }

    pub fn with_search_path(mut self, search_path: SearchPath) -> Self {
        self.search_path = search_path;
        self
    }

    /// Interpreter probed for `sys.path` when a module is not found otherwise
    pub fn with_interpreter(mut self, interpreter: PathBuf) -> Self {
        self.interpreter = Some(interpreter);
        self
    }

    pub fn with_trust(mut self, trust: impl BinaryTrust + 'a) -> Self {
        self.trust = Box::new(trust);
        self
    }

    /// Current state
    pub fn state(&self) -> State {
        self.states.last().copied().unwrap_or(State::Start)
    }

    /// Every state entered so far, in order
    pub fn states(&self) -> &[State] {
        &self.states
    }

    /// Run the state machine
    ///
    /// `args` are the launcher's arguments (without the program name) and
    /// `env_override` is the value of `SIGNETSECURITY`, if set.
    pub fn run(
        &mut self,
        args: Vec<OsString>,
        env_override: Option<&str>,
        diagnostics: &mut dyn Write,
    ) -> Outcome {
        let ParsedArgs { level, passthrough } = match overrides::parse_args(args) {
            Ok(parsed) => parsed,
            Err(unknown) => {
                let _ = writeln!(diagnostics, "SECURITY VIOLATION: {unknown}");
                self.enter(State::Violated);
                return Outcome::Exit(VIOLATION_EXIT);
            }
        };

        let requested = level.or_else(|| {
            let value = env_override?;
            let parsed = overrides::level_from_env(value);
            if parsed.is_none() {
                warn!("ignoring {}={}", overrides::SECURITY_ENV, value);
            }
            parsed
        });

        let effective = requested.unwrap_or(self.compiled);
        if requested.is_some() {
            if let Some(line) = overrides::status_line(effective) {
                let _ = writeln!(diagnostics, "{line}");
            }
        }
        info!(
            "detection level {} (compiled {}) for {}",
            effective, self.compiled, self.script
        );

        if effective == DetectionLevel::Disabled {
            self.enter(State::Delegated);
            return Outcome::Delegate { args: passthrough };
        }

        self.enter(State::Verifying);
        let mut warned = false;

        for signature in self.signatures {
            let Some(violation) = self.check(signature) else {
                continue;
            };
            if effective == DetectionLevel::Warn {
                let _ = writeln!(diagnostics, "SECURITY WARNING: {violation}");
                warned = true;
            } else {
                return self.violate(&violation, diagnostics);
            }
        }

        match effective {
            DetectionLevel::RequireSigned => {
                if let Some(violation) = self.check_binary() {
                    return self.violate(&violation, diagnostics);
                }
            }
            DetectionLevel::Warn => {
                let status = self.trust.verify(&self.binary);
                if self.compiled == DetectionLevel::RequireSigned {
                    let _ = writeln!(
                        diagnostics,
                        "SECURITY WARNING: SECURITY MAXIMUM Enabled: launcher {}: {}",
                        self.binary.display(),
                        status
                    );
                    warned |= !status.is_trusted();
                } else {
                    debug!("advisory signature check: {}", status);
                }
            }
            _ => {}
        }

        if warned {
            self.enter(State::Warned);
        } else {
            self.enter(State::Clean);
        }
        self.enter(State::Delegated);
        Outcome::Delegate { args: passthrough }
    }

    fn enter(&mut self, state: State) {
        debug!("launcher state {:?} -> {:?}", self.state(), state);
        self.states.push(state);
    }

    fn violate(&mut self, violation: &Violation, diagnostics: &mut dyn Write) -> Outcome {
        let _ = writeln!(diagnostics, "SECURITY VIOLATION: {violation}");
        tracing::error!(target: "security", "{}", violation);
        self.enter(State::Violated);
        Outcome::Exit(VIOLATION_EXIT)
    }

    /// Compare one table row with the installed file
    pub fn check(&self, signature: &EmbeddedSignature) -> Option<Violation> {
        let module = signature.module.to_string();
        let Some(path) = self.module_path(signature.module) else {
            return Some(Violation::Missing { module });
        };

        match hasher::hash_file(&path) {
            Ok(actual) if hasher::digests_equal(signature.digest, &actual) => {
                debug!("verified {} ({})", signature.module, path.display());
                None
            }
            Ok(actual) => Some(Violation::Modified {
                module,
                path,
                expected: signature.digest.to_string(),
                actual,
            }),
            Err(e) => Some(Violation::Unreadable {
                module,
                path,
                reason: format!("{e:#}"),
            }),
        }
    }

    fn check_binary(&self) -> Option<Violation> {
        let status = self.trust.verify(&self.binary);
        if status.is_trusted() {
            debug!("launcher signature is trusted");
            None
        } else {
            Some(Violation::Untrusted {
                binary: self.binary.clone(),
                status,
            })
        }
    }

    /// File for a table row; the entry script is always the installed script
    fn module_path(&self, module: &str) -> Option<PathBuf> {
        if Path::new(self.script).file_stem().and_then(|s| s.to_str()) == Some(module) {
            let script = self.install_dir.join(self.script);
            return script.is_file().then_some(script);
        }

        if let Some(path) = self.search_path.locate(module).file() {
            return Some(normalize_source(path));
        }

        let extended = self.extended_search_path.get_or_init(|| {
            let interpreter = self.interpreter.as_ref()?;
            match probe(interpreter) {
                Ok(info) => Some(SearchPath::for_runtime(&self.install_dir, Some(&info))),
                Err(e) => {
                    warn!("cannot probe {}: {}", interpreter.display(), e);
                    None
                }
            }
        });
        extended
            .as_ref()
            .and_then(|search| search.locate(module).file().map(normalize_source))
    }
}
