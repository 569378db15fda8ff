//! The external code-signing tool

use super::credential::SigningCredential;
use crate::error::SignError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Exit status and captured output of one tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success() -> Self {
        ToolOutput {
            code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        ToolOutput {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Best single-line description of a failure
    pub fn detail(&self) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        text.trim().lines().last().unwrap_or("").to_string()
    }
}

/// Signs and timestamps binaries
pub trait SignTool {
    /// Apply a signature without a timestamp
    fn sign(
        &self,
        binary: &Path,
        credential: &SigningCredential,
        digest: &str,
    ) -> Result<ToolOutput, SignError>;

    /// Timestamp an existing signature against one server
    fn timestamp(&self, binary: &Path, server: &str, digest: &str) -> Result<ToolOutput, SignError>;
}

/// Microsoft `signtool.exe`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignToolCli {
    path: PathBuf,
}

impl SignToolCli {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SignToolCli { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Find the tool: configured path, then `PATH`, then the Windows SDK
    pub fn discover(configured: Option<&Path>) -> Result<Self, SignError> {
        let kits_roots: Vec<PathBuf> = ["ProgramFiles(x86)", "ProgramFiles"]
            .iter()
            .filter_map(std::env::var_os)
            .map(|base| PathBuf::from(base).join("Windows Kits"))
            .collect();
        Self::discover_in(configured, std::env::var_os("PATH"), &kits_roots)
    }

    /// Discovery against explicit search locations
    pub fn discover_in(
        configured: Option<&Path>,
        path_var: Option<OsString>,
        kits_roots: &[PathBuf],
    ) -> Result<Self, SignError> {
        if let Some(configured) = configured {
            return if configured.is_file() {
                Ok(SignToolCli::new(configured))
            } else {
                Err(SignError::MissingTool(configured.display().to_string()))
            };
        }

        if let Some(path_var) = path_var {
            for dir in std::env::split_paths(&path_var) {
                for name in ["signtool.exe", "signtool"] {
                    let candidate = dir.join(name);
                    if candidate.is_file() {
                        debug!("found signing tool on PATH: {}", candidate.display());
                        return Ok(SignToolCli::new(candidate));
                    }
                }
            }
        }

        for root in kits_roots {
            if let Some(found) = newest_in_kits(root) {
                debug!("found signing tool in Windows SDK: {}", found.display());
                return Ok(SignToolCli::new(found));
            }
        }

        Err(SignError::MissingTool("signtool.exe".to_string()))
    }

    /// `sign` invocation; the passphrase goes straight into the command
    fn sign_command(&self, binary: &Path, credential: &SigningCredential, digest: &str) -> Command {
        let mut command = Command::new(&self.path);
        command
            .arg("sign")
            .arg("/f")
            .arg(credential.certificate())
            .arg("/p")
            .arg(credential.passphrase())
            .arg("/fd")
            .arg(digest)
            .arg(binary);
        command
    }

    fn timestamp_command(&self, binary: &Path, server: &str, digest: &str) -> Command {
        let mut command = Command::new(&self.path);
        command
            .arg("timestamp")
            .arg("/tr")
            .arg(server)
            .arg("/td")
            .arg(digest)
            .arg(binary);
        command
    }

    fn run(&self, mut command: Command) -> Result<ToolOutput, SignError> {
        let output = command.output().map_err(|source| SignError::Spawn {
            tool: self.path.clone(),
            source,
        })?;

        Ok(ToolOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

impl SignTool for SignToolCli {
    fn sign(
        &self,
        binary: &Path,
        credential: &SigningCredential,
        digest: &str,
    ) -> Result<ToolOutput, SignError> {
        debug!(
            "{} sign /f {} /fd {} {}",
            self.path.display(),
            credential.certificate().display(),
            digest,
            binary.display()
        );
        self.run(self.sign_command(binary, credential, digest))
    }

    fn timestamp(&self, binary: &Path, server: &str, digest: &str) -> Result<ToolOutput, SignError> {
        debug!("{} timestamp /tr {} {}", self.path.display(), server, binary.display());
        self.run(self.timestamp_command(binary, server, digest))
    }
}

/// Newest `bin/<version>/<arch>/signtool.exe` under a Windows Kits root
fn newest_in_kits(root: &Path) -> Option<PathBuf> {
    let arch = if cfg!(target_arch = "aarch64") {
        "arm64"
    } else if cfg!(target_pointer_width = "64") {
        "x64"
    } else {
        "x86"
    };
    let pattern = root.join("*").join("bin").join("*").join(arch).join("signtool.exe");
    let mut found: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
        .ok()?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    found.sort();
    found.pop()
}
