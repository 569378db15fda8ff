//! Code signing and timestamping of built launchers
//!
//! Signing happens in two steps so their failures stay distinguishable:
//! `sign` applies the signature (any failure is fatal), then `timestamp`
//! walks the [`TimestampServerPool`] until one authority answers. Running
//! out of attempts leaves a signed but untimestamped binary and reports
//! [`SignError::TimestampExhausted`].

pub mod credential;
pub mod signtool;
pub mod timestamp;

use crate::config::SignSection;
use crate::error::SignError;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub use credential::{
    resolve_credential, CredentialRequest, CredentialStore, KeyringStore, MemoryStore, Prompter,
    SigningCredential, StdinPrompter,
};
pub use signtool::{SignTool, SignToolCli, ToolOutput};
pub use timestamp::{TimestampServerPool, DEFAULT_RETRIES, DEFAULT_RETRYABLE_CODES};

/// Default file digest algorithm
pub const DEFAULT_DIGEST: &str = "sha256";

/// Resolved signing settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignConfig {
    pub credential: CredentialRequestConfig,
    pub digest: String,
    pub signtool: Option<PathBuf>,
    pub pool: TimestampServerPool,
    pub retries: usize,
    pub retryable_codes: BTreeSet<i32>,
}

/// Credential part of [`SignConfig`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialRequestConfig {
    pub certificate: Option<PathBuf>,
    pub password: Option<String>,
    pub saved: bool,
    pub reset: bool,
}

impl CredentialRequestConfig {
    pub fn to_request(&self) -> CredentialRequest {
        CredentialRequest {
            certificate: self.certificate.clone(),
            password: self.password.clone(),
            saved: self.saved,
            reset: self.reset,
        }
    }
}

impl Default for SignConfig {
    fn default() -> Self {
        SignConfig::from_section(SignSection::default())
    }
}

impl SignConfig {
    /// Fill defaults for everything the section leaves unset
    pub fn from_section(section: SignSection) -> Self {
        SignConfig {
            credential: CredentialRequestConfig {
                certificate: section.pfx_file,
                password: section.password,
                saved: section.savedpassword,
                reset: section.resetpassword,
            },
            digest: section.digest.unwrap_or_else(|| DEFAULT_DIGEST.to_string()),
            signtool: section.signtool,
            pool: section
                .timestamp_servers
                .map(TimestampServerPool::new)
                .unwrap_or_default(),
            retries: section.retries.unwrap_or(DEFAULT_RETRIES),
            retryable_codes: section
                .retryable_codes
                .map(|codes| codes.into_iter().collect())
                .unwrap_or_else(|| DEFAULT_RETRYABLE_CODES.into_iter().collect()),
        }
    }
}

/// Outcome of signing one binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignReport {
    pub binary: PathBuf,
    /// Authority that timestamped the signature
    pub server: String,
    /// Timestamp attempts made, the successful one included
    pub attempts: usize,
}

/// Drives a [`SignTool`] through sign and timestamp
pub struct CodeSigner<'a> {
    tool: &'a dyn SignTool,
    config: &'a SignConfig,
    start: Option<usize>,
}

impl<'a> CodeSigner<'a> {
    pub fn new(tool: &'a dyn SignTool, config: &'a SignConfig) -> Self {
        CodeSigner {
            tool,
            config,
            start: None,
        }
    }

    /// Fix the first server instead of picking one at random
    pub fn with_start_index(mut self, start: usize) -> Self {
        self.start = Some(start);
        self
    }

    /// Apply the signature; any non-zero exit is fatal
    pub fn sign(&self, binary: &Path, credential: &SigningCredential) -> Result<(), SignError> {
        if !binary.is_file() {
            return Err(SignError::MissingBinary {
                path: binary.to_path_buf(),
            });
        }

        info!("Signing {} with {}", binary.display(), credential.identity());
        let output = self.tool.sign(binary, credential, &self.config.digest)?;
        if output.code != 0 {
            return Err(SignError::SigningFailed {
                path: binary.to_path_buf(),
                code: output.code,
                detail: output.detail(),
            });
        }
        Ok(())
    }

    /// Timestamp the signature, retrying across the pool
    pub fn timestamp(&self, binary: &Path) -> Result<SignReport, SignError> {
        let pool = &self.config.pool;
        let start = self.start.unwrap_or_else(|| pool.random_start());
        let mut attempts = 0;

        for server in pool.schedule(start, self.config.retries) {
            attempts += 1;
            let output = self.tool.timestamp(binary, server, &self.config.digest)?;

            if output.code == 0 {
                info!(
                    "Timestamped {} via {} (attempt {})",
                    binary.display(),
                    server,
                    attempts
                );
                return Ok(SignReport {
                    binary: binary.to_path_buf(),
                    server: server.to_string(),
                    attempts,
                });
            }

            if !self.config.retryable_codes.contains(&output.code) {
                return Err(SignError::SigningFailed {
                    path: binary.to_path_buf(),
                    code: output.code,
                    detail: output.detail(),
                });
            }
            debug!(
                "timestamp attempt {} via {} failed with {}: {}",
                attempts,
                server,
                output.code,
                output.detail()
            );
        }

        warn!("No timestamp server answered for {}", binary.display());
        Err(SignError::TimestampExhausted {
            path: binary.to_path_buf(),
            attempts,
        })
    }

    pub fn sign_and_timestamp(
        &self,
        binary: &Path,
        credential: &SigningCredential,
    ) -> Result<SignReport, SignError> {
        self.sign(binary, credential)?;
        self.timestamp(binary)
    }
}

/// Sign every binary with one credential
///
/// The credential is resolved once, before the first binary is touched.
pub fn sign_binaries(
    binaries: &[PathBuf],
    config: &SignConfig,
    tool: &dyn SignTool,
    store: &dyn CredentialStore,
    prompter: &dyn Prompter,
) -> Result<Vec<SignReport>, SignError> {
    for binary in binaries {
        if !binary.is_file() {
            return Err(SignError::MissingBinary {
                path: binary.clone(),
            });
        }
    }

    let credential = resolve_credential(&config.credential.to_request(), store, prompter)?;
    let signer = CodeSigner::new(tool, config);

    binaries
        .iter()
        .map(|binary| signer.sign_and_timestamp(binary, &credential))
        .collect()
}
