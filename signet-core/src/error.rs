//! Error types with clear, actionable messages
//!
//! Build and signing failures are fatal to the invocation that raised them.
//! Resolution problems are not errors (see `resolver::Unresolved`) and tamper
//! violations only surface through the launcher's stderr and exit status.

#[cfg(feature = "build")]
use std::path::PathBuf;
#[cfg(feature = "build")]
use thiserror::Error;

/// Fatal build configuration errors. No partial output is kept.
#[cfg(feature = "build")]
#[derive(Error, Debug)]
pub enum BuildError {
    /// The launcher template does not exist
    #[error("missing 'template' source '{path}'")]
    MissingTemplate { path: PathBuf },

    /// The launcher template is not a Rust source file
    #[error("'template' source '{path}' is not a recognized launcher source (expected .rs)")]
    UnrecognizedTemplate { path: PathBuf },

    /// A required substitution marker is absent from the template
    #[error("missing declaration '{marker}' in launcher template {template}\n\nThe template may be malformed or written for an incompatible signet version.")]
    MissingMarker { marker: &'static str, template: String },

    /// Detection level outside 0..=3
    #[error("invalid detection level {0}, valid choices are 0 (disabled), 1 (warn), 2 (normal), 3 (signed binary)")]
    InvalidDetection(u8),

    /// A version string could not be converted to a resource version
    #[error("invalid resource version \"{value}\": {reason}")]
    InvalidVersion { value: String, reason: String },

    /// A resource field has no value from any source
    #[error("when mkresource is enabled, __{field}__ must be set in {script} (or provided by project metadata)")]
    MissingResourceField { field: String, script: PathBuf },

    /// No entry scripts to build
    #[error("no scripts to build\n\nList them under 'build.scripts' in signet.yml or pass them on the command line.")]
    NoScripts,

    /// The entry script is missing
    #[error("entry script not found: {path}")]
    EntryNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The entry script cannot be analyzed
    #[error("entry script {path} could not be parsed: {reason}")]
    EntryUnparseable { path: PathBuf, reason: String },

    /// A signed file could not be hashed
    #[error("failed to hash {path} for module '{module}'")]
    Hash {
        module: String,
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// The configuration file could not be read or parsed
    #[error("failed to load configuration from {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    /// Generic I/O failure while writing build output
    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The compile-and-link step failed
    #[error("failed to compile launcher for {script}: {reason}")]
    Compile { script: PathBuf, reason: String },
}

/// Code-signing failures. A previously built, unsigned launcher stays usable.
#[cfg(feature = "sign")]
#[derive(Error, Debug)]
pub enum SignError {
    /// The signing tool could not be found
    #[error("missing signing tool: {0}\n\nInstall the Windows SDK or set 'sign.signtool' in signet.yml.")]
    MissingTool(String),

    /// No certificate file was configured, or it does not exist
    #[error("missing the certificate file '{path}'")]
    MissingCertificate { path: PathBuf },

    /// Neither a passphrase nor a saved passphrase was provided
    #[error("signing requires either 'password' or 'savedpassword' for certificate '{identity}'")]
    MissingCredential { identity: String },

    /// The credential store could not be accessed
    #[error("credential store error: {0}")]
    Keystore(String),

    /// The binary to sign does not exist
    #[error("missing '{path}' to sign")]
    MissingBinary { path: PathBuf },

    /// The signing tool failed with a non-retryable status
    #[error("signing {path} failed with exit code {code}: {detail}")]
    SigningFailed {
        path: PathBuf,
        code: i32,
        detail: String,
    },

    /// Every timestamp server/attempt combination failed
    #[error("exhausted timestamp servers after {attempts} attempts; {path} is signed but carries no trusted timestamp")]
    TimestampExhausted { path: PathBuf, attempts: usize },

    /// The signing tool could not be started
    #[error("failed to run signing tool {tool}")]
    Spawn {
        tool: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading the interactive passphrase failed
    #[error("failed to read passphrase")]
    Prompt(#[source] std::io::Error),
}

#[cfg(feature = "sign")]
impl SignError {
    /// Log errors that leave a binary in a weaker state than requested
    pub fn log_if_security_critical(&self) {
        match self {
            SignError::TimestampExhausted { .. } | SignError::SigningFailed { .. } => {
                tracing::error!(target: "security", "SIGNING FAILURE: {}", self);
            }
            _ => {}
        }
    }
}
