//! Signing credentials: certificate, passphrase, persisted passphrase store

use crate::error::SignError;
use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Keyring service name for stored passphrases
pub const KEYRING_SERVICE: &str = "signet";

/// A certificate file and the passphrase that unlocks it
pub struct SigningCredential {
    certificate: PathBuf,
    passphrase: Zeroizing<String>,
}

impl SigningCredential {
    pub fn new(certificate: impl Into<PathBuf>, passphrase: Zeroizing<String>) -> Self {
        SigningCredential {
            certificate: certificate.into(),
            passphrase,
        }
    }

    pub fn certificate(&self) -> &Path {
        &self.certificate
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    pub fn identity(&self) -> String {
        certificate_identity(&self.certificate)
    }
}

impl std::fmt::Debug for SigningCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCredential")
            .field("certificate", &self.certificate)
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// Store key for a certificate: its file name without extension
pub fn certificate_identity(certificate: &Path) -> String {
    certificate
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Persisted passphrases keyed by certificate identity
pub trait CredentialStore {
    fn get(&self, identity: &str) -> Result<Option<Zeroizing<String>>, SignError>;
    fn set(&self, identity: &str, passphrase: &str) -> Result<(), SignError>;
    /// Delete the entry; deleting a missing entry succeeds
    fn delete(&self, identity: &str) -> Result<(), SignError>;
}

/// The operating system's keyring
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl Default for KeyringStore {
    fn default() -> Self {
        KeyringStore {
            service: KEYRING_SERVICE.to_string(),
        }
    }
}

impl KeyringStore {
    pub fn with_service(service: impl Into<String>) -> Self {
        KeyringStore {
            service: service.into(),
        }
    }

    fn entry(&self, identity: &str) -> Result<keyring::Entry, SignError> {
        keyring::Entry::new(&self.service, identity).map_err(|e| SignError::Keystore(e.to_string()))
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self, identity: &str) -> Result<Option<Zeroizing<String>>, SignError> {
        match self.entry(identity)?.get_password() {
            Ok(passphrase) => Ok(Some(Zeroizing::new(passphrase))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(SignError::Keystore(e.to_string())),
        }
    }

    fn set(&self, identity: &str, passphrase: &str) -> Result<(), SignError> {
        self.entry(identity)?
            .set_password(passphrase)
            .map_err(|e| SignError::Keystore(e.to_string()))
    }

    fn delete(&self, identity: &str) -> Result<(), SignError> {
        match self.entry(identity)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(SignError::Keystore(e.to_string())),
        }
    }
}

/// Process-local store, for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Zeroizing<String>>>,
}

impl MemoryStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Zeroizing<String>>>, SignError> {
        self.entries
            .lock()
            .map_err(|_| SignError::Keystore("credential store lock poisoned".to_string()))
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, identity: &str) -> Result<Option<Zeroizing<String>>, SignError> {
        Ok(self.lock()?.get(identity).cloned())
    }

    fn set(&self, identity: &str, passphrase: &str) -> Result<(), SignError> {
        self.lock()?
            .insert(identity.to_string(), Zeroizing::new(passphrase.to_string()));
        Ok(())
    }

    fn delete(&self, identity: &str) -> Result<(), SignError> {
        self.lock()?.remove(identity);
        Ok(())
    }
}

/// Asks the user for a passphrase
pub trait Prompter {
    fn prompt_secret(&self, message: &str) -> Result<Zeroizing<String>, SignError>;
}

/// Prompts on stderr and reads one line from stdin
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn prompt_secret(&self, message: &str) -> Result<Zeroizing<String>, SignError> {
        let mut stderr = io::stderr();
        write!(stderr, "{message}").map_err(SignError::Prompt)?;
        stderr.flush().map_err(SignError::Prompt)?;

        let mut line = Zeroizing::new(String::new());
        io::stdin().lock().read_line(&mut *line).map_err(SignError::Prompt)?;
        let trimmed = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed);
        Ok(line)
    }
}

/// How the passphrase should be obtained
#[derive(Debug, Clone, Default)]
pub struct CredentialRequest {
    pub certificate: Option<PathBuf>,
    /// Plaintext passphrase; wins over the store
    pub password: Option<String>,
    /// Use (and fill) the credential store
    pub saved: bool,
    /// Delete the stored passphrase first
    pub reset: bool,
}

/// Obtain the signing credential
///
/// A reset deletes the stored entry before anything else. A plaintext
/// passphrase is used as given (and saved when `saved` is set). Otherwise the
/// store is consulted and, when empty, the user is prompted once and the
/// answer saved.
pub fn resolve_credential(
    request: &CredentialRequest,
    store: &dyn CredentialStore,
    prompter: &dyn Prompter,
) -> Result<SigningCredential, SignError> {
    let certificate = request
        .certificate
        .clone()
        .ok_or_else(|| SignError::MissingCertificate {
            path: PathBuf::from("<not configured>"),
        })?;
    let identity = certificate_identity(&certificate);

    if request.reset {
        info!("Deleting stored passphrase for {}", identity);
        store.delete(&identity)?;
    }

    if !certificate.is_file() {
        return Err(SignError::MissingCertificate { path: certificate });
    }

    if let Some(password) = &request.password {
        if request.saved {
            store.set(&identity, password)?;
            info!("Saved passphrase for {} in the credential store", identity);
        }
        return Ok(SigningCredential::new(certificate, Zeroizing::new(password.clone())));
    }

    if !request.saved {
        return Err(SignError::MissingCredential { identity });
    }

    if let Some(passphrase) = store.get(&identity)? {
        debug!("using stored passphrase for {}", identity);
        return Ok(SigningCredential::new(certificate, passphrase));
    }

    let passphrase = prompter.prompt_secret(&format!("Enter passphrase for {identity}: "))?;
    store.set(&identity, &passphrase)?;
    info!("Saved passphrase for {} in the credential store", identity);
    Ok(SigningCredential::new(certificate, passphrase))
}
