//! Code-signature checks on the launcher binary itself

use std::fmt;
use std::path::Path;

/// Result of checking a binary's code signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    /// Signed, and the chain is trusted
    Trusted,
    /// No signature present
    Unsigned,
    /// A signature is present but not valid or not trusted
    Invalid(String),
    /// This platform has no signature verification
    Unsupported,
}

impl SignatureStatus {
    pub fn is_trusted(&self) -> bool {
        matches!(self, SignatureStatus::Trusted)
    }
}

impl fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureStatus::Trusted => write!(f, "signature is valid"),
            SignatureStatus::Unsigned => write!(f, "binary is not signed"),
            SignatureStatus::Invalid(status) => write!(f, "signature is not trusted ({status})"),
            SignatureStatus::Unsupported => {
                write!(f, "code signatures cannot be verified on this platform")
            }
        }
    }
}

/// Verifies a binary's code signature
pub trait BinaryTrust {
    fn verify(&self, binary: &Path) -> SignatureStatus;
}

/// Operating-system signature verification
///
/// On Windows this asks `Get-AuthenticodeSignature` for the signature status.
/// Other platforms report [`SignatureStatus::Unsupported`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PlatformTrust;

impl BinaryTrust for PlatformTrust {
    #[cfg(windows)]
    fn verify(&self, binary: &Path) -> SignatureStatus {
        use std::process::Command;

        let literal = binary.display().to_string().replace('\'', "''");
        let command = format!("(Get-AuthenticodeSignature -LiteralPath '{literal}').Status");
        let output = Command::new("powershell")
            .args(["-NoProfile", "-NonInteractive", "-Command", &command])
            .output();

        match output {
            Ok(output) if output.status.success() => {
                parse_authenticode_status(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => SignatureStatus::Invalid(format!("verification exited with {}", output.status)),
            Err(e) => SignatureStatus::Invalid(format!("cannot run powershell: {e}")),
        }
    }

    #[cfg(not(windows))]
    fn verify(&self, _binary: &Path) -> SignatureStatus {
        SignatureStatus::Unsupported
    }
}

/// Interpret the `Status` property printed by `Get-AuthenticodeSignature`
pub fn parse_authenticode_status(output: &str) -> SignatureStatus {
    match output.trim() {
        "Valid" => SignatureStatus::Trusted,
        "NotSigned" => SignatureStatus::Unsigned,
        other => SignatureStatus::Invalid(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_authenticode_status() {
        assert_eq!(parse_authenticode_status("Valid\r\n"), SignatureStatus::Trusted);
        assert_eq!(parse_authenticode_status("NotSigned"), SignatureStatus::Unsigned);
        assert_eq!(
            parse_authenticode_status("HashMismatch"),
            SignatureStatus::Invalid("HashMismatch".to_string())
        );
    }

    #[cfg(not(windows))]
    #[test]
    fn test_platform_trust_unsupported() {
        assert_eq!(PlatformTrust.verify(Path::new("/bin/sh")), SignatureStatus::Unsupported);
        assert!(!SignatureStatus::Unsupported.is_trusted());
    }
}
