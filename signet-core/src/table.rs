//! Signature table construction and serialization
//!
//! Resolved modules are filtered by [`FilterPolicy`], hashed, sorted by name
//! and rendered as a Rust `const` slice. Identical inputs always yield
//! byte-identical output.

use crate::error::BuildError;
use crate::hasher;
use crate::resolver::ModuleRecord;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use tracing::debug;

/// Modules excluded in virtualenv mode; they come from the environment, not the app
pub const VIRTUALENV_EXCLUDES: [&str; 3] = ["distutils", "pip", "site"];

/// Marker line declaring the embedded table
pub const SIGS_MARKER: &str = "const SIGS: &[EmbeddedSignature]";

/// The digest of one module
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Signature {
    pub digest: String,
    pub module_name: String,
}

/// Which modules are signed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPolicy {
    /// Module name prefixes removed together with their dotted descendants
    pub excludes: BTreeSet<String>,

    /// When non-empty, only these exact names survive
    pub includes: BTreeSet<String>,
}

impl FilterPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.excludes.insert(name.into());
        self
    }

    pub fn include(mut self, name: impl Into<String>) -> Self {
        self.includes.insert(name.into());
        self
    }

    /// Add the fixed virtualenv excludes
    pub fn with_virtualenv(mut self) -> Self {
        self.excludes
            .extend(VIRTUALENV_EXCLUDES.iter().map(|s| s.to_string()));
        self
    }

    /// Whether `name` should be signed
    pub fn allows(&self, name: &str) -> bool {
        if !self.includes.is_empty() {
            return self.includes.contains(name);
        }
        !self.excludes.iter().any(|prefix| {
            name == prefix
                || (name.starts_with(prefix.as_str()) && name[prefix.len()..].starts_with('.'))
        })
    }
}

/// An ordered, immutable set of signatures
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SignatureTable {
    signatures: Vec<Signature>,
}

impl SignatureTable {
    /// Filter, hash and sort `modules`
    pub fn build(modules: &[ModuleRecord], policy: &FilterPolicy) -> Result<Self, BuildError> {
        let mut signatures = Vec::new();

        for module in modules {
            if !policy.allows(&module.name) {
                debug!("excluding {} from signing", module.name);
                continue;
            }

            let digest = hasher::hash_file(&module.resolved_path).map_err(|source| BuildError::Hash {
                module: module.name.clone(),
                path: module.resolved_path.clone(),
                source,
            })?;
            debug!("{} {} ({})", digest, module.name, module.resolved_path.display());

            signatures.push(Signature {
                digest,
                module_name: module.name.clone(),
            });
        }

        Ok(Self::from_signatures(signatures))
    }

    /// Wrap precomputed signatures, sorting them by module name
    pub fn from_signatures(mut signatures: Vec<Signature>) -> Self {
        signatures.sort_by(|a, b| a.module_name.as_bytes().cmp(b.module_name.as_bytes()));
        signatures.dedup_by(|a, b| a.module_name == b.module_name);
        SignatureTable { signatures }
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Render the `const SIGS` declaration embedded in the launcher source
    pub fn to_rust(&self) -> String {
        if self.signatures.is_empty() {
            return format!("{SIGS_MARKER} = &[];");
        }

        let mut out = format!("{SIGS_MARKER} = &[\n");
        for signature in &self.signatures {
            // writing into a String cannot fail
            let _ = writeln!(
                out,
                "    EmbeddedSignature::new(\"{}\", \"{}\"),",
                signature.digest.escape_default(),
                signature.module_name.escape_default()
            );
        }
        out.push_str("];");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use tempfile::TempDir;

    fn module(dir: &Path, name: &str, content: &str) -> ModuleRecord {
        let path = dir.join(format!("{name}.py"));
        std::fs::write(&path, content).unwrap();
        ModuleRecord::new(name, &path)
    }

    #[test]
    fn test_exclude_removes_descendants_only() {
        let policy = FilterPolicy::new().exclude("world");
        assert!(!policy.allows("world"));
        assert!(!policy.allows("world.sub"));
        assert!(!policy.allows("world.sub.deeper"));
        assert!(policy.allows("worldly"));
        assert!(policy.allows("hello"));
    }

    #[test]
    fn test_includes_restrict_regardless_of_excludes() {
        let policy = FilterPolicy::new().include("hello").exclude("hello");
        assert!(policy.allows("hello"));
        assert!(!policy.allows("world"));
        assert!(!policy.allows("hello.sub"));
    }

    #[test]
    fn test_virtualenv_excludes() {
        let policy = FilterPolicy::new().with_virtualenv();
        assert!(!policy.allows("site"));
        assert!(!policy.allows("pip._internal"));
        assert!(!policy.allows("distutils.core"));
        assert!(policy.allows("sitecustomize"));
    }

    #[test]
    fn test_build_sorts_and_hashes() {
        let dir = TempDir::new().unwrap();
        let modules = vec![
            module(dir.path(), "world", "def greet(): pass\n"),
            module(dir.path(), "hello", "print('Hello world')\n"),
            module(dir.path(), "Zeta", ""),
        ];

        let table = SignatureTable::build(&modules, &FilterPolicy::new()).unwrap();
        let names: Vec<&str> = table.signatures().iter().map(|s| s.module_name.as_str()).collect();
        assert_eq!(names, vec!["Zeta", "hello", "world"]);
        assert_eq!(
            table.signatures()[1].digest,
            hasher::hash_string("print('Hello world')\n")
        );
    }

    #[test]
    fn test_empty_table_is_valid() {
        let table = SignatureTable::build(&[], &FilterPolicy::new()).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.to_rust(), "const SIGS: &[EmbeddedSignature] = &[];");
    }

    #[test]
    fn test_to_rust_is_deterministic_and_escaped() {
        let table = SignatureTable::from_signatures(vec![
            Signature {
                digest: "sha256:00".to_string(),
                module_name: "b".to_string(),
            },
            Signature {
                digest: "sha256:11".to_string(),
                module_name: "a\"q".to_string(),
            },
        ]);

        assert_eq!(
            table.to_rust(),
            "const SIGS: &[EmbeddedSignature] = &[\n    EmbeddedSignature::new(\"sha256:11\", \"a\\\"q\"),\n    EmbeddedSignature::new(\"sha256:00\", \"b\"),\n];"
        );
        assert_eq!(table.to_rust(), table.clone().to_rust());
    }

    #[test]
    fn test_missing_file_is_a_hash_error() {
        let modules = vec![ModuleRecord::new("gone", Path::new("/nonexistent/signet/gone.py"))];
        let err = SignatureTable::build(&modules, &FilterPolicy::new()).unwrap_err();
        assert!(matches!(err, BuildError::Hash { ref module, .. } if module == "gone"));
    }
}
