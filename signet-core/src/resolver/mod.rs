//! Dependency resolution - the transitive import closure of an entry script
//!
//! Resolution is purely static. The entry script and every reachable source
//! module are scanned for imports, and each imported name is mapped to a file
//! with the shared [`SearchPath`]. Names that cannot be mapped are reported as
//! [`Unresolved`] and left out of the signature set; they never abort a build.

pub mod scanner;

use crate::error::BuildError;
use crate::locate::{normalize_source, Located, SearchPath};
use scanner::{scan_imports, ImportKind, ImportRef};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A module reachable from the entry script, resolved to a file
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ModuleRecord {
    /// Dotted module name
    pub name: String,

    /// File hashed for this module (compiled-cache paths are normalized)
    pub resolved_path: PathBuf,
}

impl ModuleRecord {
    pub fn new(name: impl Into<String>, path: &Path) -> Self {
        ModuleRecord {
            name: name.into(),
            resolved_path: normalize_source(path),
        }
    }
}

/// Why a module did not make it into the signature set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// No root contains the module
    NotFound,
    /// Compiled into the interpreter, there is no file to sign
    Builtin,
    /// A namespace package has no file of its own
    Namespace,
    /// Only a compiled artifact exists
    Sourceless(PathBuf),
    /// A relative import climbs above the top-level package
    BeyondTopLevel,
}

/// A module that was imported but is not signed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unresolved {
    pub name: String,
    pub reason: UnresolvedReason,
    /// Module whose import referenced it
    pub imported_by: String,
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            UnresolvedReason::NotFound => write!(f, "module '{}' not found", self.name),
            UnresolvedReason::Builtin => write!(f, "module '{}' is built into the interpreter", self.name),
            UnresolvedReason::Namespace => write!(f, "module '{}' is a namespace package", self.name),
            UnresolvedReason::Sourceless(path) => write!(
                f,
                "module '{}' only exists as compiled {}",
                self.name,
                path.display()
            ),
            UnresolvedReason::BeyondTopLevel => write!(
                f,
                "relative import '{}' goes beyond the top-level package",
                self.name
            ),
        }?;
        write!(f, " (imported by '{}')", self.imported_by)
    }
}

/// Result of resolving one entry script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Name the entry script is recorded under
    pub entry: String,

    /// Every resolved module, entry included, sorted by name
    pub modules: Vec<ModuleRecord>,

    /// Imports that could not be mapped to a file, sorted by name
    pub unresolved: Vec<Unresolved>,
}

/// Import graph walker
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    search_path: SearchPath,
    builtins: BTreeSet<String>,
}

struct Pending {
    name: String,
    imported_by: String,
    /// `from a import b` may name an attribute rather than a submodule
    optional: bool,
}

impl DependencyResolver {
    pub fn new(search_path: SearchPath) -> Self {
        DependencyResolver {
            search_path,
            builtins: BTreeSet::new(),
        }
    }

    /// Names of interpreter built-in modules, reported at debug level only
    pub fn with_builtins(mut self, builtins: BTreeSet<String>) -> Self {
        self.builtins = builtins;
        self
    }

    pub fn search_path(&self) -> &SearchPath {
        &self.search_path
    }

    /// Name an entry script is recorded under: its file stem
    pub fn entry_module_name(entry: &Path) -> Result<String, BuildError> {
        entry
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| BuildError::EntryUnparseable {
                path: entry.to_path_buf(),
                reason: "file name is not a valid module name".to_string(),
            })
    }

    /// Resolve the transitive dependencies of `entry`
    pub fn resolve(&self, entry: &Path) -> Result<Resolution, BuildError> {
        let bytes = std::fs::read(entry).map_err(|source| BuildError::EntryNotFound {
            path: entry.to_path_buf(),
            source,
        })?;
        let text = String::from_utf8(bytes).map_err(|e| BuildError::EntryUnparseable {
            path: entry.to_path_buf(),
            reason: format!("not valid UTF-8: {e}"),
        })?;
        let imports = scan_imports(&text).map_err(|e| BuildError::EntryUnparseable {
            path: entry.to_path_buf(),
            reason: e.to_string(),
        })?;

        let entry_name = Self::entry_module_name(entry)?;
        info!("Resolving dependencies of {} ({})", entry.display(), entry_name);

        let mut found: BTreeMap<String, PathBuf> = BTreeMap::new();
        found.insert(entry_name.clone(), entry.to_path_buf());

        let mut seen: HashSet<String> = HashSet::from([entry_name.clone(), "__main__".to_string()]);
        let mut unresolved: BTreeMap<String, Unresolved> = BTreeMap::new();
        let mut queue: VecDeque<Pending> = VecDeque::new();

        // a top-level script has no package for relative imports
        self.enqueue(&imports, &entry_name, None, &mut queue, &mut unresolved);

        while let Some(pending) = queue.pop_front() {
            if seen.contains(&pending.name) {
                continue;
            }

            let located = self.search_path.locate(&pending.name);
            if pending.optional && located == Located::NotFound {
                debug!(
                    "'{}' is not a submodule, treating it as an attribute",
                    pending.name
                );
                continue;
            }
            seen.insert(pending.name.clone());

            match located.file() {
                Some(path) => {
                    debug!("{} -> {}", pending.name, path.display());
                    found.insert(pending.name.clone(), normalize_source(path));
                }
                None => {
                    let reason = match &located {
                        Located::Namespace(_) => UnresolvedReason::Namespace,
                        Located::Sourceless(path) => UnresolvedReason::Sourceless(path.clone()),
                        _ if self.is_builtin(&pending.name) => UnresolvedReason::Builtin,
                        _ => UnresolvedReason::NotFound,
                    };
                    record_unresolved(
                        &mut unresolved,
                        Unresolved {
                            name: pending.name.clone(),
                            reason,
                            imported_by: pending.imported_by.clone(),
                        },
                    );
                }
            }

            let Some(source) = located.scannable_source() else {
                continue;
            };
            let dependency_imports = match std::fs::read(source) {
                Ok(bytes) => scan_imports(&String::from_utf8_lossy(&bytes)),
                Err(e) => {
                    warn!("cannot read {}: {}", source.display(), e);
                    continue;
                }
            };
            match dependency_imports {
                Ok(dependency_imports) => {
                    let package = if located.is_package() {
                        Some(pending.name.as_str())
                    } else {
                        pending.name.rsplit_once('.').map(|(parent, _)| parent)
                    };
                    self.enqueue(
                        &dependency_imports,
                        &pending.name,
                        package,
                        &mut queue,
                        &mut unresolved,
                    );
                }
                Err(e) => {
                    warn!(
                        "cannot scan {} for imports ({}); it is signed but its dependencies are not",
                        source.display(),
                        e
                    );
                }
            }
        }

        let modules: Vec<ModuleRecord> = found
            .into_iter()
            .map(|(name, path)| ModuleRecord::new(name, &path))
            .collect();
        let unresolved: Vec<Unresolved> = unresolved.into_values().collect();

        info!(
            "Resolved {} modules for {} ({} unresolved)",
            modules.len(),
            entry_name,
            unresolved.len()
        );

        Ok(Resolution {
            entry: entry_name,
            modules,
            unresolved,
        })
    }

    fn is_builtin(&self, name: &str) -> bool {
        let top = name.split('.').next().unwrap_or(name);
        self.builtins.contains(name) || self.builtins.contains(top)
    }

    fn enqueue(
        &self,
        imports: &[ImportRef],
        importer: &str,
        package: Option<&str>,
        queue: &mut VecDeque<Pending>,
        unresolved: &mut BTreeMap<String, Unresolved>,
    ) {
        for import in imports {
            let base = if import.level == 0 {
                import.module.clone()
            } else {
                match absolute_name(package, import.level, &import.module) {
                    Some(name) => name,
                    None => {
                        let written = format!("{}{}", ".".repeat(import.level), import.module);
                        record_unresolved(
                            unresolved,
                            Unresolved {
                                name: written,
                                reason: UnresolvedReason::BeyondTopLevel,
                                imported_by: importer.to_string(),
                            },
                        );
                        continue;
                    }
                }
            };

            if base == "__main__" {
                continue;
            }

            // parents are imported before their children
            let mut prefix = String::new();
            for segment in base.split('.') {
                if !prefix.is_empty() {
                    prefix.push('.');
                }
                prefix.push_str(segment);
                queue.push_back(Pending {
                    name: prefix.clone(),
                    imported_by: importer.to_string(),
                    optional: false,
                });
            }

            if import.kind == ImportKind::From {
                for name in import.names.iter().filter(|n| n.as_str() != "*") {
                    queue.push_back(Pending {
                        name: format!("{base}.{name}"),
                        imported_by: importer.to_string(),
                        optional: true,
                    });
                }
            }
        }
    }
}

/// Turn a relative import into an absolute dotted name
///
/// `package` is the package of the importing module (`None` for a top-level
/// script). Returns `None` when the import climbs above the top level.
pub fn absolute_name(package: Option<&str>, level: usize, module: &str) -> Option<String> {
    let package = package.filter(|p| !p.is_empty())?;
    let parts: Vec<&str> = package.split('.').collect();
    if level == 0 || level > parts.len() {
        return None;
    }

    let base = parts[..parts.len() - (level - 1)].join(".");
    if module.is_empty() {
        Some(base)
    } else {
        Some(format!("{base}.{module}"))
    }
}

fn record_unresolved(unresolved: &mut BTreeMap<String, Unresolved>, entry: Unresolved) {
    match entry.reason {
        UnresolvedReason::Builtin | UnresolvedReason::Namespace => debug!("{}", entry),
        _ => warn!("{}; it will not be signed", entry),
    }
    unresolved.entry(entry.name.clone()).or_insert(entry);
}
