//! Module location - maps dotted module names to files on disk
//!
//! The build pipeline and the launcher share this code so a name recorded in
//! a signature table resolves to the same file on both sides. Resolution
//! follows the interpreter's own order within each root:
//!
//! 1. regular package `name/__init__.py`
//! 2. source module `name.py`
//! 3. extension module `name.so`, `name.pyd`, `name.<tag>.so`
//! 4. sourceless `name.pyc` (only usable when the source sits beside it)
//! 5. namespace package (a bare directory), if no root has anything better
//!
//! Archive roots (`.zip`, `.egg`, `.whl`) resolve to the archive itself.

pub mod archive;
pub mod interpreter;

use std::path::{Path, PathBuf};
use tracing::trace;

pub use interpreter::{default_interpreter, probe, InterpreterInfo, INTERPRETER_ENV};

/// Where a module was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Located {
    /// A plain source module
    Source(PathBuf),

    /// A regular package; `init` is its `__init__.py`
    Package { init: PathBuf, dir: PathBuf },

    /// A compiled extension module
    Extension(PathBuf),

    /// A module packaged inside an archive; the archive is the hash unit
    Archive { archive: PathBuf, member: String },

    /// A namespace package spread over one or more directories
    Namespace(Vec<PathBuf>),

    /// Only a compiled artifact exists, its source is missing
    Sourceless(PathBuf),

    /// Nothing matched
    NotFound,
}

impl Located {
    /// The file that represents this module in a signature table
    pub fn file(&self) -> Option<&Path> {
        match self {
            Located::Source(path) | Located::Extension(path) => Some(path),
            Located::Package { init, .. } => Some(init),
            Located::Archive { archive, .. } => Some(archive),
            Located::Namespace(_) | Located::Sourceless(_) | Located::NotFound => None,
        }
    }

    /// Whether the module's source text can be scanned for imports
    pub fn scannable_source(&self) -> Option<&Path> {
        match self {
            Located::Source(path) => Some(path),
            Located::Package { init, .. } => Some(init),
            _ => None,
        }
    }

    /// Whether the module is a package (can contain submodules)
    pub fn is_package(&self) -> bool {
        matches!(
            self,
            Located::Package { .. } | Located::Namespace(_) | Located::Archive { .. }
        )
    }
}

/// Map a compiled-cache path back to its source file
///
/// `pkg/__pycache__/mod.cpython-311.pyc` → `pkg/mod.py`, `mod.pyc` → `mod.py`.
/// Any other path is returned unchanged.
pub fn normalize_source(path: &Path) -> PathBuf {
    let is_compiled = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("pyc") | Some("pyo")
    );
    if !is_compiled {
        return path.to_path_buf();
    }

    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return path.to_path_buf();
    };
    let parent = path.parent().unwrap_or_else(|| Path::new(""));

    if parent.file_name().and_then(|n| n.to_str()) == Some("__pycache__") {
        // mod.cpython-311.opt-1.pyc -> mod.py
        let stem = file_name.split('.').next().unwrap_or(file_name);
        let source_dir = parent.parent().unwrap_or_else(|| Path::new(""));
        return source_dir.join(format!("{stem}.py"));
    }

    path.with_extension("py")
}

/// Ordered list of directories and archives to search for modules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPath {
    roots: Vec<PathBuf>,
}

impl SearchPath {
    /// Create a search path from explicit roots (duplicates and empty entries dropped)
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut search = SearchPath::default();
        for root in roots {
            search.push(root);
        }
        search
    }

    /// Search path used by the build pipeline
    ///
    /// The entry script's directory comes first, then configured extra paths,
    /// `PYTHONPATH`, and finally the interpreter's `sys.path`.
    pub fn for_build(
        script_dir: &Path,
        extra: &[PathBuf],
        interpreter: Option<&InterpreterInfo>,
    ) -> Self {
        let mut search = SearchPath::new([script_dir.to_path_buf()]);
        for path in extra {
            search.push(path.clone());
        }
        search.extend_from_environment(interpreter);
        search
    }

    /// Search path used by a launcher installed in `install_dir`
    pub fn for_runtime(install_dir: &Path, interpreter: Option<&InterpreterInfo>) -> Self {
        let mut search = SearchPath::new([install_dir.to_path_buf()]);
        search.extend_from_environment(interpreter);
        search
    }

    fn extend_from_environment(&mut self, interpreter: Option<&InterpreterInfo>) {
        if let Some(pythonpath) = std::env::var_os("PYTHONPATH") {
            for path in std::env::split_paths(&pythonpath) {
                self.push(path);
            }
        }
        if let Some(info) = interpreter {
            for path in &info.sys_path {
                self.push(path.clone());
            }
        }
    }

    /// Append a root unless it is empty or already present
    pub fn push(&mut self, root: impl Into<PathBuf>) {
        let root = root.into();
        if root.as_os_str().is_empty() || self.roots.contains(&root) {
            return;
        }
        self.roots.push(root);
    }

    /// The roots in search order
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Locate a dotted module name
    pub fn locate(&self, name: &str) -> Located {
        if name.is_empty() || name.split('.').any(str::is_empty) {
            return Located::NotFound;
        }

        let mut segments = name.split('.');
        let first = segments.next().unwrap_or_default();
        let mut current = find_segment(first, &self.roots);

        for segment in segments {
            current = match current {
                Located::Package { dir, .. } => find_segment(segment, std::slice::from_ref(&dir)),
                Located::Namespace(dirs) => find_segment(segment, &dirs),
                Located::Archive { archive, member } => {
                    let member = format!("{member}/{segment}");
                    if archive::contains_module(&archive, &member) {
                        Located::Archive { archive, member }
                    } else {
                        Located::NotFound
                    }
                }
                _ => Located::NotFound,
            };
            if current == Located::NotFound {
                break;
            }
        }

        trace!("located module {} -> {:?}", name, current);
        current
    }
}

/// Find one name segment in a list of containers
fn find_segment(segment: &str, containers: &[PathBuf]) -> Located {
    let mut namespace_dirs = Vec::new();

    for root in containers {
        if archive::is_archive(root) {
            if root.is_file() && archive::contains_module(root, segment) {
                return Located::Archive {
                    archive: root.clone(),
                    member: segment.to_string(),
                };
            }
            continue;
        }
        if !root.is_dir() {
            continue;
        }

        let dir = root.join(segment);
        let init = dir.join("__init__.py");
        if init.is_file() {
            return Located::Package { init, dir };
        }

        let source = root.join(format!("{segment}.py"));
        if source.is_file() {
            return Located::Source(source);
        }

        if let Some(extension) = find_extension(root, segment) {
            return Located::Extension(extension);
        }

        let compiled = root.join(format!("{segment}.pyc"));
        if compiled.is_file() {
            let source = normalize_source(&compiled);
            return if source.is_file() {
                Located::Source(source)
            } else {
                Located::Sourceless(compiled)
            };
        }

        if dir.is_dir() {
            namespace_dirs.push(dir);
        }
    }

    if namespace_dirs.is_empty() {
        Located::NotFound
    } else {
        Located::Namespace(namespace_dirs)
    }
}

/// Find `segment.so`, `segment.pyd` or `segment.<tag>.so` in `root`
fn find_extension(root: &Path, segment: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(root).ok()?;
    let prefix = format!("{segment}.");

    let mut matches: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                return false;
            };
            name.starts_with(&prefix)
                && (name.ends_with(".so") || name.ends_with(".pyd"))
                && entry.path().is_file()
        })
        .map(|entry| entry.path())
        .collect();

    matches.sort();
    matches.into_iter().next()
}
