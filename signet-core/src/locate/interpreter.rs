//! Interpreter selection and `sys.path` probing

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Environment variable naming an explicit interpreter
pub const INTERPRETER_ENV: &str = "SIGNET_PYTHON";

const PROBE_SCRIPT: &str = "import sys\n\
for p in sys.path: print('path\\t' + p)\n\
for n in sys.builtin_module_names: print('builtin\\t' + n)\n";

/// What the interpreter reports about its import machinery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterpreterInfo {
    /// `sys.path`, without empty entries
    pub sys_path: Vec<PathBuf>,

    /// Modules compiled into the interpreter (they have no file)
    pub builtin_modules: BTreeSet<String>,
}

impl InterpreterInfo {
    /// Parse the probe script's output
    pub fn parse(output: &str) -> Self {
        let mut info = InterpreterInfo::default();
        for line in output.lines() {
            match line.split_once('\t') {
                Some(("path", path)) if !path.is_empty() => info.sys_path.push(PathBuf::from(path)),
                Some(("builtin", name)) => {
                    info.builtin_modules.insert(name.to_string());
                }
                _ => {}
            }
        }
        info
    }
}

/// Pick the interpreter the launcher delegates to
///
/// Order: `SIGNET_PYTHON`, the active virtualenv, then `python3`
/// (`python` on Windows) from `PATH`.
pub fn default_interpreter() -> PathBuf {
    if let Some(explicit) = std::env::var_os(INTERPRETER_ENV) {
        if !explicit.is_empty() {
            return PathBuf::from(explicit);
        }
    }

    if let Some(venv) = std::env::var_os("VIRTUAL_ENV") {
        let venv = PathBuf::from(venv);
        for candidate in [venv.join("bin").join("python"), venv.join("Scripts").join("python.exe")] {
            if candidate.is_file() {
                return candidate;
            }
        }
        debug!("VIRTUAL_ENV defined, but no interpreter under {}", venv.display());
    }

    if cfg!(windows) {
        PathBuf::from("python")
    } else {
        PathBuf::from("python3")
    }
}

/// Ask the interpreter for its `sys.path` and built-in module names
pub fn probe(interpreter: &Path) -> io::Result<InterpreterInfo> {
    let output = Command::new(interpreter).arg("-c").arg(PROBE_SCRIPT).output()?;
    if !output.status.success() {
        return Err(io::Error::other(format!(
            "{} exited with {}: {}",
            interpreter.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let info = InterpreterInfo::parse(&String::from_utf8_lossy(&output.stdout));
    debug!(
        "probed {}: {} sys.path entries, {} built-in modules",
        interpreter.display(),
        info.sys_path.len(),
        info.builtin_modules.len()
    );
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_probe_output() {
        let info = InterpreterInfo::parse(
            "path\t\npath\t/usr/lib/python311.zip\npath\t/usr/lib/python3.11\nbuiltin\tsys\nbuiltin\t_io\nnoise\n",
        );
        assert_eq!(
            info.sys_path,
            vec![
                PathBuf::from("/usr/lib/python311.zip"),
                PathBuf::from("/usr/lib/python3.11")
            ]
        );
        assert!(info.builtin_modules.contains("sys"));
        assert!(info.builtin_modules.contains("_io"));
        assert_eq!(info.builtin_modules.len(), 2);
    }

    #[test]
    #[serial]
    fn test_explicit_interpreter_wins() {
        std::env::set_var(INTERPRETER_ENV, "/opt/python/bin/python3.12");
        let chosen = default_interpreter();
        std::env::remove_var(INTERPRETER_ENV);
        assert_eq!(chosen, PathBuf::from("/opt/python/bin/python3.12"));
    }

    #[test]
    fn test_probe_missing_interpreter_fails() {
        assert!(probe(Path::new("/nonexistent/signet/python")).is_err());
    }
}
