//! Handing control to the interpreter

use super::LAUNCHED_ENV;
use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::Command;

/// Runs the verified script
pub trait Delegate {
    /// Run `interpreter script args...`, returning its exit status
    fn delegate(&self, interpreter: &Path, script: &Path, args: &[OsString]) -> io::Result<i32>;
}

/// Runs the interpreter as a real process
///
/// On Unix the interpreter replaces the launcher (`exec`), so this only
/// returns on failure. Elsewhere the launcher waits and forwards the status.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessDelegate;

impl ProcessDelegate {
    fn command(interpreter: &Path, script: &Path, args: &[OsString]) -> Command {
        let mut command = Command::new(interpreter);
        command.arg(script).args(args).env(LAUNCHED_ENV, "1");
        command
    }
}

impl Delegate for ProcessDelegate {
    #[cfg(unix)]
    fn delegate(&self, interpreter: &Path, script: &Path, args: &[OsString]) -> io::Result<i32> {
        use std::os::unix::process::CommandExt;

        Err(Self::command(interpreter, script, args).exec())
    }

    #[cfg(not(unix))]
    fn delegate(&self, interpreter: &Path, script: &Path, args: &[OsString]) -> io::Result<i32> {
        let status = Self::command(interpreter, script, args).status()?;
        Ok(status.code().unwrap_or(super::VIOLATION_EXIT))
    }
}
