//! Runtime override flags and environment variables

use super::DetectionLevel;
use std::ffi::OsString;
use std::fmt;

/// Force detection level 3
pub const FLAG_MAX: &str = "--SECURITYMAX";
/// Force detection level 1
pub const FLAG_WARN: &str = "--SECURITYWARN";
/// Force detection level 0
pub const FLAG_OFF: &str = "--SECURITYOFF";

const FLAG_PREFIX: &str = "--SECURITY";

/// `OFF`, `WARN` or `MAX`; used only when no flag is given
///
/// Earlier signet loaders read this variable after the flags and let it win.
/// Here a `--SECURITY*` flag is never overridden by the environment.
pub const SECURITY_ENV: &str = "SIGNETSECURITY";

/// Numeric log level (10 debug .. 50 critical)
pub const LOG_ENV: &str = "SIGNET_LOGLEVEL";

/// Arguments after override flags are removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedArgs {
    /// Level requested on the command line; the last flag wins
    pub level: Option<DetectionLevel>,

    /// Everything else, passed on to the script
    pub passthrough: Vec<OsString>,
}

/// A `--SECURITY*` argument that is not a known flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOverride(pub String);

impl fmt::Display for UnknownOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unrecognized security override '{}' (expected {}, {} or {})",
            self.0, FLAG_MAX, FLAG_WARN, FLAG_OFF
        )
    }
}

/// Strip override flags from the launcher's arguments
pub fn parse_args<I>(args: I) -> Result<ParsedArgs, UnknownOverride>
where
    I: IntoIterator<Item = OsString>,
{
    let mut parsed = ParsedArgs::default();

    for arg in args {
        let Some(text) = arg.to_str() else {
            parsed.passthrough.push(arg);
            continue;
        };
        match text {
            FLAG_MAX => parsed.level = Some(DetectionLevel::RequireSigned),
            FLAG_WARN => parsed.level = Some(DetectionLevel::Warn),
            FLAG_OFF => parsed.level = Some(DetectionLevel::Disabled),
            other if other.starts_with(FLAG_PREFIX) => {
                return Err(UnknownOverride(other.to_string()));
            }
            _ => parsed.passthrough.push(arg),
        }
    }

    Ok(parsed)
}

/// Level named by `SIGNETSECURITY`, case-insensitive
pub fn level_from_env(value: &str) -> Option<DetectionLevel> {
    match value.trim().to_ascii_uppercase().as_str() {
        "OFF" => Some(DetectionLevel::Disabled),
        "WARN" => Some(DetectionLevel::Warn),
        "MAX" => Some(DetectionLevel::RequireSigned),
        _ => None,
    }
}

/// Map a numeric log level to a tracing filter directive
pub fn log_directive(value: &str) -> Option<&'static str> {
    let level: u32 = value.trim().parse().ok()?;
    Some(match level {
        0..=9 => "trace",
        10..=19 => "debug",
        20..=29 => "info",
        30..=39 => "warn",
        _ => "error",
    })
}

/// Status line printed when an override changes the compiled level
pub fn status_line(level: DetectionLevel) -> Option<&'static str> {
    match level {
        DetectionLevel::Disabled => Some("SECURITY DISABLED"),
        DetectionLevel::Warn => Some("SECURITY WARN-ONLY Enabled"),
        DetectionLevel::RequireSigned => Some("SECURITY MAXIMUM Enabled"),
        DetectionLevel::Normal => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn test_flags_are_stripped() {
        let parsed = parse_args(os(&["input.txt", "--SECURITYOFF", "-v"])).unwrap();
        assert_eq!(parsed.level, Some(DetectionLevel::Disabled));
        assert_eq!(parsed.passthrough, os(&["input.txt", "-v"]));
    }

    #[test]
    fn test_last_flag_wins() {
        let parsed = parse_args(os(&["--SECURITYOFF", "--SECURITYMAX"])).unwrap();
        assert_eq!(parsed.level, Some(DetectionLevel::RequireSigned));
        assert!(parsed.passthrough.is_empty());
    }

    #[test]
    fn test_no_flags() {
        let parsed = parse_args(os(&["--security", "x"])).unwrap();
        assert_eq!(parsed.level, None);
        assert_eq!(parsed.passthrough, os(&["--security", "x"]));
    }

    #[test]
    fn test_unknown_security_flag_is_rejected() {
        let err = parse_args(os(&["--SECURITYLOW"])).unwrap_err();
        assert_eq!(err, UnknownOverride("--SECURITYLOW".to_string()));
        assert!(err.to_string().contains("--SECURITYMAX"));
    }

    #[test]
    fn test_env_levels() {
        assert_eq!(level_from_env("off"), Some(DetectionLevel::Disabled));
        assert_eq!(level_from_env("WARN"), Some(DetectionLevel::Warn));
        assert_eq!(level_from_env(" Max "), Some(DetectionLevel::RequireSigned));
        assert_eq!(level_from_env("normal"), None);
    }

    #[test]
    fn test_log_directive() {
        assert_eq!(log_directive("10"), Some("debug"));
        assert_eq!(log_directive("20"), Some("info"));
        assert_eq!(log_directive("30"), Some("warn"));
        assert_eq!(log_directive("50"), Some("error"));
        assert_eq!(log_directive("loud"), None);
    }
}
