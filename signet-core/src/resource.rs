//! Version resource generation (`VERSIONINFO` resource scripts)
//!
//! Values come from, in order of precedence: `__key__ = "value"`
//! declarations starting in column 1 of the entry script, the `resource`
//! section of the configuration, project metadata, and built-in defaults.

use crate::config::ProjectMetadata;
use crate::error::BuildError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Version used when nothing else provides one
pub const DEFAULT_FILE_VERSION: &str = "0.0.0.0";

static DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)^__(companyname|filedescription|fileversion|legalcopyright|productname|productversion|icon)__\s*=\s*(?:'([^']+)'|"([^"]+)")"#,
    )
    .expect("resource declaration pattern is valid")
});

/// Optional resource values from one source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceValues {
    pub company_name: Option<String>,
    pub file_description: Option<String>,
    pub file_version: Option<String>,
    pub legal_copyright: Option<String>,
    pub product_name: Option<String>,
    pub product_version: Option<String>,
    pub icon: Option<PathBuf>,
}

impl ResourceValues {
    /// Values declared in column 1 of a script; later declarations win
    pub fn from_script_source(source: &str) -> Self {
        let mut values = ResourceValues::default();

        for line in source.lines() {
            let Some(captures) = DECLARATION.captures(line) else {
                continue;
            };
            let value = captures
                .get(2)
                .or_else(|| captures.get(3))
                .map(|m| m.as_str().to_string());
            let key = captures
                .get(1)
                .map(|m| m.as_str().to_ascii_lowercase())
                .unwrap_or_default();

            match key.as_str() {
                "companyname" => values.company_name = value,
                "filedescription" => values.file_description = value,
                "fileversion" => values.file_version = value,
                "legalcopyright" => values.legal_copyright = value,
                "productname" => values.product_name = value,
                "productversion" => values.product_version = value,
                "icon" => values.icon = value.map(PathBuf::from),
                _ => {}
            }
        }
        values
    }

    fn from_metadata(metadata: &ProjectMetadata) -> Self {
        ResourceValues {
            company_name: metadata.maintainer.clone(),
            file_description: metadata.description.clone(),
            file_version: metadata.version.clone(),
            legal_copyright: metadata.license.clone(),
            product_name: metadata.name.clone(),
            product_version: metadata.version.clone(),
            icon: None,
        }
    }

    /// Fill unset values from `fallback`
    fn or(self, fallback: ResourceValues) -> Self {
        ResourceValues {
            company_name: self.company_name.or(fallback.company_name),
            file_description: self.file_description.or(fallback.file_description),
            file_version: self.file_version.or(fallback.file_version),
            legal_copyright: self.legal_copyright.or(fallback.legal_copyright),
            product_name: self.product_name.or(fallback.product_name),
            product_version: self.product_version.or(fallback.product_version),
            icon: self.icon.or(fallback.icon),
        }
    }
}

/// Complete resource information for one launcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub company_name: String,
    pub file_description: String,
    /// Four comma-separated integers
    pub file_version: String,
    pub legal_copyright: String,
    pub product_name: String,
    /// Four comma-separated integers
    pub product_version: String,
    pub icon: Option<PathBuf>,
}

impl ResourceInfo {
    /// Gather values for `script` and check that every field is set
    pub fn resolve(
        script: &Path,
        configured: &ResourceValues,
        metadata: &ProjectMetadata,
    ) -> Result<Self, BuildError> {
        let source = std::fs::read_to_string(script).map_err(|source| BuildError::Io {
            path: script.to_path_buf(),
            source,
        })?;

        let values = ResourceValues::from_script_source(&source)
            .or(configured.clone())
            .or(ResourceValues::from_metadata(metadata));
        debug!("resource values for {}: {:?}", script.display(), values);

        let required = |value: Option<String>, field: &str| {
            value
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| BuildError::MissingResourceField {
                    field: field.to_string(),
                    script: script.to_path_buf(),
                })
        };

        let file_version =
            parse_rc_version(values.file_version.as_deref().unwrap_or(DEFAULT_FILE_VERSION))?;
        let product_version = match values.product_version.as_deref() {
            Some(version) => parse_rc_version(version)?,
            None => file_version.clone(),
        };

        Ok(ResourceInfo {
            company_name: required(values.company_name, "companyname")?,
            file_description: required(values.file_description, "filedescription")?,
            legal_copyright: required(values.legal_copyright, "legalcopyright")?,
            product_name: required(values.product_name, "productname")?,
            file_version,
            product_version,
            icon: values.icon,
        })
    }

    /// Render the resource script for the launcher built from `script_name`
    pub fn to_rc(&self, script_name: &str) -> String {
        let stem = Path::new(script_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(script_name);
        let exe_name = format!("{stem}.exe");

        let mut rc = String::new();
        if let Some(icon) = &self.icon {
            let icon = icon.display().to_string().replace('\\', "/");
            let _ = writeln!(rc, "1 ICON \"{}\"", rc_escape(&icon));
        }
        rc.push_str("1 VERSIONINFO\n");
        let _ = writeln!(rc, "FILEVERSION {}", self.file_version);
        let _ = writeln!(rc, "PRODUCTVERSION {}", self.product_version);
        rc.push_str("FILEFLAGSMASK 0x17L\nFILEFLAGS 0x0L\nFILEOS 0x4L\nFILETYPE 0x1L\nFILESUBTYPE 0x0L\n");
        rc.push_str("BEGIN\n\tBLOCK \"StringFileInfo\"\n\tBEGIN\n\t\tBLOCK \"040904b0\"\n\t\tBEGIN\n");

        let values = [
            ("Comments", "Created by signet launcher"),
            ("CompanyName", self.company_name.as_str()),
            ("FileDescription", self.file_description.as_str()),
            ("FileVersion", self.file_version.as_str()),
            ("InternalName", script_name),
            ("LegalCopyright", self.legal_copyright.as_str()),
            ("OriginalFileName", exe_name.as_str()),
            ("ProductName", self.product_name.as_str()),
            ("ProductVersion", self.product_version.as_str()),
        ];
        for (key, value) in values {
            let _ = writeln!(rc, "\t\t\tVALUE \"{}\", \"{}\"", key, rc_escape(value));
        }

        rc.push_str("\t\tEND\n\tEND\n\tBLOCK \"VarFileInfo\"\n\tBEGIN\n");
        rc.push_str("\t\tVALUE \"Translation\", 0x409, 1200\n\tEND\nEND\n");
        rc
    }
}

/// Convert `1.2.3` (or `1,2,3`) into `1,2,3,0`
pub fn parse_rc_version(value: &str) -> Result<String, BuildError> {
    let invalid = |reason: &str| BuildError::InvalidVersion {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty version"));
    }

    let parts: Vec<&str> = if trimmed.contains('.') {
        trimmed.split('.').collect()
    } else {
        trimmed.split(',').collect()
    };
    if parts.len() > 4 {
        return Err(invalid("has more than four components"));
    }

    let mut numbers = Vec::with_capacity(4);
    for part in parts {
        let number: u16 = part
            .trim()
            .parse()
            .map_err(|_| invalid("components must be integers between 0 and 65535"))?;
        numbers.push(number.to_string());
    }
    while numbers.len() < 4 {
        numbers.push("0".to_string());
    }

    Ok(numbers.join(","))
}

fn rc_escape(value: &str) -> String {
    value.replace('"', "\"\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_declaration_pattern_matches_both_quote_styles() {
        let values = ResourceValues::from_script_source(
            "__CompanyName__ = 'Acme'\n__productname__=\"Hello\"\n  __icon__ = 'skipped.ico'\n",
        );
        assert_eq!(values.company_name.as_deref(), Some("Acme"));
        assert_eq!(values.product_name.as_deref(), Some("Hello"));
        assert_eq!(values.icon, None);
    }

    #[test]
    fn test_parse_rc_version() {
        assert_eq!(parse_rc_version("1.2.3").unwrap(), "1,2,3,0");
        assert_eq!(parse_rc_version("1").unwrap(), "1,0,0,0");
        assert_eq!(parse_rc_version("4,3,2,1").unwrap(), "4,3,2,1");
        assert!(parse_rc_version("1.2.3.4.5").is_err());
        assert!(parse_rc_version("1.2beta").is_err());
        assert!(parse_rc_version("70000").is_err());
        assert!(parse_rc_version("").is_err());
    }

    #[test]
    fn test_declarations_column_one_only() {
        let values = ResourceValues::from_script_source(
            "__CompanyName__ = \"Mega-corporation, Inc.\"\n    __productname__ = 'Indented'\n__fileversion__='1'\n__icon__ = 'res/app.ico'\n",
        );
        assert_eq!(values.company_name.as_deref(), Some("Mega-corporation, Inc."));
        assert_eq!(values.product_name, None);
        assert_eq!(values.file_version.as_deref(), Some("1"));
        assert_eq!(values.icon, Some(PathBuf::from("res/app.ico")));
    }

    fn script(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("hello.py");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_precedence_script_over_metadata() {
        let dir = TempDir::new().unwrap();
        let path = script(
            dir.path(),
            "__companyname__ = 'Script Corp'\n__fileversion__ = '2.1'\nprint('Hello world')\n",
        );
        let metadata = ProjectMetadata {
            name: Some("hello".to_string()),
            version: Some("1.0.2".to_string()),
            description: Some("Says hello".to_string()),
            maintainer: Some("Acme, Inc".to_string()),
            license: Some("MIT".to_string()),
        };

        let info = ResourceInfo::resolve(&path, &ResourceValues::default(), &metadata).unwrap();
        assert_eq!(info.company_name, "Script Corp");
        assert_eq!(info.file_description, "Says hello");
        assert_eq!(info.file_version, "2,1,0,0");
        assert_eq!(info.product_version, "1,0,2,0");
        assert_eq!(info.product_name, "hello");
    }

    #[test]
    fn test_product_version_defaults_to_file_version() {
        let dir = TempDir::new().unwrap();
        let path = script(
            dir.path(),
            "__companyname__ = 'C'\n__filedescription__ = 'D'\n__legalcopyright__ = 'L'\n__productname__ = 'P'\n",
        );
        let info = ResourceInfo::resolve(&path, &ResourceValues::default(), &ProjectMetadata::default())
            .unwrap();
        assert_eq!(info.file_version, "0,0,0,0");
        assert_eq!(info.product_version, "0,0,0,0");
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = script(dir.path(), "print('Hello world')\n");
        let err = ResourceInfo::resolve(&path, &ResourceValues::default(), &ProjectMetadata::default())
            .unwrap_err();
        assert!(err.to_string().contains("__companyname__ must be set"));
    }

    #[test]
    fn test_to_rc() {
        let info = ResourceInfo {
            company_name: "Acme \"Rockets\"".to_string(),
            file_description: "Hello".to_string(),
            file_version: "1,0,2,0".to_string(),
            legal_copyright: "MIT".to_string(),
            product_name: "hello".to_string(),
            product_version: "1,0,2,0".to_string(),
            icon: Some(PathBuf::from("C:\\icons\\app.ico")),
        };

        let rc = info.to_rc("hello.py");
        assert!(rc.starts_with("1 ICON \"C:/icons/app.ico\"\n1 VERSIONINFO\nFILEVERSION 1,0,2,0\n"));
        assert!(rc.contains("VALUE \"CompanyName\", \"Acme \"\"Rockets\"\"\""));
        assert!(rc.contains("VALUE \"OriginalFileName\", \"hello.exe\""));
        assert!(rc.ends_with("END\n"));
    }
}
