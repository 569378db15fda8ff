//! Launcher source generation
//!
//! A template is an ordinary Rust `main.rs`. Three single-line declarations
//! act as markers and are replaced wholesale with the generated values.

use crate::error::BuildError;
use crate::launcher::DetectionLevel;
use crate::table::{SignatureTable, SIGS_MARKER};
use std::path::Path;
use tracing::debug;

/// Launcher template shipped with signet
pub const DEFAULT_TEMPLATE: &str = include_str!("../templates/launcher.rs");

pub const SCRIPT_MARKER: &str = "const SCRIPT: &str";
pub const TAMPER_MARKER: &str = "const TAMPER: u8";

const MARKERS: [&str; 3] = [SCRIPT_MARKER, SIGS_MARKER, TAMPER_MARKER];

/// A launcher source template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherTemplate {
    name: String,
    source: String,
}

impl LauncherTemplate {
    /// The built-in template
    pub fn builtin() -> Self {
        LauncherTemplate {
            name: "<builtin>".to_string(),
            source: DEFAULT_TEMPLATE.to_string(),
        }
    }

    /// Load a template override; it must be an existing `.rs` file
    pub fn load(path: &Path) -> Result<Self, BuildError> {
        if !path.is_file() {
            return Err(BuildError::MissingTemplate {
                path: path.to_path_buf(),
            });
        }
        if path.extension().and_then(|e| e.to_str()) != Some("rs") {
            return Err(BuildError::UnrecognizedTemplate {
                path: path.to_path_buf(),
            });
        }

        let source = std::fs::read_to_string(path).map_err(|source| BuildError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("loaded launcher template {}", path.display());

        Ok(LauncherTemplate {
            name: path.display().to_string(),
            source,
        })
    }

    pub fn from_source(name: impl Into<String>, source: impl Into<String>) -> Self {
        LauncherTemplate {
            name: name.into(),
            source: source.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Substitute the script name, signature table and detection level
    pub fn render(
        &self,
        script: &str,
        table: &SignatureTable,
        level: DetectionLevel,
    ) -> Result<String, BuildError> {
        let replacements = [
            format!("{SCRIPT_MARKER} = \"{}\";", script.escape_default()),
            table.to_rust(),
            format!("{TAMPER_MARKER} = {};", level.as_u8()),
        ];

        let mut found = [false; 3];
        let mut lines = Vec::new();
        for line in self.source.lines() {
            let trimmed = line.trim_start();
            match MARKERS.iter().position(|marker| trimmed.starts_with(marker)) {
                Some(index) => {
                    found[index] = true;
                    lines.push(replacements[index].as_str());
                }
                None => lines.push(line),
            }
        }

        if let Some(index) = found.iter().position(|f| !f) {
            return Err(BuildError::MissingMarker {
                marker: MARKERS[index],
                template: self.name.clone(),
            });
        }

        let mut rendered = lines.join("\n");
        if self.source.ends_with('\n') {
            rendered.push('\n');
        }
        Ok(rendered)
    }
}
