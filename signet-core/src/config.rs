//! Project configuration (`signet.yml`) and the immutable build configuration
//!
//! Configuration is assembled in a fixed order: the project file, then
//! command-line overrides, then validation. The result is a [`BuildConfig`]
//! that the pipeline only reads.

use crate::error::BuildError;
use crate::launcher::DetectionLevel;
use crate::resource::ResourceValues;
use crate::table::FilterPolicy;
use crate::template::LauncherTemplate;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Project configuration file name
pub const CONFIG_FILE: &str = "signet.yml";

/// User-level configuration file name, inside the platform config directory
pub const USER_CONFIG_FILE: &str = "config.yml";

/// Default build directory, relative to the project
pub const DEFAULT_BUILD_DIR: &str = "build/signet";

/// Top-level layout of `signet.yml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub metadata: ProjectMetadata,
    pub build: BuildSection,
    pub sign: SignSection,
}

/// Project metadata, the fallback for resource values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectMetadata {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub maintainer: Option<String>,
    pub license: Option<String>,
}

/// `build:` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildSection {
    /// Entry scripts, relative to the project directory
    pub scripts: Vec<PathBuf>,

    /// Launcher template override (`.rs`)
    pub template: Option<PathBuf>,

    /// Compiled-in detection level, 0-3
    pub detection: Option<u8>,

    /// Module prefixes never signed
    pub excludes: Vec<String>,

    /// When non-empty, the only modules signed
    pub includes: Vec<String>,

    /// Sign the entry script only
    pub skipdepends: bool,

    /// Exclude modules provided by a virtualenv
    pub virtualenv: bool,

    /// Generate a VERSIONINFO resource script
    pub mkresource: bool,

    /// Rebuild even when the launcher is up to date
    pub force: bool,

    /// Interpreter probed for `sys.path` at build time
    pub interpreter: Option<PathBuf>,

    /// Whether the interpreter is probed at all
    pub probe_interpreter: bool,

    /// Extra module search roots, searched after the script's directory
    pub paths: Vec<PathBuf>,

    /// Where generated launcher crates are built
    pub build_dir: Option<PathBuf>,

    /// Extra arguments for `cargo build`, shell-quoted
    pub cargo_args: Option<String>,

    /// How generated launchers depend on `signet-core`
    pub launcher_dependency: Option<LauncherDependency>,

    /// Resource values; they beat metadata, script declarations beat them
    pub resource: ResourceValues,
}

impl Default for BuildSection {
    fn default() -> Self {
        BuildSection {
            scripts: Vec::new(),
            template: None,
            detection: None,
            excludes: Vec::new(),
            includes: Vec::new(),
            skipdepends: false,
            virtualenv: false,
            mkresource: false,
            force: false,
            interpreter: None,
            probe_interpreter: true,
            paths: Vec::new(),
            build_dir: None,
            cargo_args: None,
            launcher_dependency: None,
            resource: ResourceValues::default(),
        }
    }
}

/// `sign:` section; also the shape of the user-level defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SignSection {
    pub pfx_file: Option<PathBuf>,
    pub password: Option<String>,
    pub savedpassword: bool,
    pub resetpassword: bool,
    pub digest: Option<String>,
    pub signtool: Option<PathBuf>,
    pub timestamp_servers: Option<Vec<String>>,
    pub retries: Option<usize>,
    pub retryable_codes: Option<Vec<i32>>,
}

impl SignSection {
    /// Fill unset values from `defaults`; values set here win
    pub fn or_defaults(self, defaults: SignSection) -> SignSection {
        SignSection {
            pfx_file: self.pfx_file.or(defaults.pfx_file),
            password: self.password.or(defaults.password),
            savedpassword: self.savedpassword || defaults.savedpassword,
            resetpassword: self.resetpassword,
            digest: self.digest.or(defaults.digest),
            signtool: self.signtool.or(defaults.signtool),
            timestamp_servers: self.timestamp_servers.or(defaults.timestamp_servers),
            retries: self.retries.or(defaults.retries),
            retryable_codes: self.retryable_codes.or(defaults.retryable_codes),
        }
    }
}

/// Dependency line for `signet-core` in generated launcher crates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LauncherDependency {
    Path { path: PathBuf },
    Version { version: String },
}

impl Default for LauncherDependency {
    /// The `signet-core` sources this tool was built from, when still present
    fn default() -> Self {
        Self::from_source_dir(Path::new(env!("CARGO_MANIFEST_DIR")))
    }
}

impl LauncherDependency {
    fn from_source_dir(dir: &Path) -> Self {
        if dir.join("Cargo.toml").is_file() {
            LauncherDependency::Path {
                path: dir.to_path_buf(),
            }
        } else {
            debug!("{} is gone, depending on signet-core by version", dir.display());
            LauncherDependency::Version {
                version: env!("CARGO_PKG_VERSION").to_string(),
            }
        }
    }
}

impl ConfigFile {
    /// Load and parse a configuration file
    pub fn load(path: &Path) -> Result<Self, BuildError> {
        let content = std::fs::read_to_string(path).map_err(|e| BuildError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_yaml(&content).map_err(|reason| BuildError::Config {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Parse YAML; an empty document is an empty configuration
    pub fn from_yaml(content: &str) -> Result<Self, String> {
        if content.trim().is_empty() {
            return Ok(ConfigFile::default());
        }
        serde_yaml_ng::from_str(content).map_err(|e| e.to_string())
    }

    /// Load `signet.yml` from `project_dir` if it exists
    pub fn discover(project_dir: &Path) -> Result<Option<Self>, BuildError> {
        let path = project_dir.join(CONFIG_FILE);
        if !path.is_file() {
            debug!("no {} in {}", CONFIG_FILE, project_dir.display());
            return Ok(None);
        }
        info!("Loading configuration from {}", path.display());
        Self::load(&path).map(Some)
    }
}

/// Path of the user-level configuration file, if the platform has one
pub fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "signet").map(|dirs| dirs.config_dir().join(USER_CONFIG_FILE))
}

/// Signing defaults from the user-level configuration
pub fn user_sign_defaults() -> Result<SignSection, BuildError> {
    match user_config_path() {
        Some(path) if path.is_file() => {
            debug!("loading user defaults from {}", path.display());
            Ok(ConfigFile::load(&path)?.sign)
        }
        _ => Ok(SignSection::default()),
    }
}

/// Values from the command line; unset fields keep the file's values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOverrides {
    /// Replaces the configured scripts when non-empty
    pub scripts: Vec<PathBuf>,
    pub template: Option<PathBuf>,
    pub detection: Option<u8>,
    /// Added to the configured excludes
    pub excludes: Vec<String>,
    /// Added to the configured includes
    pub includes: Vec<String>,
    pub skipdepends: Option<bool>,
    pub virtualenv: Option<bool>,
    pub mkresource: Option<bool>,
    pub force: Option<bool>,
    pub interpreter: Option<PathBuf>,
    pub probe_interpreter: Option<bool>,
    pub build_dir: Option<PathBuf>,
    pub cargo_args: Option<String>,
}

/// Validated, immutable build configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    project_dir: PathBuf,
    scripts: Vec<PathBuf>,
    template: Option<PathBuf>,
    detection: DetectionLevel,
    excludes: BTreeSet<String>,
    includes: BTreeSet<String>,
    skip_dependencies: bool,
    virtualenv: bool,
    mkresource: bool,
    force: bool,
    interpreter: Option<PathBuf>,
    probe_interpreter: bool,
    extra_paths: Vec<PathBuf>,
    build_dir: PathBuf,
    cargo_args: Vec<String>,
    launcher_dependency: LauncherDependency,
    resource: ResourceValues,
    metadata: ProjectMetadata,
    config_file: Option<PathBuf>,
}

impl BuildConfig {
    pub fn builder(project_dir: impl Into<PathBuf>) -> BuildConfigBuilder {
        BuildConfigBuilder {
            project_dir: project_dir.into(),
            file: ConfigFile::default(),
            config_path: None,
            overrides: BuildOverrides::default(),
        }
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Entry scripts, absolute or relative to the working directory
    pub fn scripts(&self) -> &[PathBuf] {
        &self.scripts
    }

    pub fn template(&self) -> Option<&Path> {
        self.template.as_deref()
    }

    pub fn detection(&self) -> DetectionLevel {
        self.detection
    }

    pub fn skip_dependencies(&self) -> bool {
        self.skip_dependencies
    }

    pub fn mkresource(&self) -> bool {
        self.mkresource
    }

    pub fn force(&self) -> bool {
        self.force
    }

    pub fn interpreter(&self) -> Option<&Path> {
        self.interpreter.as_deref()
    }

    pub fn probe_interpreter(&self) -> bool {
        self.probe_interpreter
    }

    pub fn extra_paths(&self) -> &[PathBuf] {
        &self.extra_paths
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn cargo_args(&self) -> &[String] {
        &self.cargo_args
    }

    pub fn launcher_dependency(&self) -> &LauncherDependency {
        &self.launcher_dependency
    }

    pub fn resource(&self) -> &ResourceValues {
        &self.resource
    }

    pub fn metadata(&self) -> &ProjectMetadata {
        &self.metadata
    }

    /// The `signet.yml` this configuration was loaded from, if any
    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// The filter applied to the modules of `entry_module`
    ///
    /// In skip-dependency mode only the entry script itself is signed.
    pub fn filter_policy(&self, entry_module: &str) -> FilterPolicy {
        let mut policy = FilterPolicy {
            excludes: self.excludes.clone(),
            includes: self.includes.clone(),
        };
        if self.virtualenv {
            policy = policy.with_virtualenv();
        }
        if self.skip_dependencies {
            policy.includes = BTreeSet::from([entry_module.to_string()]);
        }
        policy
    }
}

/// Assembles a [`BuildConfig`]: file, then overrides, then validation
#[derive(Debug, Clone)]
pub struct BuildConfigBuilder {
    project_dir: PathBuf,
    file: ConfigFile,
    config_path: Option<PathBuf>,
    overrides: BuildOverrides,
}

impl BuildConfigBuilder {
    /// Use an already parsed configuration
    pub fn with_file(mut self, file: ConfigFile) -> Self {
        self.file = file;
        self
    }

    /// Load `signet.yml` from the project directory, if present
    pub fn load_file(mut self) -> Result<Self, BuildError> {
        if let Some(file) = ConfigFile::discover(&self.project_dir)? {
            self.file = file;
            self.config_path = Some(self.project_dir.join(CONFIG_FILE));
        }
        Ok(self)
    }

    pub fn with_overrides(mut self, overrides: BuildOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Merge and validate
    pub fn build(self) -> Result<BuildConfig, BuildError> {
        let BuildConfigBuilder {
            project_dir,
            file,
            config_path,
            overrides,
        } = self;
        let section = file.build;
        let anchor = |path: PathBuf| {
            if path.is_absolute() {
                path
            } else {
                project_dir.join(path)
            }
        };

        let detection_value = overrides
            .detection
            .or(section.detection)
            .unwrap_or(DetectionLevel::default().as_u8());
        let detection =
            DetectionLevel::from_u8(detection_value).ok_or(BuildError::InvalidDetection(detection_value))?;

        let scripts: Vec<PathBuf> = if overrides.scripts.is_empty() {
            section.scripts.into_iter().map(anchor).collect()
        } else {
            overrides.scripts.into_iter().map(anchor).collect()
        };
        if scripts.is_empty() {
            return Err(BuildError::NoScripts);
        }

        let template = overrides.template.or(section.template).map(anchor);
        if let Some(template) = &template {
            // fail before any output is produced
            LauncherTemplate::load(template)?;
        }

        let cargo_args = match overrides.cargo_args.or(section.cargo_args) {
            Some(args) => shell_words::split(&args).map_err(|e| BuildError::Config {
                path: config_path
                    .clone()
                    .unwrap_or_else(|| project_dir.join(CONFIG_FILE)),
                reason: format!("invalid cargo_args: {e}"),
            })?,
            None => Vec::new(),
        };

        let launcher_dependency = match section.launcher_dependency {
            Some(LauncherDependency::Path { path }) => LauncherDependency::Path { path: anchor(path) },
            Some(other) => other,
            None => LauncherDependency::default(),
        };

        let config = BuildConfig {
            scripts,
            template,
            detection,
            excludes: section
                .excludes
                .into_iter()
                .chain(overrides.excludes)
                .collect(),
            includes: section
                .includes
                .into_iter()
                .chain(overrides.includes)
                .collect(),
            skip_dependencies: overrides.skipdepends.unwrap_or(section.skipdepends),
            virtualenv: overrides.virtualenv.unwrap_or(section.virtualenv),
            mkresource: overrides.mkresource.unwrap_or(section.mkresource),
            force: overrides.force.unwrap_or(section.force),
            interpreter: overrides.interpreter.or(section.interpreter),
            probe_interpreter: overrides
                .probe_interpreter
                .unwrap_or(section.probe_interpreter),
            extra_paths: section.paths.into_iter().map(anchor).collect(),
            build_dir: anchor(
                overrides
                    .build_dir
                    .or(section.build_dir)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_BUILD_DIR)),
            ),
            cargo_args,
            launcher_dependency,
            resource: section.resource,
            metadata: file.metadata,
            config_file: config_path,
            project_dir,
        };

        debug!("build configuration: {:?}", config);
        Ok(config)
    }
}
