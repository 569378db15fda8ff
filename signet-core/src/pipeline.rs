//! Build pipeline: resolve, sign, render, compile
//!
//! [`run`] processes every configured entry script in order. For each one it
//! resolves dependencies, builds the signature table, renders the launcher
//! source (and optionally a resource script), hands the generated crate to a
//! [`Compiler`] and places the launcher next to the script.

use crate::config::{BuildConfig, LauncherDependency};
use crate::error::BuildError;
use crate::hasher;
use crate::locate::{default_interpreter, probe, SearchPath};
use crate::resolver::{DependencyResolver, Resolution, Unresolved};
use crate::resource::ResourceInfo;
use crate::table::SignatureTable;
use crate::template::LauncherTemplate;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Records the fingerprint of the last successful build in the work dir
pub const FINGERPRINT_FILE: &str = "inputs.sha256";

/// Generated sources for one launcher, ready to compile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileJob {
    /// The entry script the launcher protects
    pub script: PathBuf,
    /// Binary name (sanitized script stem)
    pub name: String,
    /// Directory holding the generated crate
    pub work_dir: PathBuf,
    /// Rendered `src/main.rs`
    pub main_rs: PathBuf,
    /// Resource script, when requested
    pub resource_script: Option<PathBuf>,
    pub dependency: LauncherDependency,
    pub cargo_args: Vec<String>,
}

/// Compiles and links a generated launcher crate
pub trait Compiler {
    /// Build `job`, returning the path of the produced executable
    fn compile(&self, job: &CompileJob) -> Result<PathBuf, BuildError>;
}

/// What happened to one entry script
#[derive(Debug, Clone)]
pub struct LauncherReport {
    pub script: PathBuf,
    pub launcher: PathBuf,
    pub table: SignatureTable,
    pub unresolved: Vec<Unresolved>,
    /// The launcher was newer than its inputs, its fingerprint matched, and it was left alone
    pub up_to_date: bool,
}

/// Resolution and table for one script, without building anything
#[derive(Debug, Clone)]
pub struct Signatures {
    pub resolution: Resolution,
    pub table: SignatureTable,
}

/// Build a launcher for every configured script
pub fn run(config: &BuildConfig, compiler: &dyn Compiler) -> Result<Vec<LauncherReport>, BuildError> {
    let template = match config.template() {
        Some(path) => LauncherTemplate::load(path)?,
        None => LauncherTemplate::builtin(),
    };

    let mut reports = Vec::with_capacity(config.scripts().len());
    for script in config.scripts() {
        reports.push(build_one(config, compiler, &template, script)?);
    }
    Ok(reports)
}

/// Resolve and hash `script` the way [`run`] would
pub fn signatures_for(config: &BuildConfig, script: &Path) -> Result<Signatures, BuildError> {
    let resolver = resolver_for(config, script);
    let resolution = resolver.resolve(script)?;
    let policy = config.filter_policy(&resolution.entry);
    let table = SignatureTable::build(&resolution.modules, &policy)?;
    Ok(Signatures { resolution, table })
}

/// Where the launcher for `script` is placed
pub fn launcher_path(script: &Path) -> PathBuf {
    let stem = script
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("launcher");
    script.with_file_name(format!("{stem}{}", std::env::consts::EXE_SUFFIX))
}

fn build_one(
    config: &BuildConfig,
    compiler: &dyn Compiler,
    template: &LauncherTemplate,
    script: &Path,
) -> Result<LauncherReport, BuildError> {
    info!("Building launcher for {}", script.display());

    let Signatures { resolution, table } = signatures_for(config, script)?;
    let launcher = launcher_path(script);

    let script_name = script
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| BuildError::EntryUnparseable {
            path: script.to_path_buf(),
            reason: "file name is not valid UTF-8".to_string(),
        })?;
    let source = template.render(script_name, &table, config.detection())?;

    let resource = if config.mkresource() {
        Some(ResourceInfo::resolve(script, config.resource(), config.metadata())?)
    } else {
        None
    };
    let resource_script = resource.as_ref().map(|r| r.to_rc(script_name));

    let name = binary_name(&resolution.entry);
    let work_dir = config.build_dir().join(&name);
    let fingerprint = build_fingerprint(config, &source, resource_script.as_deref());
    let fingerprint_path = work_dir.join(FINGERPRINT_FILE);

    let policy = config.filter_policy(&resolution.entry);
    let mut inputs: Vec<&Path> = resolution
        .modules
        .iter()
        .filter(|m| policy.allows(&m.name))
        .map(|m| m.resolved_path.as_path())
        .collect();
    inputs.push(script);
    if let Some(path) = config.template() {
        inputs.push(path);
    }
    if let Some(path) = config.config_file() {
        inputs.push(path);
    }

    if !config.force()
        && is_up_to_date(&launcher, &inputs)
        && fingerprint_matches(&fingerprint_path, &fingerprint)
    {
        info!("{} is up to date", launcher.display());
        return Ok(LauncherReport {
            script: script.to_path_buf(),
            launcher,
            table,
            unresolved: resolution.unresolved,
            up_to_date: true,
        });
    }

    let generated = GeneratedFiles::write(&work_dir, &name, &source, resource_script.as_deref())?;
    // absent until the new launcher is in place
    let _ = fs::remove_file(&fingerprint_path);

    let job = CompileJob {
        script: script.to_path_buf(),
        name,
        work_dir,
        main_rs: generated.main_rs.clone(),
        resource_script: generated.resource_script.clone(),
        dependency: config.launcher_dependency().clone(),
        cargo_args: config.cargo_args().to_vec(),
    };

    let built = match compiler.compile(&job) {
        Ok(built) => built,
        Err(e) => {
            generated.remove();
            return Err(e);
        }
    };

    if let Err(source) = fs::copy(&built, &launcher) {
        generated.remove();
        let _ = fs::remove_file(&launcher);
        return Err(BuildError::Io {
            path: launcher,
            source,
        });
    }
    if let Err(e) = write_file(&fingerprint_path, &fingerprint) {
        warn!("launcher built but its fingerprint was not recorded: {}", e);
    }

    info!(
        "Built {} ({} signatures, detection {})",
        launcher.display(),
        table.len(),
        config.detection()
    );

    Ok(LauncherReport {
        script: script.to_path_buf(),
        launcher,
        table,
        unresolved: resolution.unresolved,
        up_to_date: false,
    })
}

fn resolver_for(config: &BuildConfig, script: &Path) -> DependencyResolver {
    let info = if config.probe_interpreter() {
        let interpreter = config
            .interpreter()
            .map(Path::to_path_buf)
            .unwrap_or_else(default_interpreter);
        match probe(&interpreter) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(
                    "cannot probe {} ({}); only the script directory and configured paths are searched",
                    interpreter.display(),
                    e
                );
                None
            }
        }
    } else {
        None
    };

    let script_dir = script.parent().unwrap_or_else(|| Path::new("."));
    let search_path = SearchPath::for_build(script_dir, config.extra_paths(), info.as_ref());
    debug!("search path: {:?}", search_path.roots());

    let resolver = DependencyResolver::new(search_path);
    match info {
        Some(info) => resolver.with_builtins(info.builtin_modules),
        None => resolver,
    }
}

fn is_up_to_date(launcher: &Path, inputs: &[&Path]) -> bool {
    let modified = |path: &Path| fs::metadata(path).and_then(|m| m.modified()).ok();

    let Some(built) = modified(launcher) else {
        return false;
    };
    inputs
        .iter()
        .all(|input| modified(input).is_some_and(|t: SystemTime| t <= built))
}

/// Digest over everything that shapes the launcher binary
fn build_fingerprint(config: &BuildConfig, source: &str, resource_script: Option<&str>) -> String {
    let mut material = String::from(source);
    material.push_str("\0rc\0");
    material.push_str(resource_script.unwrap_or_default());
    material.push_str("\0dependency\0");
    material.push_str(&format!("{:?}", config.launcher_dependency()));
    material.push_str("\0cargo\0");
    material.push_str(&config.cargo_args().join("\0"));
    hasher::hash_string(&material)
}

fn fingerprint_matches(path: &Path, fingerprint: &str) -> bool {
    match fs::read_to_string(path) {
        Ok(recorded) => recorded.trim() == fingerprint,
        Err(_) => false,
    }
}

/// Cargo target names allow letters, digits, `-` and `_`
fn binary_name(entry: &str) -> String {
    let name: String = entry
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() {
        "launcher".to_string()
    } else {
        name
    }
}

/// Files written into the work directory for one launcher
struct GeneratedFiles {
    main_rs: PathBuf,
    resource_script: Option<PathBuf>,
}

impl GeneratedFiles {
    fn write(
        work_dir: &Path,
        name: &str,
        source: &str,
        resource_script: Option<&str>,
    ) -> Result<Self, BuildError> {
        let src_dir = work_dir.join("src");
        fs::create_dir_all(&src_dir).map_err(|source| BuildError::Io {
            path: src_dir.clone(),
            source,
        })?;

        let main_rs = src_dir.join("main.rs");
        write_file(&main_rs, source)?;
        let mut generated = GeneratedFiles {
            main_rs,
            resource_script: None,
        };

        if let Some(resource_script) = resource_script {
            let rc = work_dir.join(format!("{name}.rc"));
            if let Err(e) = write_file(&rc, resource_script) {
                generated.remove();
                return Err(e);
            }
            generated.resource_script = Some(rc);
        }

        debug!("generated launcher sources in {}", work_dir.display());
        Ok(generated)
    }

    fn remove(&self) {
        let _ = fs::remove_file(&self.main_rs);
        if let Some(rc) = &self.resource_script {
            let _ = fs::remove_file(rc);
        }
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), BuildError> {
    fs::write(path, content).map_err(|source| BuildError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Builds launcher crates with `cargo build --release`
#[derive(Debug, Clone)]
pub struct CargoCompiler {
    cargo: PathBuf,
}

impl Default for CargoCompiler {
    fn default() -> Self {
        let cargo = std::env::var_os("CARGO")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("cargo"));
        CargoCompiler { cargo }
    }
}

impl CargoCompiler {
    pub fn new(cargo: impl Into<PathBuf>) -> Self {
        CargoCompiler {
            cargo: cargo.into(),
        }
    }

    /// `Cargo.toml` of a generated launcher crate
    pub fn manifest(job: &CompileJob) -> String {
        let dependency = match &job.dependency {
            LauncherDependency::Version { version } => format!(
                "signet-core = {{ version = {}, default-features = false }}",
                toml_string(version)
            ),
            LauncherDependency::Path { path } => format!(
                "signet-core = {{ path = {}, default-features = false }}",
                toml_string(&path.display().to_string())
            ),
        };

        let mut manifest = format!(
            "[package]\nname = \"{name}-launcher\"\nversion = \"0.0.0\"\nedition = \"2021\"\npublish = false\n\n\
             [[bin]]\nname = \"{name}\"\npath = \"src/main.rs\"\n\n\
             [dependencies]\n{dependency}\n",
            name = job.name
        );
        if job.resource_script.is_some() {
            manifest.push_str("\n[build-dependencies]\nembed-resource = \"2\"\n");
        }
        manifest.push_str(
            "\n[profile.release]\nopt-level = \"s\"\nlto = true\ncodegen-units = 1\npanic = \"abort\"\nstrip = true\n\n[workspace]\n",
        );
        manifest
    }

    /// `build.rs` embedding the resource script, if there is one
    pub fn build_script(job: &CompileJob) -> Option<String> {
        let rc = job.resource_script.as_ref()?;
        let file_name = rc.file_name()?.to_str()?;
        Some(format!(
            "fn main() {{\n    embed_resource::compile({}, embed_resource::NONE)\n        .manifest_optional()\n        .unwrap();\n}}\n",
            toml_string(file_name)
        ))
    }
}

impl Compiler for CargoCompiler {
    fn compile(&self, job: &CompileJob) -> Result<PathBuf, BuildError> {
        let manifest_path = job.work_dir.join("Cargo.toml");
        write_file(&manifest_path, &Self::manifest(job))?;

        let build_rs = job.work_dir.join("build.rs");
        match Self::build_script(job) {
            Some(script) => write_file(&build_rs, &script)?,
            None => {
                let _ = fs::remove_file(&build_rs);
            }
        }

        let target_dir = job.work_dir.join("target");
        let mut command = Command::new(&self.cargo);
        command
            .arg("build")
            .arg("--release")
            .arg("--manifest-path")
            .arg(&manifest_path)
            .arg("--target-dir")
            .arg(&target_dir)
            .args(&job.cargo_args);
        debug!("running {:?}", command);

        let output = command.output().map_err(|e| BuildError::Compile {
            script: job.script.clone(),
            reason: format!("failed to run {}: {}", self.cargo.display(), e),
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(20).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            return Err(BuildError::Compile {
                script: job.script.clone(),
                reason: format!("cargo exited with {}\n{}", output.status, tail.join("\n")),
            });
        }

        let built = target_dir
            .join("release")
            .join(format!("{}{}", job.name, std::env::consts::EXE_SUFFIX));
        if !built.is_file() {
            return Err(BuildError::Compile {
                script: job.script.clone(),
                reason: format!("cargo succeeded but {} is missing", built.display()),
            });
        }
        Ok(built)
    }
}

/// Quote a value as a TOML basic string (also a valid Rust string literal)
fn toml_string(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildOverrides;
    use crate::launcher::DetectionLevel;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Records jobs and "compiles" by copying the generated source
    #[derive(Default)]
    struct RecordingCompiler {
        jobs: RefCell<Vec<CompileJob>>,
        fail: bool,
    }

    impl Compiler for RecordingCompiler {
        fn compile(&self, job: &CompileJob) -> Result<PathBuf, BuildError> {
            self.jobs.borrow_mut().push(job.clone());
            if self.fail {
                return Err(BuildError::Compile {
                    script: job.script.clone(),
                    reason: "linker exploded".to_string(),
                });
            }
            let out = job.work_dir.join("fake-launcher");
            fs::copy(&job.main_rs, &out).unwrap();
            Ok(out)
        }
    }

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("hello.py"), "from world import greet\ngreet()\n").unwrap();
        fs::write(dir.path().join("world.py"), "def greet(): print('Hello world')\n").unwrap();
        dir
    }

    fn config(dir: &Path, overrides: BuildOverrides) -> BuildConfig {
        BuildConfig::builder(dir)
            .with_overrides(BuildOverrides {
                scripts: vec![PathBuf::from("hello.py")],
                probe_interpreter: Some(false),
                ..overrides
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_run_builds_launcher_next_to_script() {
        let dir = project();
        let compiler = RecordingCompiler::default();
        let reports = run(&config(dir.path(), BuildOverrides::default()), &compiler).unwrap();

        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert!(!report.up_to_date);
        assert_eq!(report.launcher, launcher_path(&dir.path().join("hello.py")));
        assert!(report.launcher.is_file());

        let names: Vec<&str> = report
            .table
            .signatures()
            .iter()
            .map(|s| s.module_name.as_str())
            .collect();
        assert_eq!(names, vec!["hello", "world"]);

        let rendered = fs::read_to_string(&report.launcher).unwrap();
        assert!(rendered.contains("const SCRIPT: &str = \"hello.py\";"));
        assert!(rendered.contains("const TAMPER: u8 = 2;"));

        let jobs = compiler.jobs.borrow();
        assert_eq!(jobs[0].name, "hello");
        assert_eq!(jobs[0].resource_script, None);
    }

    #[test]
    fn test_up_to_date_launcher_is_skipped_unless_forced() {
        let dir = project();
        let compiler = RecordingCompiler::default();
        run(&config(dir.path(), BuildOverrides::default()), &compiler).unwrap();

        let again = run(&config(dir.path(), BuildOverrides::default()), &compiler).unwrap();
        assert!(again[0].up_to_date);
        assert_eq!(compiler.jobs.borrow().len(), 1);

        let forced = run(
            &config(
                dir.path(),
                BuildOverrides {
                    force: Some(true),
                    ..Default::default()
                },
            ),
            &compiler,
        )
        .unwrap();
        assert!(!forced[0].up_to_date);
        assert_eq!(compiler.jobs.borrow().len(), 2);
    }

    #[test]
    fn test_changed_detection_level_rebuilds() {
        let dir = project();
        let compiler = RecordingCompiler::default();
        run(&config(dir.path(), BuildOverrides::default()), &compiler).unwrap();

        let stricter = run(
            &config(
                dir.path(),
                BuildOverrides {
                    detection: Some(3),
                    ..Default::default()
                },
            ),
            &compiler,
        )
        .unwrap();
        assert!(!stricter[0].up_to_date);
        assert_eq!(compiler.jobs.borrow().len(), 2);
        let rendered = fs::read_to_string(&stricter[0].launcher).unwrap();
        assert!(rendered.contains("const TAMPER: u8 = 3;"));
    }

    #[test]
    fn test_changed_filter_rebuilds() {
        let dir = project();
        let compiler = RecordingCompiler::default();
        run(&config(dir.path(), BuildOverrides::default()), &compiler).unwrap();

        let narrowed = run(
            &config(
                dir.path(),
                BuildOverrides {
                    excludes: vec!["world".to_string()],
                    ..Default::default()
                },
            ),
            &compiler,
        )
        .unwrap();
        assert!(!narrowed[0].up_to_date);
        assert_eq!(narrowed[0].table.len(), 1);
    }

    #[test]
    fn test_missing_fingerprint_rebuilds() {
        let dir = project();
        let compiler = RecordingCompiler::default();
        let config = config(dir.path(), BuildOverrides::default());
        run(&config, &compiler).unwrap();

        fs::remove_file(config.build_dir().join("hello").join(FINGERPRINT_FILE)).unwrap();
        let again = run(&config, &compiler).unwrap();
        assert!(!again[0].up_to_date);
        assert!(config.build_dir().join("hello").join(FINGERPRINT_FILE).is_file());
    }

    #[test]
    fn test_compile_failure_removes_generated_sources() {
        let dir = project();
        let compiler = RecordingCompiler {
            fail: true,
            ..Default::default()
        };
        let config = config(dir.path(), BuildOverrides::default());

        let err = run(&config, &compiler).unwrap_err();
        assert!(matches!(err, BuildError::Compile { .. }));
        assert!(!config.build_dir().join("hello/src/main.rs").exists());
        assert!(!launcher_path(&dir.path().join("hello.py")).exists());
    }

    #[test]
    fn test_mkresource_writes_resource_script() {
        let dir = project();
        fs::write(
            dir.path().join("hello.py"),
            "__companyname__ = 'Acme'\n__filedescription__ = 'Hello'\n__legalcopyright__ = 'MIT'\n__productname__ = 'hello'\n__fileversion__ = '1.2'\nimport world\n",
        )
        .unwrap();
        let compiler = RecordingCompiler::default();
        run(
            &config(
                dir.path(),
                BuildOverrides {
                    mkresource: Some(true),
                    detection: Some(DetectionLevel::Warn.as_u8()),
                    ..Default::default()
                },
            ),
            &compiler,
        )
        .unwrap();

        let jobs = compiler.jobs.borrow();
        let rc = jobs[0].resource_script.as_ref().unwrap();
        let content = fs::read_to_string(rc).unwrap();
        assert!(content.contains("FILEVERSION 1,2,0,0"));
        assert!(CargoCompiler::manifest(&jobs[0]).contains("embed-resource"));
        assert!(CargoCompiler::build_script(&jobs[0])
            .unwrap()
            .contains("embed_resource::compile(\"hello.rc\""));
        // a failed resource compile must fail the launcher build
        let build_rs = CargoCompiler::build_script(&jobs[0]).unwrap();
        assert!(build_rs.contains(".manifest_optional()\n        .unwrap();"));
        assert!(!build_rs.contains("let _ ="));
    }

    #[test]
    fn test_mkresource_missing_field_fails() {
        let dir = project();
        let err = run(
            &config(
                dir.path(),
                BuildOverrides {
                    mkresource: Some(true),
                    ..Default::default()
                },
            ),
            &RecordingCompiler::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::MissingResourceField { .. }));
    }

    #[test]
    fn test_manifest_uses_runtime_only_dependency() {
        let job = CompileJob {
            script: PathBuf::from("/p/hello.py"),
            name: "hello".to_string(),
            work_dir: PathBuf::from("/p/build/signet/hello"),
            main_rs: PathBuf::from("/p/build/signet/hello/src/main.rs"),
            resource_script: None,
            dependency: LauncherDependency::Path {
                path: PathBuf::from("C:\\src\\signet-core"),
            },
            cargo_args: Vec::new(),
        };

        let manifest = CargoCompiler::manifest(&job);
        assert!(manifest.contains(
            "signet-core = { path = \"C:\\\\src\\\\signet-core\", default-features = false }"
        ));
        assert!(manifest.contains("strip = true"));
        assert!(!manifest.contains("embed-resource"));
        assert_eq!(CargoCompiler::build_script(&job), None);
    }

    #[test]
    fn test_binary_name() {
        assert_eq!(binary_name("hello"), "hello");
        assert_eq!(binary_name("my tool.v2"), "my_tool_v2");
    }
}
