//! signet - tamper-detecting launchers for Python applications
//!
//! Command line front end over `signet_core`: `build` produces launchers,
//! `sigs` shows what a launcher would embed, `sign` signs and timestamps
//! finished launchers.

use anyhow::{Context, Result};
use clap::{Args, Parser, ValueEnum};
use std::path::{Path, PathBuf};
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use signet_core::config::{BuildConfig, BuildOverrides, ConfigFile, SignSection};
use signet_core::pipeline::{self, CargoCompiler};
use signet_core::signing::{self, KeyringStore, SignConfig, SignToolCli, StdinPrompter};
use signet_core::SignError;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "signet",
    about = "Tamper-detecting launchers for Python applications",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    /// Set log level
    #[clap(long, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Emit logs as JSON
    #[clap(long, global = true)]
    log_json: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Build a launcher for every entry script
    Build {
        #[clap(flatten)]
        build: BuildArgs,

        /// Sign and timestamp each launcher after building it
        #[clap(long)]
        sign: bool,

        #[clap(flatten)]
        signing: SignArgs,
    },

    /// Show the signatures a launcher would embed, without building
    Sigs {
        #[clap(flatten)]
        build: BuildArgs,

        /// Output results as JSON
        #[clap(long)]
        json: bool,

        /// Also list imports that will not be signed
        #[clap(long)]
        unresolved: bool,
    },

    /// Sign and timestamp built launchers
    Sign {
        /// Project directory (default: current directory)
        #[clap(long, default_value = ".")]
        project_dir: PathBuf,

        /// Launchers to sign (default: the launchers of the configured scripts)
        binaries: Vec<PathBuf>,

        #[clap(flatten)]
        signing: SignArgs,
    },
}

/// Build options; each one overrides `signet.yml`
#[derive(Args, Debug, Clone, Default)]
struct BuildArgs {
    /// Project directory holding signet.yml (default: current directory)
    #[clap(long, default_value = ".")]
    project_dir: PathBuf,

    /// Entry scripts (default: build.scripts from signet.yml)
    scripts: Vec<PathBuf>,

    /// Launcher template (.rs) to use instead of the built-in one
    #[clap(long)]
    template: Option<PathBuf>,

    /// Detection level: 0 disabled, 1 warn, 2 normal, 3 require signed binary
    #[clap(long, value_parser = clap::value_parser!(u8).range(0..=3))]
    detection: Option<u8>,

    /// Module to leave unsigned, together with its submodules (repeatable)
    #[clap(long = "exclude", value_name = "MODULE")]
    excludes: Vec<String>,

    /// Sign only these modules (repeatable)
    #[clap(long = "include", value_name = "MODULE")]
    includes: Vec<String>,

    /// Sign only the entry script
    #[clap(long)]
    skipdepends: bool,

    /// Leave virtualenv bootstrap modules unsigned
    #[clap(long)]
    virtualenv: bool,

    /// Generate a version resource for the launcher
    #[clap(long)]
    mkresource: bool,

    /// Rebuild even when the launcher is up to date
    #[clap(long)]
    force: bool,

    /// Python interpreter used to discover the module search path
    #[clap(long)]
    interpreter: Option<PathBuf>,

    /// Do not run the interpreter; search only the script directory and configured paths
    #[clap(long)]
    no_probe: bool,

    /// Directory for generated launcher crates
    #[clap(long)]
    build_dir: Option<PathBuf>,

    /// Extra arguments passed to cargo, shell-quoted
    #[clap(long, allow_hyphen_values = true)]
    cargo_args: Option<String>,
}

impl BuildArgs {
    fn overrides(&self) -> BuildOverrides {
        let flag = |set: bool| set.then_some(true);
        BuildOverrides {
            scripts: self.scripts.clone(),
            template: self.template.clone(),
            detection: self.detection,
            excludes: self.excludes.clone(),
            includes: self.includes.clone(),
            skipdepends: flag(self.skipdepends),
            virtualenv: flag(self.virtualenv),
            mkresource: flag(self.mkresource),
            force: flag(self.force),
            interpreter: self.interpreter.clone(),
            probe_interpreter: self.no_probe.then_some(false),
            build_dir: self.build_dir.clone(),
            cargo_args: self.cargo_args.clone(),
        }
    }

    fn config(&self) -> Result<BuildConfig> {
        BuildConfig::builder(&self.project_dir)
            .load_file()
            .with_context(|| format!("Failed to load configuration from {}", self.project_dir.display()))?
            .with_overrides(self.overrides())
            .build()
            .context("Invalid build configuration")
    }
}

/// Signing options; each one overrides the `sign:` section
#[derive(Args, Debug, Clone, Default)]
struct SignArgs {
    /// PFX certificate file
    #[clap(long)]
    pfx_file: Option<PathBuf>,

    /// Certificate passphrase (prefer --savedpassword)
    #[clap(long)]
    password: Option<String>,

    /// Keep the passphrase in the system keyring
    #[clap(long)]
    savedpassword: bool,

    /// Delete the stored passphrase before signing
    #[clap(long)]
    resetpassword: bool,

    /// Path to signtool.exe
    #[clap(long)]
    signtool: Option<PathBuf>,

    /// File digest algorithm
    #[clap(long)]
    digest: Option<String>,

    /// Timestamp attempts per server
    #[clap(long)]
    retries: Option<usize>,
}

impl SignArgs {
    /// Flags over project section over user defaults
    fn section(&self, project: SignSection, user: SignSection) -> SignSection {
        SignSection {
            pfx_file: self.pfx_file.clone(),
            password: self.password.clone(),
            savedpassword: self.savedpassword,
            resetpassword: self.resetpassword,
            digest: self.digest.clone(),
            signtool: self.signtool.clone(),
            retries: self.retries,
            ..SignSection::default()
        }
        .or_defaults(project.or_defaults(user))
    }

    fn config(&self, project_dir: &Path) -> Result<SignConfig> {
        let project = ConfigFile::discover(project_dir)
            .with_context(|| format!("Failed to load configuration from {}", project_dir.display()))?
            .map(|file| file.sign)
            .unwrap_or_default();
        let user = signet_core::config::user_sign_defaults()
            .context("Failed to load user configuration")?;
        Ok(SignConfig::from_section(self.section(project, user)))
    }
}

/// One row of the `sigs` table
#[derive(Tabled)]
struct SignatureRow {
    #[tabled(rename = "Module")]
    module: String,
    #[tabled(rename = "Digest")]
    digest: String,
}

#[derive(Tabled)]
struct UnresolvedRow {
    #[tabled(rename = "Module")]
    module: String,
    #[tabled(rename = "Imported by")]
    imported_by: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

fn initialize_tracing(log_level: &LogLevel, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_filter_directive()));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    initialize_tracing(&cli.log_level, cli.log_json);

    match cli.command {
        Command::Build {
            build,
            sign,
            signing,
        } => run_build(&build, sign.then_some(&signing)),
        Command::Sigs {
            build,
            json,
            unresolved,
        } => run_sigs(&build, json, unresolved),
        Command::Sign {
            project_dir,
            binaries,
            signing,
        } => run_sign(&project_dir, binaries, &signing),
    }
}

fn run_build(args: &BuildArgs, signing: Option<&SignArgs>) -> Result<()> {
    let config = args.config()?;
    let reports = pipeline::run(&config, &CargoCompiler::default()).context("Build failed")?;

    for report in &reports {
        for unresolved in &report.unresolved {
            warn!("{}", unresolved);
        }
        let state = if report.up_to_date { "up to date" } else { "built" };
        println!(
            "{} -> {} ({} signatures, {})",
            report.script.display(),
            report.launcher.display(),
            report.table.len(),
            state
        );
    }

    if let Some(signing) = signing {
        let binaries = reports.into_iter().map(|r| r.launcher).collect();
        sign_and_report(signing.config(config.project_dir())?, binaries)?;
    }
    Ok(())
}

fn run_sigs(args: &BuildArgs, json: bool, show_unresolved: bool) -> Result<()> {
    let config = args.config()?;

    let mut results = Vec::with_capacity(config.scripts().len());
    for script in config.scripts() {
        let signatures = pipeline::signatures_for(&config, script)
            .with_context(|| format!("Failed to resolve {}", script.display()))?;
        results.push((script, signatures));
    }

    if json {
        let value: serde_json::Value = results
            .iter()
            .map(|(script, sigs)| {
                let mut entry = serde_json::json!({
                    "script": script,
                    "entry": sigs.resolution.entry,
                    "signatures": sigs.table,
                });
                if show_unresolved {
                    entry["unresolved"] = sigs
                        .resolution
                        .unresolved
                        .iter()
                        .map(|u| {
                            serde_json::json!({
                                "module": u.name,
                                "imported_by": u.imported_by,
                                "reason": u.to_string(),
                            })
                        })
                        .collect();
                }
                entry
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    for (script, sigs) in &results {
        let rows: Vec<SignatureRow> = sigs
            .table
            .signatures()
            .iter()
            .map(|s| SignatureRow {
                module: s.module_name.clone(),
                digest: s.digest.clone(),
            })
            .collect();
        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Rows::first()).with(Alignment::center()))
            .to_string();

        println!("{} ({} signatures)\n", script.display(), rows.len());
        println!("{table}");

        if show_unresolved && !sigs.resolution.unresolved.is_empty() {
            let rows: Vec<UnresolvedRow> = sigs
                .resolution
                .unresolved
                .iter()
                .map(|u| UnresolvedRow {
                    module: u.name.clone(),
                    imported_by: u.imported_by.clone(),
                    reason: u.to_string(),
                })
                .collect();
            println!("\nNot signed:\n");
            println!("{}", Table::new(&rows).with(Style::rounded()));
        }
    }
    Ok(())
}

fn run_sign(project_dir: &Path, binaries: Vec<PathBuf>, args: &SignArgs) -> Result<()> {
    let binaries = if binaries.is_empty() {
        let config = BuildConfig::builder(project_dir)
            .load_file()?
            .build()
            .context("No launchers given and none configured")?;
        config
            .scripts()
            .iter()
            .map(|s| pipeline::launcher_path(s))
            .collect()
    } else {
        binaries
    };

    sign_and_report(args.config(project_dir)?, binaries)
}

fn sign_and_report(config: SignConfig, binaries: Vec<PathBuf>) -> Result<()> {
    let tool = SignToolCli::discover(config.signtool.as_deref())
        .map_err(log_sign_error)
        .context("Cannot sign")?;
    info!("Using {}", tool.path().display());

    let reports = signing::sign_binaries(
        &binaries,
        &config,
        &tool,
        &KeyringStore::default(),
        &StdinPrompter,
    )
    .map_err(log_sign_error)
    .context("Signing failed")?;

    for report in reports {
        println!(
            "{} signed, timestamped by {} after {} attempt(s)",
            report.binary.display(),
            report.server,
            report.attempts
        );
    }
    Ok(())
}

fn log_sign_error(e: SignError) -> SignError {
    e.log_if_security_critical();
    e
}
