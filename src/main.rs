use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use buildpilot::build_log::{BuildStatus, LogCollector, ProfileError};
use buildpilot::config::{BuildProfile, Config};
use buildpilot::env_vars::{EnvOverrides, ENV_VARS};
use buildpilot::envcheck::check_environment;
use buildpilot::projects::{list_projects, project_name};
use buildpilot::scheduler::partition;
use buildpilot::{logging, report, Builder, BuildTypeRegistry, Scheduler, ShellRunner};

#[derive(Parser)]
#[command(name = "buildpilot")]
#[command(about = "Scan a directory of projects and build each one by its detected type")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every project in the selected profiles (default)
    Build {
        /// Profile to run instead of active_profile ("all" runs every profile)
        #[arg(short, long)]
        profile: Option<String>,

        /// Number of concurrent builds for non-priority projects
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Also write the build log as JSON to this path
        #[arg(long)]
        json: Option<PathBuf>,

        /// Exit non-zero when any project fails
        #[arg(long)]
        fail_on_error: bool,
    },

    /// Show which projects each profile would build, and in what order
    List {
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Print the detected project type of a directory
    Detect {
        path: PathBuf,
    },

    /// Show the toolchain check and recognised environment variables
    Env,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Load configuration first (needed for logging setup)
    let config = Config::load(cli.config.as_deref())?;
    let logging_handle = logging::init_logging(&config, cli.debug)?;
    if let Some(ref path) = logging_handle.log_file_path {
        tracing::info!("Logging to {}", path.display());
    }

    match cli.command {
        None => cmd_build(&config, None, None, None, false).await,
        Some(Commands::Build {
            profile,
            jobs,
            json,
            fail_on_error,
        }) => cmd_build(&config, profile, jobs, json, fail_on_error).await,
        Some(Commands::List { profile }) => {
            cmd_list(&config, profile.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Detect { path }) => cmd_detect(&config, &path),
        Some(Commands::Env) => {
            cmd_env(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Resolve selected profiles; a broken profile is recorded and left out
fn resolve_profiles(
    config: &Config,
    name: Option<&str>,
    log: Option<&LogCollector>,
) -> Result<Vec<BuildProfile>> {
    let mut profiles = Vec::new();
    for (name, raw) in config.selected_profiles(name)? {
        match raw.resolve(&name) {
            Ok(profile) => profiles.push(profile),
            Err(e) => {
                tracing::error!(profile = %name, error = %e, "Skipping profile");
                if let Some(log) = log {
                    log.push_profile_error(ProfileError {
                        profile: name,
                        message: e.to_string(),
                    });
                }
            }
        }
    }
    Ok(profiles)
}

async fn cmd_build(
    config: &Config,
    profile: Option<String>,
    jobs: Option<usize>,
    json: Option<PathBuf>,
    fail_on_error: bool,
) -> Result<ExitCode> {
    let overrides = EnvOverrides::load(&config.env_file())?;
    let runner = Arc::new(ShellRunner::with_overrides(&overrides)?);
    let registry = Arc::new(BuildTypeRegistry::load(&config.config_dir())?);
    if registry.is_empty() {
        tracing::warn!(
            "No project types found in {}, every project will be skipped",
            config.config_dir().display()
        );
    }
    let cwd = std::env::current_dir().context("Failed to read working directory")?;

    println!("Environment Check");
    println!("{}", "=".repeat(60));
    let environment =
        check_environment(&config.env_check, &overrides, runner.as_ref(), &cwd).await;
    for line in &environment {
        println!("{}", line);
    }
    println!("{}\n", "=".repeat(60));

    let log = LogCollector::with_environment(environment);
    let profiles = resolve_profiles(config, profile.as_deref(), Some(&log))?;

    let builder = Arc::new(
        Builder::new(registry, runner).with_streaming(config.logging.stream_output),
    );
    let scheduler = Scheduler::new(builder, jobs.unwrap_or_else(|| config.effective_workers()));
    tracing::info!(
        workers = scheduler.workers(),
        profiles = profiles.len(),
        "Starting builds"
    );
    scheduler.run(&profiles, &log).await;

    let log = log.into_log();
    let summary_path = config.summary_path();
    report::write_summary(&log, &summary_path)?;
    if let Some(ref path) = json {
        report::write_json(&log, path)?;
    }

    println!(
        "Built {} project(s): {} succeeded, {} failed, {} skipped",
        log.entries.len(),
        log.count(BuildStatus::Success),
        log.count(BuildStatus::Failed),
        log.count(BuildStatus::Skipped),
    );
    if !log.errors.is_empty() {
        println!("{} build task(s) crashed", log.errors.len());
    }
    println!("Summary written to {}", summary_path.display());

    if (fail_on_error || config.fail_on_error) && log.has_failures() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_list(config: &Config, profile: Option<&str>) -> Result<()> {
    let registry = BuildTypeRegistry::load(&config.config_dir())?;
    println!(
        "Project types ({}): {}",
        registry.len(),
        registry.names().collect::<Vec<_>>().join(", ")
    );

    for profile in resolve_profiles(config, profile, None)? {
        println!("Profile: {} ({})", profile.name, profile.base_directory.display());
        let projects = match list_projects(&profile.base_directory, &profile.filter) {
            Ok(projects) => projects,
            Err(e) => {
                println!("  {}", e);
                continue;
            }
        };

        let partition = partition(projects, &profile.build_priority);
        for warning in &partition.warnings {
            println!("  warning: {}", warning);
        }
        for (i, path) in partition.priority.iter().enumerate() {
            println!("  {}. {}", i + 1, project_name(path));
        }
        for path in &partition.remainder {
            println!("  - {}", project_name(path));
        }
    }
    Ok(())
}

fn cmd_detect(config: &Config, path: &Path) -> Result<ExitCode> {
    let registry = BuildTypeRegistry::load(&config.config_dir())?;
    match registry.detect_project(path) {
        Some(project_type) => {
            println!("{}", project_type);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            println!("unknown project type");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn cmd_env(config: &Config) -> Result<()> {
    let overrides = EnvOverrides::load(&config.env_file())?;
    let runner = ShellRunner::with_overrides(&overrides)?;
    let cwd = std::env::current_dir().context("Failed to read working directory")?;

    for line in check_environment(&config.env_check, &overrides, &runner, &cwd).await {
        println!("{}", line);
    }

    println!();
    println!("Overrides from {}:", config.env_file().display());
    for (key, value) in overrides.vars() {
        println!("  {} = {}", key, value);
    }
    if !overrides.path_prepend().is_empty() {
        println!("  PATH prepended with {}", overrides.path_prepend().join(", "));
    }

    println!();
    println!("Configuration variables:");
    for var in ENV_VARS {
        println!(
            "  {:<38} {} (default: {})",
            var.name,
            var.description,
            var.default.unwrap_or("none")
        );
    }
    Ok(())
}
