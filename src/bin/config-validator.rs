//! # AS4 Configuration Validator
//!
//! Command-line tool for validating AS4 core configuration and PMode
//! directories across environments before an MSH is started.

use anyhow::{bail, Context};
use as4_core::config::{As4Config, ConfigManager};
use as4_core::pipeline::StepRegistry;
use as4_core::pmode::{FilePModeStore, PModeStore};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

const ENVIRONMENTS: [&str; 3] = ["development", "test", "production"];

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate AS4 core configuration and PModes")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: ./config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate configuration, pipelines and PModes
    All,

    /// Check that every pipeline only names registered steps
    Pipelines,

    /// Load and list the PModes of the configured directory
    Pmodes,

    /// Validate every known environment
    Environments,

    /// Show the effective configuration with sensitive values masked
    Show,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::All) | None => validate_all(&cli),
        Some(Commands::Pipelines) => {
            load(&cli, &cli.environment).and_then(|m| validate_pipelines(m.config()))
        }
        Some(Commands::Pmodes) => {
            load(&cli, &cli.environment).and_then(|m| validate_pmodes(&m))
        }
        Some(Commands::Environments) => validate_environments(&cli),
        Some(Commands::Show) => show(&cli),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {e:#}");
            println!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli, environment: &str) -> anyhow::Result<std::sync::Arc<ConfigManager>> {
    ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), environment)
        .with_context(|| format!("loading configuration for '{environment}'"))
}

fn validate_all(cli: &Cli) -> anyhow::Result<()> {
    println!("🔧 Validating AS4 configuration");
    println!("Environment: {}", cli.environment);
    println!();

    let manager = load(cli, &cli.environment)?;
    println!("✅ Configuration loaded from {}", manager.config_directory().display());

    validate_pipelines(manager.config())?;
    validate_pmodes(&manager)?;
    Ok(())
}

fn validate_pipelines(config: &As4Config) -> anyhow::Result<()> {
    let registry = StepRegistry::with_builtin_steps();
    let mut unknown = Vec::new();

    let mut names: Vec<&String> = config.pipelines.keys().collect();
    names.sort();
    for name in names {
        let pipeline = &config.pipelines[name];
        println!(
            "  pipeline '{name}': {} normal / {} error steps",
            pipeline.normal_pipeline.len(),
            pipeline.error_pipeline.len()
        );
        for step in pipeline
            .normal_pipeline
            .iter()
            .chain(pipeline.error_pipeline.iter())
        {
            if !registry.contains(step) {
                unknown.push(format!("{name}: {step}"));
            }
        }
    }

    if !unknown.is_empty() {
        bail!(
            "unknown steps {:?}; registered steps are {:?}",
            unknown,
            registry.step_names()
        );
    }
    println!("✅ All pipelines resolve against the step registry");
    Ok(())
}

fn validate_pmodes(manager: &ConfigManager) -> anyhow::Result<()> {
    let directory = manager.pmode_directory();
    let store = FilePModeStore::load(directory.clone())
        .with_context(|| format!("loading PModes from {}", directory.display()))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .context("creating runtime")?;
    let receiving = runtime.block_on(store.receiving_pmodes())?;

    println!("  receiving PModes (match precedence order):");
    for pmode in &receiving {
        println!("    - {}", pmode.id);
    }

    for mpc in &manager.config().pull_requests.mpcs {
        if let Some(pmode_id) = &mpc.pmode_id {
            runtime
                .block_on(store.get_sending_pmode(pmode_id))
                .with_context(|| format!("pull MPC '{}'", mpc.mpc))?;
        }
    }

    println!("✅ PModes loaded from {}", directory.display());
    Ok(())
}

fn validate_environments(cli: &Cli) -> anyhow::Result<()> {
    let mut failed = 0;
    for environment in ENVIRONMENTS {
        match load(cli, environment) {
            Ok(_) => println!("✅ {environment}"),
            Err(e) => {
                failed += 1;
                println!("❌ {environment}: {e:#}");
            }
        }
    }
    if failed > 0 {
        bail!("{failed} environment(s) failed validation");
    }
    Ok(())
}

fn show(cli: &Cli) -> anyhow::Result<()> {
    let manager = load(cli, &cli.environment)?;
    println!("{}", serde_yaml::to_string(&manager.debug_config())?);
    Ok(())
}
