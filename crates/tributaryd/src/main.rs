//! tributaryd - runs connector supervisors from a YAML config
//!
//! Each configured connector replays an ndjson event file through the
//! engine and writes the translated changes as SQL text. Useful both as a
//! harness around the engine library and as a plan/preview tool for rule
//! files.
//!
//! ```bash
//! # run every configured connector until the replay drains (ctrl-c to stop)
//! tributaryd -c tributary.yaml
//!
//! # check the config without running anything
//! tributaryd -c tributary.yaml validate
//! ```

mod config;
mod replay;
mod store;
mod stream;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tributary::{StatusRegistry, Supervisor};

use config::DaemonConfig;
use replay::ReplayProducer;
use store::ConfigStore;
use stream::SqlStreamDestination;

#[derive(Parser)]
#[command(name = "tributaryd")]
#[command(version, about = "Tributary connector daemon")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "tributary.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all configured connectors (default)
    Run,
    /// Validate the configuration file
    Validate,
    /// Add a connector from a YAML snippet
    AddConnector {
        /// File containing one connector entry
        file: PathBuf,
    },
    /// Remove a connector from the config
    DeleteConnector { name: String },
    /// Attach a rule file to a connector
    AttachRules { name: String, rules: PathBuf },
    /// Detach a connector's rule file
    DetachRules { name: String },
    /// Set an extra producer parameter on a connector
    SetExtra {
        name: String,
        key: String,
        value: String,
    },
    /// Remove an extra producer parameter
    UnsetExtra { name: String, key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let store = ConfigStore::new(&cli.config);
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let config = load(&cli.config)?;
            run_all(config).await
        }
        Commands::Validate => validate(load(&cli.config)?),
        Commands::AddConnector { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let entry = serde_yaml::from_str(&text)
                .with_context(|| format!("bad connector entry in {}", file.display()))?;
            store.add_connector(entry)
        }
        Commands::DeleteConnector { name } => store.delete_connector(&name),
        Commands::AttachRules { name, rules } => store.attach_rules(&name, &rules),
        Commands::DetachRules { name } => store.detach_rules(&name),
        Commands::SetExtra { name, key, value } => store.set_extra(&name, &key, &value),
        Commands::UnsetExtra { name, key } => store.unset_extra(&name, &key),
    }
}

fn load(path: &std::path::Path) -> Result<DaemonConfig> {
    DaemonConfig::from_file(path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

fn validate(config: DaemonConfig) -> Result<()> {
    let problems = config.problems();
    if problems.is_empty() {
        println!("config ok: {} connector(s)", config.connectors.len());
        return Ok(());
    }
    for problem in &problems {
        eprintln!("error: {problem}");
    }
    bail!("{} problem(s) found", problems.len());
}

async fn run_all(config: DaemonConfig) -> Result<()> {
    if config.connectors.is_empty() {
        bail!("no connectors configured");
    }
    let problems = config.problems();
    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("error: {problem}");
        }
        bail!("refusing to start with {} config problem(s)", problems.len());
    }

    let registry = Arc::new(StatusRegistry::new());
    let (shutdown, _) = broadcast::channel::<()>(4);

    let mut tasks = Vec::new();
    for entry in &config.connectors {
        let name = entry.engine.name.clone();
        let destination = Arc::new(SqlStreamDestination::new(
            &entry.tables,
            entry.output_file.as_deref(),
        )?);
        let producer = Box::new(ReplayProducer::new(entry.events_file.clone()));
        let supervisor = Supervisor::new(
            entry.engine.clone(),
            producer,
            destination,
            registry.clone(),
        )
        .with_context(|| format!("connector '{name}'"))?;

        info!(connector = %name, "starting connector");
        let rx = shutdown.subscribe();
        tasks.push((name, tokio::spawn(supervisor.run(rx))));
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");
    let _ = shutdown.send(());

    let mut failures = 0usize;
    for (name, task) in tasks {
        match task.await {
            Ok(Ok(())) => info!(connector = %name, "stopped"),
            Ok(Err(e)) => {
                failures += 1;
                error!(connector = %name, error = %e, "stopped on error");
            }
            Err(e) => {
                failures += 1;
                error!(connector = %name, error = %e, "task panicked");
            }
        }
    }

    // exit hook: clear any slot this pid still owns, whatever the reason
    registry.release_all_for_pid(std::process::id());

    for snapshot in registry.all() {
        info!(
            connector = %snapshot.name,
            state = %snapshot.state,
            events = snapshot.stats.total_events,
            bad = snapshot.stats.bad_events,
            "final status"
        );
    }

    if failures > 0 {
        bail!("{failures} connector(s) stopped on error");
    }
    Ok(())
}
