//! `mops` -- CLI binary for the modelops orchestrator.
//!
//! Provides the following subcommands:
//!
//! - `mops serve` -- Run the scheduler until interrupted.
//! - `mops trigger` -- Start a manual run for a family and wait for it.
//! - `mops runs` -- Inspect and cancel pipeline runs.
//! - `mops registry` -- Inspect registered model versions.
//! - `mops decisions` -- Inspect recorded promotion decisions.
//! - `mops decide` -- Evaluate the promotion gates offline.
//! - `mops config` -- Show the resolved configuration.

use clap::{Parser, Subcommand};

mod commands;

/// modelops model lifecycle orchestrator CLI.
#[derive(Parser)]
#[command(name = "mops", about = "modelops model lifecycle orchestrator", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file path (overrides auto-discovery).
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and resume unfinished runs.
    Serve,

    /// Trigger a manual run for a model family.
    Trigger(commands::trigger::TriggerArgs),

    /// Inspect or cancel pipeline runs.
    Runs {
        #[command(subcommand)]
        action: RunsCmd,
    },

    /// Inspect the model registry.
    Registry {
        #[command(subcommand)]
        action: RegistryCmd,
    },

    /// Inspect recorded promotion decisions.
    Decisions {
        #[command(subcommand)]
        action: DecisionsCmd,
    },

    /// Evaluate the promotion gates for the given metrics.
    Decide(commands::decide::DecideArgs),

    /// Show resolved configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCmd,
    },
}

/// Subcommands for `mops runs`.
#[derive(Subcommand)]
enum RunsCmd {
    /// List runs, oldest first.
    List {
        /// Only show runs for this family.
        #[arg(long)]
        family: Option<String>,
    },

    /// Show one run with its stage results.
    Show {
        /// Run id (`run-...`).
        run_id: String,
    },

    /// Stop a run at its next stage boundary.
    Cancel {
        /// Run id (`run-...`).
        run_id: String,
    },
}

/// Subcommands for `mops registry`.
#[derive(Subcommand)]
enum RegistryCmd {
    /// List every version of a family.
    List {
        /// Model family key.
        family: String,
    },

    /// Show the family's current PRODUCTION version.
    Production {
        /// Model family key.
        family: String,
    },
}

/// Subcommands for `mops decisions`.
#[derive(Subcommand)]
enum DecisionsCmd {
    /// List decisions, oldest first.
    List {
        /// Only show decisions for this family.
        #[arg(long)]
        family: Option<String>,
    },
}

/// Subcommands for `mops config`.
#[derive(Subcommand)]
enum ConfigCmd {
    /// Show the full resolved configuration.
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let platform = commands::platform()?;
    let cfg = commands::load_config(&platform, cli.config.as_deref()).await?;

    match cli.command {
        Commands::Serve => commands::serve::run(cfg, &platform).await?,
        Commands::Trigger(args) => commands::trigger::run(args, cfg, &platform).await?,
        Commands::Runs { action } => match action {
            RunsCmd::List { family } => {
                commands::runs::runs_list(&cfg, &platform, family.as_deref()).await?;
            }
            RunsCmd::Show { run_id } => {
                commands::runs::runs_show(&cfg, &platform, &run_id).await?;
            }
            RunsCmd::Cancel { run_id } => {
                commands::runs::runs_cancel(&cfg, &platform, &run_id).await?;
            }
        },
        Commands::Registry { action } => match action {
            RegistryCmd::List { family } => {
                commands::registry_cmd::registry_list(&cfg, &platform, &family).await?;
            }
            RegistryCmd::Production { family } => {
                commands::registry_cmd::registry_production(&cfg, &platform, &family).await?;
            }
        },
        Commands::Decisions { action } => match action {
            DecisionsCmd::List { family } => {
                commands::decisions::decisions_list(&cfg, &platform, family.as_deref()).await?;
            }
        },
        Commands::Decide(args) => commands::decide::run(args, &cfg)?,
        Commands::Config { action } => match action {
            ConfigCmd::Show => commands::config_cmd::config_show(&cfg)?,
        },
    }

    Ok(())
}
