//! # lifestream CLI
//!
//! ## Usage
//!
//! ```bash
//! lifestream --config ./config/lifestream.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lifestream init` | Create the SQLite database and run schema migrations |
//! | `lifestream update` | Sync every enabled provider |
//! | `lifestream update -p NAME` | Sync only the named providers |
//! | `lifestream update -l` | List enabled providers |
//! | `lifestream timeline` | Print the newest timeline entries |

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

use lifestream::config::{self, Config};
use lifestream::fetch::Fetcher;
use lifestream::models::RecordKind;
use lifestream::providers::SyncContext;
use lifestream::registry::ProviderRegistry;
use lifestream::{db, migrate, scheduler, timeline};

/// lifestream: one chronological timeline of your activity across services.
#[derive(Parser)]
#[command(name = "lifestream", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lifestream.toml")]
    config: PathBuf,

    /// Log level: 0 = warnings, 1 = info, 2 = debug. `RUST_LOG` overrides.
    #[arg(short, long, global = true, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=2))]
    verbosity: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run more than once.
    Init,

    /// Fetch new activity from providers into the timeline.
    Update {
        /// Only update this provider. May be given more than once.
        #[arg(short = 'p', long = "provider")]
        providers: Vec<String>,

        /// Print the enabled providers and exit.
        #[arg(short = 'l', long)]
        list_providers: bool,
    },

    /// Print timeline entries, newest first.
    Timeline {
        /// Only entries of this kind (e.g. `track`, `bookmark`).
        #[arg(long)]
        kind: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbosity);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Update {
            providers,
            list_providers,
        } => {
            run_update(&cfg, providers, list_providers).await?;
        }
        Commands::Timeline { kind, limit } => {
            run_timeline(&cfg, kind.as_deref(), limit).await?;
        }
    }

    Ok(())
}

async fn run_update(cfg: &Config, selected: Vec<String>, list_providers: bool) -> Result<()> {
    let registry = ProviderRegistry::discover(cfg);
    let available = registry.enabled_names();

    if list_providers {
        println!("Available data providers:");
        for name in &available {
            println!("  {}", name);
        }
        return Ok(());
    }

    for name in &selected {
        if !available.contains(name) {
            bail!(
                "Invalid provider: '{}'. Valid providers: {}",
                name,
                available.join(", ")
            );
        }
    }

    let pool = db::connect(cfg).await?;
    migrate::apply(&pool).await?;
    let ctx = SyncContext::new(pool.clone(), Fetcher::http(&cfg.http)?);
    ctx.shutdown.listen_for_ctrl_c();

    let selection = if selected.is_empty() {
        None
    } else {
        Some(selected.as_slice())
    };
    let report = scheduler::run_update(&ctx, &registry, selection).await?;

    for (name, outcome) in &report.outcomes {
        match outcome {
            scheduler::ProviderOutcome::Completed => println!("{:<12} ok", name),
            scheduler::ProviderOutcome::Failed(msg) => println!("{:<12} failed: {}", name, msg),
        }
    }

    pool.close().await;
    Ok(())
}

async fn run_timeline(cfg: &Config, kind: Option<&str>, limit: i64) -> Result<()> {
    let kind = kind.map(RecordKind::from_str).transpose()?;
    let pool = db::connect(cfg).await?;
    let mut conn = pool.acquire().await?;

    let items = timeline::timeline(&mut conn, kind, limit).await?;
    for item in &items {
        println!("{}  {}", item.timestamp.format("%Y-%m-%d %H:%M"), item);
        if !item.url.is_empty() {
            println!("                  {}", item.url);
        }
    }

    drop(conn);
    pool.close().await;
    Ok(())
}
