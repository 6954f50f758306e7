//! Diagnostic CLI for a tier store data directory.
//!
//! Loads configuration from (in precedence order): defaults, config file, environment variables
//! (`TIERSTORE_*`), and CLI flags. Prints tier metadata and record dumps.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tierstore::config::{format_duration_ms, load_store_config};
use tierstore::{StoreConfig, TierError, TierPattern, TierStore};

// ---------- CLI ----------

/// Inspect tiered time-series aggregation files.
#[derive(Parser, Debug)]
#[command(name = "tierctl", version, about)]
pub struct Cli {
    /// Path to config file (TOML). If omitted, `tierstore.toml` is loaded when present.
    #[arg(long, env = "TIERSTORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override data directory (tier .data/.index files).
    #[arg(long, env = "TIERSTORE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Do not load any config file; use defaults + env + CLI only.
    #[arg(long, default_value_t = false)]
    pub no_config: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load and validate config, print the effective data_dir and tiers, then exit.
    ValidateConfig,
    /// Print metadata for every tier.
    Tiers,
    /// Print one metric record.
    Dump {
        /// Tier name.
        #[arg(long)]
        tier: String,
        /// Metric index within the tier.
        #[arg(long)]
        index: u64,
        /// Include every populated period slot.
        #[arg(long, default_value_t = false)]
        periods: bool,
    },
}

fn load_config(cli: &Cli) -> Result<StoreConfig, TierError> {
    let mut cfg = load_store_config(cli.config.as_deref(), !cli.no_config)?;
    if let Some(ref d) = cli.data_dir {
        cfg.data_dir = d.clone();
    }
    Ok(cfg)
}

fn run(cli: Cli) -> Result<(), TierError> {
    let cfg = load_config(&cli)?;

    match cli.command {
        Command::ValidateConfig => {
            println!("data_dir={}", cfg.data_dir.display());
            println!("lock_stripes={}", cfg.lock_stripes);
            for spec in &cfg.tiers {
                let pattern = TierPattern::parse(&spec.pattern)?;
                println!(
                    "tier={} pattern={} period={} capacity={}",
                    spec.name,
                    spec.pattern,
                    format_duration_ms(pattern.period_duration_ms),
                    pattern.capacity()
                );
            }
        }
        Command::Tiers => {
            let store = TierStore::open(cfg)?;
            for meta in store.metadata() {
                println!("{}", meta);
            }
        }
        Command::Dump {
            tier,
            index,
            periods,
        } => {
            let store = TierStore::open(cfg)?;
            let t = store
                .tier(&tier)
                .ok_or_else(|| TierError::Config(format!("unknown tier {:?}", tier)))?;
            println!("{}", t.dump(index, periods)?);
        }
    }
    Ok(())
}

// ---------- Main ----------

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tierctl: {}", e);
            ExitCode::FAILURE
        }
    }
}
