//! oprpool - Main Entry Point
//!
//! Parses the command line, loads settings, and either launches the pool
//! or runs one of the offline payout commands.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info};
use tokio_util::sync::CancellationToken;

use oprpool_accounting::{calculate_payments, write_payments, Payment};
use oprpool_chain::HttpChainClient;
use oprpool_core::{FixedOracle, Sha256Hasher};
use oprpool_pegnet::DifficultyGrader;
use oprpool_storage::Store;

mod auth;
mod config;
mod engine;

use config::Settings;
use engine::PoolEngine;

#[derive(Parser)]
#[clap(name = "oprpool")]
#[clap(about = "A proportional-payout mining pool for oracle price record chains")]
struct Cli {
    /// Sets a custom config file
    #[clap(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v debug, -vv trace)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[clap(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the pool (the default)
    Run,
    /// Offline payout bookkeeping
    Payouts {
        #[clap(subcommand)]
        command: PayoutsCommands,
    },
    /// Manage registration invites
    Invite {
        #[clap(subcommand)]
        command: InviteCommands,
    },
}

#[derive(Subcommand)]
enum PayoutsCommands {
    /// Show what every user is owed beyond what has been paid
    Calculate,
    /// Record a broadcast payment batch from a receipt file
    Write {
        /// JSON receipt: the calculate output with entry hashes filled in
        #[clap(value_name = "FILE")]
        receipt: PathBuf,
    },
}

#[derive(Subcommand)]
enum InviteCommands {
    /// Create a single-use registration invite
    New {
        code: String,
    },
}

fn init_logging(settings: &Settings, verbose: u8) {
    let level = match verbose {
        0 => settings.app.loglevel.parse().unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .init();
}

fn main() {
    let cli = Cli::parse();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to load configuration: {}", e);
            process::exit(1);
        }
    };
    init_logging(&settings, cli.verbose);

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_pool(settings),
        Commands::Payouts { command } => match command {
            PayoutsCommands::Calculate => payouts_calculate(&settings),
            PayoutsCommands::Write { receipt } => payouts_write(&settings, &receipt),
        },
        Commands::Invite { command } => match command {
            InviteCommands::New { code } => invite_new(&settings, &code),
        },
    };

    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
}

fn open_store(settings: &Settings) -> Result<Arc<Store>, String> {
    Store::open(&settings.database.path)
        .map(Arc::new)
        .map_err(|e| format!("failed to open store at {}: {}", settings.database.path, e))
}

fn run_pool(settings: Settings) -> Result<(), String> {
    let runtime = tokio::runtime::Runtime::new().map_err(|e| e.to_string())?;
    runtime.block_on(async {
        let store = open_store(&settings)?;
        let chain = Arc::new(HttpChainClient::new(&settings.chain.endpoint));
        let oracle = Arc::new(FixedOracle {
            value: settings.oracle.fixed_price,
        });
        let hasher = Arc::new(Sha256Hasher);
        let grader = Arc::new(DifficultyGrader::new(hasher.clone()));

        let engine = Arc::new(
            PoolEngine::setup(&settings, store, chain, oracle, hasher, grader)
                .map_err(|e| e.to_string())?,
        );

        let cancel = CancellationToken::new();
        {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("gracefully closing");
                    cancel.cancel();
                }
            });
        }

        info!("oprpool started");
        // Give the teardown a bounded grace period after cancellation
        let run = engine.run(cancel.clone());
        tokio::select! {
            _ = run => {}
            _ = async {
                cancel.cancelled().await;
                tokio::time::sleep(std::time::Duration::from_secs(3)).await;
            } => {
                error!("took too long to close");
            }
        }
        Ok(())
    })
}

fn payouts_calculate(settings: &Settings) -> Result<(), String> {
    let store = open_store(settings)?;
    let payments = calculate_payments(&store).map_err(|e| e.to_string())?;
    if payments.is_empty() {
        println!("nothing outstanding");
        return Ok(());
    }

    println!(
        "{:<20} {:>16} {:>16} {:>16}  {}",
        "user", "owed", "paid", "due", "address"
    );
    for p in &payments {
        println!(
            "{:<20} {:>16} {:>16} {:>16}  {}",
            p.user_id, p.total_owed, p.total_paid, p.payment_amount, p.payout_address
        );
    }
    println!(
        "\n{}",
        serde_json::to_string_pretty(&payments).map_err(|e| e.to_string())?
    );
    Ok(())
}

fn payouts_write(settings: &Settings, receipt: &std::path::Path) -> Result<(), String> {
    let store = open_store(settings)?;
    let raw = std::fs::read_to_string(receipt)
        .map_err(|e| format!("failed to read {}: {}", receipt.display(), e))?;
    let payments: Vec<Payment> =
        serde_json::from_str(&raw).map_err(|e| format!("bad receipt file: {}", e))?;

    write_payments(&store, &payments).map_err(|e| e.to_string())?;
    info!("recorded {} payments", payments.len());
    Ok(())
}

fn invite_new(settings: &Settings, code: &str) -> Result<(), String> {
    let store = open_store(settings)?;
    store.new_invite_code(code).map_err(|e| e.to_string())?;
    println!("invite created: {}", code);
    Ok(())
}
