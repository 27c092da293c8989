//! Position-exit guard
//!
//! Watches the last traded price of a configurable set of instruments
//! and places protective limit sells when price crosses a stop-loss
//! or take-profit threshold, so nobody has to watch the charts.

mod api;
mod bot;
mod guard;
mod rules;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::{BittrexClient, ExchangeApi};
use crate::bot::{Bot, BotConfig};
use crate::rules::RuleSet;

/// Exit guard CLI.
#[derive(Parser)]
#[command(name = "exitguard")]
#[command(about = "Stop-loss / take-profit guard for resting positions", long_about = None)]
struct Cli {
    /// Rules file with per-instrument exit parameters
    #[arg(short, long, default_value = "rules.json")]
    rules: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the exit guard loop
    Run {
        /// Polling interval in seconds
        #[arg(short, long, default_value = "2")]
        interval: u64,

        /// Dry run (simulate placements and cancels)
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate the rules file and show what would be monitored
    Check,

    /// Fetch the current ticker for an instrument
    Price {
        /// Instrument identifier, e.g. BTC-XYZ
        instrument: String,
    },

    /// List open orders for an instrument
    Orders {
        /// Instrument identifier, e.g. BTC-XYZ
        instrument: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { interval, dry_run } => {
            // Fail fast on an unreadable rules file; per-entry problems
            // are tolerated later, tick by tick.
            let rules = RuleSet::load(&cli.rules)?;
            if rules.is_empty() {
                println!(
                    "No instruments in {}. Add one and re-run.",
                    cli.rules.display()
                );
                return Ok(());
            }

            let (exchange, dry_run) = match BittrexClient::from_env() {
                Ok(client) => (client, dry_run),
                Err(e) => {
                    if !dry_run {
                        warn!("Exchange credentials not configured: {}. Forcing dry-run.", e);
                    }
                    (BittrexClient::public()?, true)
                }
            };

            let config = BotConfig {
                rules_path: cli.rules.clone(),
                poll_interval_secs: interval,
                dry_run,
            };

            println!("\n=== Exit Guard ===");
            println!("Rules file:       {}", cli.rules.display());
            println!("Instruments:      {}", rules.len());
            println!("Polling interval: {}s", interval);
            println!(
                "Mode:             {}",
                if dry_run {
                    "DRY RUN (no real orders)"
                } else {
                    "LIVE ORDERS"
                }
            );
            println!("\nPress Ctrl+C to stop.\n");

            let mut bot = Bot::new(config, exchange);
            if let Err(e) = bot.run().await {
                tracing::error!(error = %e, "Guard error");
            }
        }

        Commands::Check => {
            let rules = RuleSet::load(&cli.rules)?;
            info!(instruments = rules.len(), "Rules file parsed");

            println!(
                "\n{:<12} {:>14} {:>14} {:>14} {:>14} {:>12}",
                "INSTRUMENT", "STOP-TRIGGER", "STOP-LIMIT", "TARGET-TRIGGER", "TARGET", "QUANTITY"
            );
            println!("{}", "-".repeat(86));

            for (instrument, rule) in rules.iter() {
                println!(
                    "{:<12} {:>14} {:>14} {:>14} {:>14} {:>12}",
                    instrument,
                    rule.stop_trigger,
                    rule.stop_limit,
                    rule.target_trigger,
                    rule.target,
                    rule.quantity
                );
            }

            if rules.is_empty() {
                println!("(no instruments)");
            }
        }

        Commands::Price { instrument } => {
            let client = BittrexClient::from_env().or_else(|_| BittrexClient::public())?;
            let ticker = client.ticker(&instrument).await?;
            println!(
                "{}: bid {} / ask {} / last {}",
                instrument, ticker.bid, ticker.ask, ticker.last
            );
        }

        Commands::Orders { instrument } => {
            let client = BittrexClient::from_env()?;
            let orders = client.open_orders(&instrument).await?;

            if orders.is_empty() {
                println!("No open orders for {}", instrument);
                return Ok(());
            }

            println!(
                "\n{:<38} {:<6} {:>14} {:>14} {:>14}",
                "ORDER ID", "SIDE", "QUANTITY", "REMAINING", "LIMIT"
            );
            println!("{}", "-".repeat(92));

            for order in orders {
                println!(
                    "{:<38} {:<6} {:>14} {:>14} {:>14}",
                    order.id,
                    format!("{:?}", order.side),
                    order.quantity,
                    order.quantity_remaining,
                    order.limit
                );
            }
        }
    }

    Ok(())
}
