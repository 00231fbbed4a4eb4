//! ValutaTrade CLI
//!
//! Refreshes, inspects and resolves exchange rates from the local cache.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;

use config::AppConfig;

/// ValutaTrade exchange rate CLI
#[derive(Parser, Debug)]
#[command(name = "valutatrade")]
#[command(about = "ValutaTrade exchange rate cache and updater")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll rate providers and merge their rates into the cache
    UpdateRates {
        /// Only poll this source (coingecko, exchangerate or stub)
        #[arg(long)]
        source: Option<String>,
    },

    /// List cached rates
    ShowRates {
        /// Only pairs with this base currency
        #[arg(long)]
        currency: Option<String>,

        /// Only pairs quoted in this currency
        #[arg(long)]
        base: Option<String>,

        /// Show the N highest rates
        #[arg(long)]
        top: Option<usize>,
    },

    /// Resolve the rate between two currencies
    GetRate {
        /// Currency to convert from
        #[arg(long = "from")]
        from: String,

        /// Currency to convert to
        #[arg(long)]
        to: String,
    },
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref())?;
    init_tracing(&config.log_level, args.json_logs || config.log_json);

    debug!(
        data_dir = %config.rates.data_dir.display(),
        ttl_seconds = config.rates.rates_ttl_seconds,
        "Configuration loaded"
    );

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let rates = &config.rates;

    let status = match &args.command {
        Command::UpdateRates { source } => {
            info!("Starting rates update");
            commands::update_rates(rates, source.as_deref(), &mut out).await?
        }
        Command::ShowRates {
            currency,
            base,
            top,
        } => {
            commands::show_rates(rates, currency.as_deref(), base.as_deref(), *top, &mut out)
                .await?
        }
        Command::GetRate { from, to } => commands::get_rate(rates, from, to, &mut out).await?,
    };

    Ok(status.into())
}
