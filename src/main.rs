//! Vault Rebalancer Bot
//!
//! Keeps a leveraged vault inside a configured collateral-ratio band:
//! - Repays debt when the ratio falls below the minimum
//! - Borrows and provides liquidity when it rises above the maximum
//! - Compounds idle native balance per the configured mode
//!
//! Runs read-only against an Ocean-style endpoint; submitted operations go
//! through the dry-run submitter until an external signer is wired in.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rebalancer_core::{Engine, SchedulerState, TickOutcome};
use rebalancer_ledger::{
    BlockReader, ConfigMessage, DryRunSubmitter, ObservedConfig, OceanClient, StaticConfigSource,
};
use rebalancer_notify::{LogNotifier, Notifier, TelegramNotifier};

/// Environment variable names.
mod env {
    pub const OCEAN_URL: &str = "OCEAN_URL";
    pub const WALLET_ADDRESS: &str = "WALLET_ADDRESS";
    pub const BOT_CONFIG_PATH: &str = "BOT_CONFIG_PATH";
    pub const TELEGRAM_TOKEN: &str = "TELEGRAM_TOKEN";
    pub const TELEGRAM_CHAT_ID: &str = "TELEGRAM_CHAT_ID";
    pub const TICK_INTERVAL_SECS: &str = "TICK_INTERVAL_SECS";
}

const DEFAULT_TICK_INTERVAL_SECS: u64 = 15;

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rebalancer_core=debug")),
        )
        .init();

    let config = load_config()?;
    let interval = config.tick_interval_secs;
    let (engine, mut state) = initialize_components(config).await?;

    info!(interval_secs = interval, "Starting main loop");
    run_loop(engine, &mut state, interval).await;

    Ok(())
}

/// Process configuration loaded from the environment.
struct Config {
    ocean_url: Option<String>,
    wallet_address: String,
    bot_config_path: String,
    telegram: Option<(String, String)>,
    tick_interval_secs: u64,
}

fn load_config() -> Result<Config> {
    let get_env = |name: &str| -> Result<String> {
        std::env::var(name).map_err(|_| anyhow::anyhow!("Missing env var: {}", name))
    };

    let telegram = match (get_env(env::TELEGRAM_TOKEN), get_env(env::TELEGRAM_CHAT_ID)) {
        (Ok(token), Ok(chat_id)) => Some((token, chat_id)),
        _ => None,
    };

    Ok(Config {
        ocean_url: get_env(env::OCEAN_URL).ok(),
        wallet_address: get_env(env::WALLET_ADDRESS)?,
        bot_config_path: get_env(env::BOT_CONFIG_PATH)
            .unwrap_or_else(|_| "rebalancer.toml".to_string()),
        telegram,
        tick_interval_secs: get_env(env::TICK_INTERVAL_SECS)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TICK_INTERVAL_SECS),
    })
}

async fn initialize_components(config: Config) -> Result<(Engine, SchedulerState)> {
    info!("Initializing components...");

    let mut ocean = OceanClient::new(config.wallet_address.clone());
    if let Some(url) = &config.ocean_url {
        ocean = ocean.with_base_url(url);
    }
    let ocean = Arc::new(ocean);

    // Bootstrap is the one fatal stage: an unreachable ledger here means
    // the process cannot do anything useful.
    let height = ocean.block_height().await?;
    info!(height, wallet = %config.wallet_address, "Ledger reachable");

    let notifier: Arc<dyn Notifier> = match &config.telegram {
        Some((token, chat_id)) => {
            info!("Telegram notifications enabled");
            Arc::new(TelegramNotifier::new(token.clone(), chat_id.clone()))
        }
        None => {
            info!("No Telegram credentials, logging notifications only");
            Arc::new(LogNotifier::new())
        }
    };

    let config_source = Arc::new(load_bot_configuration(&config.bot_config_path, height)?);
    let submitter = Arc::new(DryRunSubmitter::new());

    let engine = Engine::new(
        ocean.clone(),
        ocean.clone(),
        ocean.clone(),
        ocean.clone(),
        ocean.clone(),
        submitter,
        config_source,
        notifier,
    );

    info!("All components initialized");
    Ok((engine, SchedulerState::default()))
}

/// Read the bot configuration file and stamp it as observed at the current
/// chain tip.
fn load_bot_configuration(path: &str, height: u64) -> Result<StaticConfigSource> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read bot configuration {}: {}", path, e))?;
    let message: ConfigMessage = toml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("malformed bot configuration {}: {}", path, e))?;
    info!(path, vault = %message.vault_id, "Bot configuration loaded");
    Ok(StaticConfigSource::new(ObservedConfig {
        message,
        block_height: height,
        block_time: chrono::Utc::now().timestamp(),
    }))
}

async fn run_loop(engine: Engine, state: &mut SchedulerState, interval_secs: u64) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        match engine.tick(state).await {
            Ok(TickOutcome::NoNewBlock) => {}
            Ok(outcome) => info!(?outcome, height = state.last_block_height, "tick complete"),
            // a failed tick is logged and retried on the next interval
            Err(e) => error!(error = %e, "tick failed"),
        }
    }
}

/// Print startup banner.
fn print_banner() {
    println!(
        r#"
    ╦═╗┌─┐┌┐ ┌─┐┬  ┌─┐┌┐┌┌─┐┌─┐┬─┐
    ╠╦╝├┤ ├┴┐├─┤│  ├─┤││││  ├┤ ├┬┘
    ╩╚═└─┘└─┘┴ ┴┴─┘┴ ┴┘└┘└─┘└─┘┴└─
    Vault Rebalancer v0.1.0
    "#
    );
}
