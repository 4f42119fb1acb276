//! VANTAGE — Automated Outcome-Market Edge Engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores position state from disk, and runs one strategy instance per
//! configured venue/category pair with graceful drain on shutdown.
//!
//! Usage:
//!   vantage              run the engine
//!   vantage drain        cancel all resting orders and exit
//!   vantage drain --liquidate
//!                        also close open positions at best bid

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use vantage::alerts::{self, AlertSink};
use vantage::config::{AppConfig, InstanceConfig};
use vantage::engine::executor::{ExecutionConfig, ExecutionEngine};
use vantage::engine::ledger::{BudgetLedger, LedgerCaps};
use vantage::engine::positions::PositionBook;
use vantage::engine::scanner::OpportunityScanner;
use vantage::engine::scheduler::Scheduler;
use vantage::engine::StrategyInstance;
use vantage::feed::{FeedSource, MarketDataFeed};
use vantage::storage;
use vantage::types::MarketCategory;
use vantage::venues::kalshi::KalshiClient;
use vantage::venues::polymarket::PolymarketClient;
use vantage::venues::VenueClient;

const BANNER: &str = r#"
 __     ___    _   _ _____  _    ____ _____
 \ \   / / \  | \ | |_   _|/ \  / ___| ____|
  \ \ / / _ \ |  \| | | | / _ \| |  _|  _|
   \ V / ___ \| |\  | | |/ ___ \ |_| | |___
    \_/_/   \_\_| \_| |_/_/   \_\____|_____|

  Automated Outcome-Market Edge Engine
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML; this also enforces the budget
    // single-authority check and the resolution-mapping validation.
    let cfg = AppConfig::load("config.toml")?;

    init_logging();
    println!("{BANNER}");

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("drain") => {
            let liquidate = args.iter().any(|a| a == "--liquidate");
            run_drain(&cfg, liquidate).await
        }
        Some(other) => {
            anyhow::bail!("Unknown command: {other} (expected nothing or `drain`)")
        }
        None => run_engine(&cfg).await,
    }
}

/// Normal operation: one strategy loop per configured instance.
async fn run_engine(cfg: &AppConfig) -> Result<()> {
    info!(
        name = %cfg.engine.name,
        dry_run = cfg.engine.dry_run,
        global_cap = %cfg.budget.global_cap,
        instances = cfg.instances.len(),
        "VANTAGE starting up"
    );

    if cfg.instances.is_empty() {
        warn!("No [[instances]] configured; nothing to do");
        return Ok(());
    }

    let ledger = Arc::new(BudgetLedger::new(LedgerCaps {
        global_cap: cfg.budget.global_cap,
        per_market_cap: cfg.budget.per_market_cap,
    }));
    let feed: Arc<dyn FeedSource> =
        Arc::new(MarketDataFeed::new(&cfg.feed).context("Failed to build market data feed")?);
    let alert_sink = alerts::spawn_sink(&cfg.alerts);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::new();
    for instance_cfg in &cfg.instances {
        let instance = build_instance(
            cfg,
            instance_cfg,
            Arc::clone(&ledger),
            Arc::clone(&feed),
            alert_sink.clone(),
        )?;
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(instance.run(rx)));
    }

    info!("All instances running. Press Ctrl+C to drain and stop.");
    tokio::signal::ctrl_c().await.context("Signal listener failed")?;
    info!("Shutdown requested; draining instances");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Instance task panicked");
        }
    }

    info!("VANTAGE shut down cleanly.");
    Ok(())
}

/// The emergency procedure as a first-class verb: cancel everything,
/// optionally liquidate, then exit.
async fn run_drain(cfg: &AppConfig, liquidate: bool) -> Result<()> {
    warn!(liquidate, "Drain requested");

    let ledger = Arc::new(BudgetLedger::new(LedgerCaps {
        global_cap: cfg.budget.global_cap,
        per_market_cap: cfg.budget.per_market_cap,
    }));
    let feed: Arc<dyn FeedSource> =
        Arc::new(MarketDataFeed::new(&cfg.feed).context("Failed to build market data feed")?);
    let alert_sink = alerts::spawn_sink(&cfg.alerts);

    for instance_cfg in &cfg.instances {
        let mut instance = build_instance(
            cfg,
            instance_cfg,
            Arc::clone(&ledger),
            Arc::clone(&feed),
            alert_sink.clone(),
        )?;
        if let Err(e) = instance.drain(liquidate).await {
            error!(instance = %instance_cfg.name, error = %e, "Drain failed");
        }
    }

    info!("Drain complete.");
    Ok(())
}

/// Wire one venue/category pair into a runnable instance.
fn build_instance(
    cfg: &AppConfig,
    instance_cfg: &InstanceConfig,
    ledger: Arc<BudgetLedger>,
    feed: Arc<dyn FeedSource>,
    alerts: AlertSink,
) -> Result<StrategyInstance> {
    let venue: Arc<dyn VenueClient> = match instance_cfg.venue.as_str() {
        "kalshi" => Arc::new(KalshiClient::new(
            &cfg.venues.kalshi,
            cfg.resolution.stations.clone(),
            cfg.engine.network_timeout_secs,
        )?),
        "polymarket" => Arc::new(PolymarketClient::new(
            &cfg.venues.polymarket,
            cfg.resolution.assets.clone(),
            cfg.engine.network_timeout_secs,
        )?),
        other => anyhow::bail!("Unknown venue {other} for instance {}", instance_cfg.name),
    };

    let categories = instance_cfg
        .categories
        .iter()
        .map(|c| MarketCategory::from_str(c))
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("Bad category for instance {}", instance_cfg.name))?;

    let scanner = OpportunityScanner::new(
        Arc::clone(&venue),
        Arc::clone(&feed),
        categories,
        cfg.model.clone(),
        cfg.risk.max_days_to_expiry,
    );

    let scheduler = Scheduler::new(&cfg.scheduler)
        .with_context(|| format!("Bad scheduler config for instance {}", instance_cfg.name))?;

    let executor = ExecutionEngine::new(
        Arc::clone(&venue),
        ExecutionConfig {
            min_lot: cfg.risk.min_lot,
            threshold_limit_price: cfg.model.threshold.limit_price,
            max_order_attempts: cfg.risk.max_order_attempts,
            order_timeout_secs: cfg.risk.order_timeout_secs,
            dry_run: cfg.engine.dry_run,
        },
    );

    // Each instance keeps its own book file; the venue remains the
    // authority on fills either way.
    let state_file = format!("{}.{}.json", cfg.engine.state_file.trim_end_matches(".json"), instance_cfg.name);
    let book = storage::load_book(Some(&state_file))?.unwrap_or_else(PositionBook::new);

    Ok(StrategyInstance::new(
        instance_cfg.name.clone(),
        venue,
        feed,
        scanner,
        scheduler,
        ledger,
        executor,
        book,
        alerts,
        cfg.budget.stake_per_trade,
        state_file,
    ))
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vantage=info"));

    let json_logging = std::env::var("VANTAGE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
