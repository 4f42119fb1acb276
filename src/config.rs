//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys, signing keys) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.
//!
//! The budget section is the *single* capital authority. A secondary
//! override channel (`VANTAGE_GLOBAL_BUDGET`, typically injected by a
//! process manager) is recognised only to be checked: if it disagrees
//! with the TOML value, startup fails with a configuration conflict.
//! It is never honoured, looser or tighter.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::str::FromStr;

use crate::types::{AssetRef, EngineError, StationRef};

/// Env var a process-manager layer may set; checked against the TOML cap.
pub const BUDGET_OVERRIDE_ENV: &str = "VANTAGE_GLOBAL_BUDGET";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub budget: BudgetConfig,
    pub scheduler: SchedulerConfig,
    pub model: ModelConfig,
    pub risk: RiskConfig,
    pub feed: FeedConfig,
    pub venues: VenuesConfig,
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
    pub resolution: ResolutionConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    pub name: String,
    pub dry_run: bool,
    /// No network operation may block longer than this.
    pub network_timeout_secs: u64,
    pub state_file: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BudgetConfig {
    pub global_cap: Decimal,
    pub per_market_cap: Decimal,
    /// Requested reservation per qualifying opportunity, before the
    /// ledger applies its caps and the per-tick divisor.
    pub stake_per_trade: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    pub baseline_interval_secs: u64,
    pub snipe_interval_secs: u64,
    pub spike_interval_secs: u64,
    /// Daily market-open times, "HH:MM" UTC.
    #[serde(default)]
    pub snipe_open_times_utc: Vec<String>,
    pub snipe_window_secs: u64,
    /// Underlying move (fraction, e.g. 0.02 = 2%) within one tick that
    /// triggers spike mode.
    pub spike_threshold: f64,
    pub spike_duration_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub threshold: ThresholdModelConfig,
    pub barrier: BarrierModelConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ThresholdModelConfig {
    /// Forecast must clear the strike by at least this many °F.
    pub safety_margin_f: f64,
    /// Bucket midpoint proximity bound, °F.
    pub proximity_bound_f: f64,
    /// Fixed GTC limit price for threshold/bucket orders.
    pub limit_price: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BarrierModelConfig {
    pub min_edge: f64,
    /// Tradable band: skip near-zero and near-par prices.
    pub min_price: Decimal,
    pub max_price: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RiskConfig {
    /// Mandatory horizon cap: skip markets expiring further out.
    pub max_days_to_expiry: i64,
    pub min_lot: u64,
    pub max_order_attempts: u32,
    pub order_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub forecast_ttl_secs: i64,
    pub volatility_ttl_secs: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VenuesConfig {
    pub kalshi: KalshiConfig,
    pub polymarket: PolymarketConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KalshiConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key_env: String,
    /// Env var holding the PEM-encoded RSA private key.
    pub private_key_env: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolymarketConfig {
    pub enabled: bool,
    pub gamma_url: String,
    pub clob_url: String,
    /// Env var holding the hex-encoded secp256k1 private key.
    pub private_key_env: String,
    /// Env var holding the egress proxy URL. The venue geo-blocks the
    /// operator's region; all requests are relayed through this proxy.
    pub egress_proxy_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InstanceConfig {
    pub name: String,
    pub venue: String,
    pub categories: Vec<String>,
}

/// Resolution-source mappings: which station / exchange pair each venue
/// series settles against. Configuration, not code — and validated at
/// startup because a wrong coordinate silently invalidates the safety
/// margin.
#[derive(Debug, Deserialize, Clone)]
pub struct ResolutionConfig {
    #[serde(default)]
    pub stations: HashMap<String, StationRef>,
    #[serde(default)]
    pub assets: HashMap<String, AssetRef>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AlertsConfig {
    pub telegram_bot_token_env: Option<String>,
    pub telegram_chat_id_env: Option<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Startup validation. Checks the budget authority and the
    /// resolution-source mappings for every enabled venue.
    pub fn validate(&self) -> Result<()> {
        self.check_budget_authority(std::env::var(BUDGET_OVERRIDE_ENV).ok().as_deref())?;

        if self.budget.per_market_cap > self.budget.global_cap {
            anyhow::bail!(
                "per_market_cap ({}) exceeds global_cap ({})",
                self.budget.per_market_cap,
                self.budget.global_cap
            );
        }

        for inst in &self.instances {
            match inst.venue.as_str() {
                "kalshi" => {
                    if !self.venues.kalshi.enabled {
                        anyhow::bail!("Instance {} targets disabled venue kalshi", inst.name);
                    }
                    if self.resolution.stations.is_empty() {
                        anyhow::bail!(
                            "Instance {} trades weather markets but [resolution.stations] is empty",
                            inst.name
                        );
                    }
                }
                "polymarket" => {
                    if !self.venues.polymarket.enabled {
                        anyhow::bail!("Instance {} targets disabled venue polymarket", inst.name);
                    }
                    if self.resolution.assets.is_empty() {
                        anyhow::bail!(
                            "Instance {} trades barrier markets but [resolution.assets] is empty",
                            inst.name
                        );
                    }
                }
                other => anyhow::bail!("Instance {} names unknown venue {other}", inst.name),
            }
        }

        if self.risk.max_days_to_expiry <= 0 {
            anyhow::bail!("max_days_to_expiry must be positive (unbounded horizon is forbidden)");
        }

        Ok(())
    }

    /// The TOML budget section is the sole authority. A secondary value
    /// (process-manager env) may only agree; disagreement is refused —
    /// this is the failure where a looser cap once silently won.
    pub fn check_budget_authority(&self, override_value: Option<&str>) -> Result<(), EngineError> {
        let Some(raw) = override_value else {
            return Ok(());
        };
        let parsed = Decimal::from_str(raw.trim()).map_err(|_| {
            EngineError::ConfigConflict(format!(
                "{BUDGET_OVERRIDE_ENV} is set but not a number: {raw:?}"
            ))
        })?;
        if parsed != self.budget.global_cap {
            return Err(EngineError::ConfigConflict(format!(
                "{BUDGET_OVERRIDE_ENV}={parsed} disagrees with config.toml global_cap={}; \
                 refusing to start until reconciled",
                self.budget.global_cap
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
