//! Fair-value models.
//!
//! Two structurally different strategies share one pipeline, so the
//! model layer is a tagged dispatch on `Market::category()` rather than
//! an inheritance hierarchy: a deterministic margin gate for
//! threshold/bucket weather markets, and a barrier-touch probability
//! for crypto markets. Each variant is a pure function over explicit
//! inputs — no clocks, no network, no side effects.

pub mod barrier;
pub mod threshold;

use crate::config::ModelConfig;
use crate::types::{Contract, FairValue, Market, SkipReason, TradeDecision};
use rust_decimal::Decimal;

/// External inputs a model needs for one market, gathered by the scanner.
#[derive(Debug, Clone, Copy)]
pub enum ModelInputs {
    /// Forecast daily high for the market's station, °F.
    Forecast { high_f: f64 },
    /// Spot, annualized realized volatility, and time to expiry (years)
    /// for the market's asset.
    Barrier { spot: f64, sigma: f64, t_years: f64 },
}

/// A model verdict: fair value, decision, and (for probability models)
/// the edge over the acted-on price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scored {
    pub fair: FairValue,
    pub decision: TradeDecision,
    pub edge: Option<f64>,
    /// The ask on the side the decision concerns, if quoted.
    pub price: Option<Decimal>,
}

impl Scored {
    pub fn skip(fair: FairValue, reason: SkipReason) -> Self {
        Self {
            fair,
            decision: TradeDecision::Skip(reason),
            edge: None,
            price: None,
        }
    }
}

/// Score one market with the category-matched model.
///
/// `in_snipe_window` gates between-bucket entries: stale already-repriced
/// buckets are never chased outside the window.
pub fn score(
    market: &Market,
    inputs: &ModelInputs,
    in_snipe_window: bool,
    cfg: &ModelConfig,
) -> Scored {
    match (&market.contract, inputs) {
        (Contract::Threshold { strike_f, direction }, ModelInputs::Forecast { high_f }) => {
            threshold::evaluate_threshold(
                *high_f,
                *strike_f,
                *direction,
                &market.quote,
                &cfg.threshold,
            )
        }
        (Contract::Between { floor_f, cap_f }, ModelInputs::Forecast { high_f }) => {
            threshold::evaluate_between(
                *high_f,
                *floor_f,
                *cap_f,
                in_snipe_window,
                &market.quote,
                &cfg.threshold,
            )
        }
        (
            Contract::BarrierReach { barrier } | Contract::BarrierDip { barrier },
            ModelInputs::Barrier { spot, sigma, t_years },
        ) => barrier::evaluate(
            market.category(),
            *barrier,
            *spot,
            *sigma,
            *t_years,
            &market.quote,
            &cfg.barrier,
        ),
        // Wrong input kind for the contract — treat as missing data.
        _ => Scored::skip(FairValue::Undefined, SkipReason::DataUnavailable),
    }
}
