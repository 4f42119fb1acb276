//! Barrier-touch probability for crypto touch/no-touch markets.
//!
//! Models the underlying as a driftless geometric Brownian motion and
//! prices the contract as the probability its running extremum crosses
//! the barrier before expiry (reflection principle):
//!
//!   reach (H > S):  P = 2·Φ(−ln(H/S) / (σ√T))
//!   dip   (L < S):  P = 2·Φ( ln(L/S) / (σ√T))
//!
//! σ is the annualized trailing 30-day log-return standard deviation
//! supplied by the feed. `T ≤ 0` or `σ ≤ 0` leaves the model undefined
//! and short-circuits to a skip — never a divide-by-zero.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::config::BarrierModelConfig;
use crate::model::Scored;
use crate::types::{FairValue, MarketCategory, Quote, Side, SkipReason, TradeDecision};

/// Probability the underlying touches `barrier` before `t_years` elapse.
///
/// Returns `None` when the model is undefined (non-positive σ, T, spot,
/// or barrier). A barrier already on the wrong side of spot has trivially
/// been touched: probability 1.
pub fn touch_probability(
    category: MarketCategory,
    spot: f64,
    barrier: f64,
    sigma: f64,
    t_years: f64,
) -> Option<f64> {
    if !(sigma > 0.0) || !(t_years > 0.0) || !(spot > 0.0) || !(barrier > 0.0) {
        return None;
    }

    let denom = sigma * t_years.sqrt();
    let p = match category {
        MarketCategory::BarrierReach => {
            if barrier <= spot {
                return Some(1.0);
            }
            2.0 * normal_cdf(-(barrier / spot).ln() / denom)
        }
        MarketCategory::BarrierDip => {
            if barrier >= spot {
                return Some(1.0);
            }
            2.0 * normal_cdf((barrier / spot).ln() / denom)
        }
        _ => return None,
    };

    Some(p.clamp(0.0, 1.0))
}

/// Score a barrier market against its quote.
///
/// Edge is `P − ask(yes)` for buy-yes or `(1−P) − ask(no)` for buy-no;
/// the better side is taken. The acted-on price must sit inside the
/// tradable band — near-zero and near-par contracts carry execution
/// risk out of proportion to the quoted edge.
pub fn evaluate(
    category: MarketCategory,
    barrier: f64,
    spot: f64,
    sigma: f64,
    t_years: f64,
    quote: &Quote,
    cfg: &BarrierModelConfig,
) -> Scored {
    let Some(p) = touch_probability(category, spot, barrier, sigma, t_years) else {
        return Scored::skip(FairValue::Undefined, SkipReason::ModelUndefined);
    };
    let fair = FairValue::Probability(p);

    // Candidate edges per buyable side.
    let mut best: Option<(Side, Decimal, f64)> = None;
    for side in [Side::Yes, Side::No] {
        let Some(ask) = quote.ask_for(side) else { continue };
        let fair_side = match side {
            Side::Yes => p,
            Side::No => 1.0 - p,
        };
        let edge = fair_side - ask.to_f64().unwrap_or(1.0);
        if best.map_or(true, |(_, _, e)| edge > e) {
            best = Some((side, ask, edge));
        }
    }

    let Some((side, ask, edge)) = best else {
        return Scored::skip(fair, SkipReason::NoQuote);
    };

    if edge < cfg.min_edge {
        return Scored {
            fair,
            decision: TradeDecision::Skip(SkipReason::InsufficientEdge),
            edge: Some(edge),
            price: Some(ask),
        };
    }
    if ask < cfg.min_price || ask > cfg.max_price {
        return Scored {
            fair,
            decision: TradeDecision::Skip(SkipReason::OutsidePriceBand),
            edge: Some(edge),
            price: Some(ask),
        };
    }

    Scored {
        fair,
        decision: match side {
            Side::Yes => TradeDecision::BuyYes,
            Side::No => TradeDecision::BuyNo,
        },
        edge: Some(edge),
        price: Some(ask),
    }
}

// ---------------------------------------------------------------------------
// Normal CDF (Abramowitz & Stegun 26.2.17)
// ---------------------------------------------------------------------------

/// Standard normal CDF via the A&S rational approximation.
/// Maximum error < 7.5e-8 across all z.
fn normal_cdf(z: f64) -> f64 {
    if z < -8.0 {
        return 0.0;
    }
    if z > 8.0 {
        return 1.0;
    }
    if z < 0.0 {
        return 1.0 - normal_cdf(-z);
    }

    const B0: f64 = 0.2316419;
    const B1: f64 = 0.319381530;
    const B2: f64 = -0.356563782;
    const B3: f64 = 1.781477937;
    const B4: f64 = -1.821255978;
    const B5: f64 = 1.330274429;

    let t = 1.0 / (1.0 + B0 * z);
    let t2 = t * t;
    let t3 = t2 * t;
    let t4 = t3 * t;
    let t5 = t4 * t;

    let poly = B1 * t + B2 * t2 + B3 * t3 + B4 * t4 + B5 * t5;
    let pdf = (-0.5 * z * z).exp() / (2.0 * std::f64::consts::PI).sqrt();

    1.0 - pdf * poly
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
