//! Deterministic margin gate for temperature threshold/bucket markets.
//!
//! The thesis: a tail market whose strike the forecast clears by more
//! than the safety margin resolves YES with near certainty, so the gate
//! is a pure pass/fail on forecast distance — not a probability. The
//! default 5 °F margin is roughly double the typical forecast-vs-actual
//! divergence and is an explicit, auditable tolerance.

use rust_decimal::Decimal;

use crate::config::ThresholdModelConfig;
use crate::model::Scored;
use crate::types::{FairValue, Quote, SkipReason, ThresholdDirection, TradeDecision};

/// Forecast margin over a threshold strike, °F.
///
/// Positive means the forecast is on the winning side of the strike.
pub fn margin(forecast_high_f: f64, strike_f: f64, direction: ThresholdDirection) -> f64 {
    match direction {
        ThresholdDirection::AtOrAbove => forecast_high_f - strike_f,
        ThresholdDirection::AtOrBelow => strike_f - forecast_high_f,
    }
}

/// Distance from the forecast to a bucket's midpoint, °F.
pub fn proximity(forecast_high_f: f64, floor_f: f64, cap_f: f64) -> f64 {
    let midpoint = (floor_f + cap_f) / 2.0;
    (forecast_high_f - midpoint).abs()
}

/// Gate a tail (at-or-above / at-or-below) market.
pub fn evaluate_threshold(
    forecast_high_f: f64,
    strike_f: f64,
    direction: ThresholdDirection,
    quote: &Quote,
    cfg: &ThresholdModelConfig,
) -> Scored {
    let m = margin(forecast_high_f, strike_f, direction);
    let pass = m >= cfg.safety_margin_f;
    let fair = FairValue::Gate { pass, margin_f: m };

    if !pass {
        return Scored::skip(fair, SkipReason::BelowSafetyMargin);
    }

    Scored {
        fair,
        decision: TradeDecision::BuyYes,
        edge: None,
        price: quote.yes_ask,
    }
}

/// Gate a between-bucket market.
///
/// Buckets are only entered inside the snipe window: once other
/// participants have repriced a freshly opened bucket, chasing it buys
/// the same information at a worse price.
pub fn evaluate_between(
    forecast_high_f: f64,
    floor_f: f64,
    cap_f: f64,
    in_snipe_window: bool,
    quote: &Quote,
    cfg: &ThresholdModelConfig,
) -> Scored {
    let p = proximity(forecast_high_f, floor_f, cap_f);
    let pass = p <= cfg.proximity_bound_f;
    let fair = FairValue::Gate { pass, margin_f: p };

    if !pass {
        return Scored::skip(fair, SkipReason::OutsideProximity);
    }
    if !in_snipe_window {
        return Scored::skip(fair, SkipReason::OutsideSnipeWindow);
    }

    Scored {
        fair,
        decision: TradeDecision::BuyYes,
        edge: None,
        price: quote.yes_ask,
    }
}

/// The fixed limit price threshold orders go out at.
///
/// Resolution is safe regardless of small price drift once the gate
/// passes, so the order price is configuration, not the live ask.
pub fn order_price(cfg: &ThresholdModelConfig) -> Decimal {
    cfg.limit_price
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
