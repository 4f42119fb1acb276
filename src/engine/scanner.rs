//! Opportunity scanner.
//!
//! Each tick: pull the venue's open markets, join every market with the
//! latest feed snapshot for its underlying, run the category-matched
//! fair-value model, and emit one `Opportunity` per examined market —
//! buys ranked by descending edge, skips carrying their failing gate so
//! every pass-over is reconstructable afterwards.
//!
//! Failure isolation: one underlying's feed failure skips only the
//! markets on that underlying. The tick aborts only if the venue's own
//! market listing cannot be fetched.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ModelConfig;
use crate::feed::FeedSource;
use crate::model::{self, ModelInputs};
use crate::types::{
    EngineError, FairValue, Market, MarketCategory, Opportunity, SkipReason, TradeDecision,
    UnderlyingRef,
};
use crate::venues::VenueClient;

/// Result of one scan pass.
pub struct ScanOutcome {
    pub opportunities: Vec<Opportunity>,
    /// Latest underlying readings (spot per asset), for spike tracking.
    pub readings: HashMap<String, f64>,
}

pub struct OpportunityScanner {
    venue: Arc<dyn VenueClient>,
    feed: Arc<dyn FeedSource>,
    categories: Vec<MarketCategory>,
    model_cfg: ModelConfig,
    max_days_to_expiry: i64,
}

impl OpportunityScanner {
    pub fn new(
        venue: Arc<dyn VenueClient>,
        feed: Arc<dyn FeedSource>,
        categories: Vec<MarketCategory>,
        model_cfg: ModelConfig,
        max_days_to_expiry: i64,
    ) -> Self {
        Self {
            venue,
            feed,
            categories,
            model_cfg,
            max_days_to_expiry,
        }
    }

    /// One scan pass. Feed lookups fan out concurrently across markets
    /// and all complete (or fail) before the result is returned — a
    /// partial fetch never feeds a stale value into a model.
    pub async fn scan(
        &self,
        now: DateTime<Utc>,
        in_snipe_window: bool,
    ) -> Result<ScanOutcome, EngineError> {
        let markets = self.venue.open_markets().await?;
        let in_scope: Vec<Market> = markets
            .into_iter()
            .filter(|m| self.categories.contains(&m.category()))
            .collect();

        debug!(count = in_scope.len(), "Markets in scope for scoring");

        let scored = join_all(
            in_scope
                .iter()
                .map(|m| self.score_market(m, now, in_snipe_window)),
        )
        .await;

        let mut readings = HashMap::new();
        let mut opportunities = Vec::with_capacity(scored.len());
        for (opp, reading) in scored {
            if let Some((key, value)) = reading {
                readings.insert(key, value);
            }
            opportunities.push(opp);
        }

        sort_opportunities(&mut opportunities);

        let actionable = opportunities
            .iter()
            .filter(|o| o.decision.is_actionable())
            .count();
        info!(
            scanned = opportunities.len(),
            actionable,
            "Scan pass complete"
        );

        Ok(ScanOutcome {
            opportunities,
            readings,
        })
    }

    /// Score one market; never fails — failures become skip records.
    async fn score_market(
        &self,
        market: &Market,
        now: DateTime<Utc>,
        in_snipe_window: bool,
    ) -> (Opportunity, Option<(String, f64)>) {
        let skip = |fair, reason| {
            (
                Opportunity {
                    market: market.clone(),
                    fair,
                    market_price: market.quote.yes_ask,
                    edge: None,
                    decision: TradeDecision::Skip(reason),
                    generated_at: now,
                },
                None,
            )
        };

        if !market.status.accepts_orders() {
            return skip(FairValue::Undefined, SkipReason::MarketClosed);
        }
        // Mandatory horizon cap: unbounded-horizon illiquid exposure is
        // exactly the failure this knob exists to forbid.
        if market.days_to_expiry(now) > self.max_days_to_expiry {
            return skip(FairValue::Undefined, SkipReason::ExpiryTooFar);
        }

        let (inputs, reading) = match &market.underlying {
            UnderlyingRef::Station(station) => {
                let date = market.expiry.date_naive();
                match self.feed.forecast_high(station, date).await {
                    Ok(high_f) => (ModelInputs::Forecast { high_f }, None),
                    Err(e) => {
                        warn!(market = %market, error = %e, "Feed failure; skipping market");
                        return skip(FairValue::Undefined, SkipReason::DataUnavailable);
                    }
                }
            }
            UnderlyingRef::Asset(asset) => {
                let (spot, sigma) =
                    tokio::join!(self.feed.spot(asset), self.feed.volatility(asset));
                match (spot, sigma) {
                    (Ok(spot), Ok(sigma)) => (
                        ModelInputs::Barrier {
                            spot,
                            sigma,
                            t_years: market.years_to_expiry(now),
                        },
                        Some((market.underlying.key(), spot)),
                    ),
                    (spot_res, sigma_res) => {
                        let e = spot_res.err().or(sigma_res.err()).expect("one side failed");
                        warn!(market = %market, error = %e, "Feed failure; skipping market");
                        return skip(FairValue::Undefined, SkipReason::DataUnavailable);
                    }
                }
            }
        };

        let scored = model::score(market, &inputs, in_snipe_window, &self.model_cfg);
        (
            Opportunity {
                market: market.clone(),
                fair: scored.fair,
                market_price: scored.price.or(market.quote.yes_ask),
                edge: scored.edge,
                decision: scored.decision,
                generated_at: now,
            },
            reading,
        )
    }
}

/// Buys first, by descending edge; gate buys (no numeric edge) keep
/// their scan order ahead of skips.
pub fn sort_opportunities(opportunities: &mut [Opportunity]) {
    opportunities.sort_by(|a, b| {
        let rank = |o: &Opportunity| if o.decision.is_actionable() { 0 } else { 1 };
        rank(a).cmp(&rank(b)).then_with(|| {
            let edge = |o: &Opportunity| o.edge.unwrap_or(f64::NEG_INFINITY);
            edge(b)
                .partial_cmp(&edge(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
