//! Execution engine.
//!
//! Converts a granted reservation into a signed GTC limit order and a
//! recorded `Position`. Threshold/bucket orders go out at the fixed
//! configured price (resolution is safe regardless of small drift);
//! barrier orders price at the live best ask (the thesis depends on it).
//!
//! A venue rejection synchronously releases the ledger reservation —
//! capital never leaks. A placement timeout triggers an order-status
//! query before any retry, so a slow acknowledgement can never become a
//! double submission. Retries are bounded and jittered.

use rand::Rng;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::engine::ledger::{BudgetLedger, Grant};
use crate::engine::positions::position_from_fill;
use crate::types::{EngineError, Opportunity, Position, SkipReason};
use crate::venues::{OrderAck, OrderRequest, OrderState, VenueClient};

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub min_lot: u64,
    /// Fixed limit price for threshold/bucket orders.
    pub threshold_limit_price: Decimal,
    pub max_order_attempts: u32,
    pub order_timeout_secs: u64,
    pub dry_run: bool,
}

/// Outcome of submitting one opportunity.
#[derive(Debug)]
pub enum Submission {
    Placed(Position),
    /// Order not placed; the reservation has already been released.
    Rejected {
        market_id: String,
        reason: SkipReason,
        detail: String,
    },
}

pub struct ExecutionEngine {
    venue: Arc<dyn VenueClient>,
    cfg: ExecutionConfig,
}

impl ExecutionEngine {
    pub fn new(venue: Arc<dyn VenueClient>, cfg: ExecutionConfig) -> Self {
        Self { venue, cfg }
    }

    /// Submit a granted opportunity.
    ///
    /// Errors propagate only for account-level failures (`AuthExpired`);
    /// per-order failures come back as `Submission::Rejected` with the
    /// reservation already released.
    pub async fn submit(
        &self,
        opportunity: &Opportunity,
        grant: &Grant,
        ledger: &BudgetLedger,
    ) -> Result<Submission, EngineError> {
        let market = &opportunity.market;
        let Some(side) = opportunity.decision.side() else {
            ledger.release(&market.external_id);
            return Ok(Submission::Rejected {
                market_id: market.external_id.clone(),
                reason: SkipReason::MarketClosed,
                detail: "submit called with a non-actionable decision".to_string(),
            });
        };

        // Price selection per strategy thesis.
        let price = if market.category().is_weather() {
            self.cfg.threshold_limit_price
        } else {
            match self.venue.orderbook(&market.external_id).await {
                Ok(book) => match book.ask_for(side) {
                    Some(ask) => ask,
                    None => {
                        ledger.release(&market.external_id);
                        return Ok(Submission::Rejected {
                            market_id: market.external_id.clone(),
                            reason: SkipReason::NoQuote,
                            detail: "no live ask at execution time".to_string(),
                        });
                    }
                },
                Err(e) => {
                    ledger.release(&market.external_id);
                    return Ok(Submission::Rejected {
                        market_id: market.external_id.clone(),
                        reason: SkipReason::DataUnavailable,
                        detail: format!("orderbook fetch failed: {e}"),
                    });
                }
            }
        };

        // Amount → share count, floored to the lot grid.
        let shares = if price > Decimal::ZERO {
            (grant.amount / price).floor().to_u64().unwrap_or(0)
        } else {
            0
        };
        if shares < self.cfg.min_lot {
            ledger.release(&market.external_id);
            return Ok(Submission::Rejected {
                market_id: market.external_id.clone(),
                reason: SkipReason::BelowMinimumLot,
                detail: format!("{shares} shares at {price} below minimum lot"),
            });
        }

        // Flooring rarely spends the whole grant; return the remainder.
        ledger.settle_to(&market.external_id, price * Decimal::from(shares));

        if self.cfg.dry_run {
            info!(
                market_id = %market.external_id,
                side = %side,
                shares,
                price = %price,
                "[DRY RUN] Would place GTC limit order"
            );
            return Ok(Submission::Placed(position_from_fill(
                market.venue,
                &market.external_id,
                side,
                shares,
                price,
                true,
            )));
        }

        let order = OrderRequest::gtc_buy(&market.external_id, side, price, shares);
        match self.place_with_retry(&order).await {
            Ok(ack) => {
                let filled =
                    ack.state == OrderState::Filled || ack.filled_count >= shares;
                info!(
                    market_id = %market.external_id,
                    order_id = %ack.order_id,
                    side = %side,
                    shares,
                    price = %price,
                    filled,
                    "Order placed"
                );
                Ok(Submission::Placed(position_from_fill(
                    market.venue,
                    &market.external_id,
                    side,
                    shares,
                    price,
                    filled,
                )))
            }
            Err(e) if e.halts_placement() => {
                // Account-level: release and surface to the instance.
                ledger.release(&market.external_id);
                Err(e)
            }
            Err(e) => {
                warn!(market_id = %market.external_id, error = %e, "Order not placed");
                ledger.release(&market.external_id);
                Ok(Submission::Rejected {
                    market_id: market.external_id.clone(),
                    reason: SkipReason::VenueRejected,
                    detail: e.to_string(),
                })
            }
        }
    }

    /// Place an order with a bounded attempt count and jittered backoff.
    ///
    /// On a timed-out attempt the venue is queried for a resting order on
    /// the same market before any retry — if the first request actually
    /// landed, that order is adopted instead of submitting a duplicate.
    async fn place_with_retry(&self, order: &OrderRequest) -> Result<OrderAck, EngineError> {
        let per_attempt = Duration::from_secs(self.cfg.order_timeout_secs);
        let mut last_err = EngineError::Timeout {
            operation: format!("place order on {}", order.market_id),
            seconds: self.cfg.order_timeout_secs,
        };

        for attempt in 1..=self.cfg.max_order_attempts {
            match tokio::time::timeout(per_attempt, self.venue.place_order(order)).await {
                Ok(Ok(ack)) => return Ok(ack),
                Ok(Err(e)) => {
                    // Definitive answers are not retried.
                    if matches!(
                        e,
                        EngineError::VenueRejected { .. } | EngineError::AuthExpired { .. }
                    ) {
                        return Err(e);
                    }
                    warn!(attempt, error = %e, "Placement attempt failed");
                    last_err = e;
                }
                Err(_) => {
                    warn!(
                        attempt,
                        market_id = %order.market_id,
                        "Placement timed out; querying for a landed order before retrying"
                    );
                    if let Some(ack) = self.find_landed_order(&order.market_id).await {
                        return Ok(ack);
                    }
                }
            }

            if attempt < self.cfg.max_order_attempts {
                let jitter = rand::thread_rng().gen_range(0..250);
                tokio::time::sleep(Duration::from_millis(500 * attempt as u64 + jitter)).await;
            }
        }

        Err(last_err)
    }

    /// Look for an order of ours already resting on a market. The engine
    /// holds at most one order per market, so a market match is ours.
    async fn find_landed_order(&self, market_id: &str) -> Option<OrderAck> {
        match self.venue.open_orders().await {
            Ok(orders) => orders
                .into_iter()
                .find(|o| o.market_id == market_id)
                .map(|o| OrderAck {
                    order_id: o.order_id,
                    state: o.state,
                    filled_count: o.filled_count,
                }),
            Err(e) => {
                warn!(market_id, error = %e, "Status query after timeout failed");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ledger::LedgerCaps;
    use crate::types::{FairValue, Market, PositionStatus, Quote, TradeDecision};
    use crate::venues::{OrderStatus, Settlement, VenuePosition};
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted venue for executor tests.
    struct ScriptedVenue {
        place_calls: AtomicU32,
        /// Errors to return before succeeding (drained until empty).
        failures: Mutex<Vec<EngineError>>,
        /// If set, place_order sleeps this long (to trip the timeout).
        place_delay_secs: Option<u64>,
        /// What open_orders reports (the "landed order" lookup).
        resting: Mutex<Vec<OrderStatus>>,
        ack_state: Mutex<OrderState>,
    }

    impl ScriptedVenue {
        fn filled() -> Self {
            Self {
                place_calls: AtomicU32::new(0),
                failures: Mutex::new(Vec::new()),
                place_delay_secs: None,
                resting: Mutex::new(Vec::new()),
                ack_state: Mutex::new(OrderState::Filled),
            }
        }
    }

    #[async_trait]
    impl VenueClient for ScriptedVenue {
        fn venue(&self) -> crate::types::Venue {
            crate::types::Venue::Kalshi
        }

        async fn open_markets(&self) -> Result<Vec<Market>, EngineError> {
            Ok(Vec::new())
        }

        async fn orderbook(&self, _market_id: &str) -> Result<Quote, EngineError> {
            Ok(Quote {
                yes_bid: Some(dec!(0.09)),
                yes_ask: Some(dec!(0.095)),
                no_bid: Some(dec!(0.90)),
                no_ask: Some(dec!(0.91)),
            })
        }

        async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, EngineError> {
            self.place_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(secs) = self.place_delay_secs {
                tokio::time::sleep(Duration::from_secs(secs)).await;
            }
            if let Some(err) = self.failures.lock().unwrap().pop() {
                return Err(err);
            }
            Ok(OrderAck {
                order_id: "ord-1".to_string(),
                state: *self.ack_state.lock().unwrap(),
                filled_count: order.count,
            })
        }

        async fn cancel_order(&self, _order_id: &str) -> Result<(), EngineError> {
            Ok(())
        }

        async fn order_status(&self, _order_id: &str) -> Result<Option<OrderStatus>, EngineError> {
            Ok(None)
        }

        async fn open_orders(&self) -> Result<Vec<OrderStatus>, EngineError> {
            Ok(self.resting.lock().unwrap().clone())
        }

        async fn positions(&self) -> Result<Vec<VenuePosition>, EngineError> {
            Ok(Vec::new())
        }

        async fn settlements(&self, _ids: &[String]) -> Result<Vec<Settlement>, EngineError> {
            Ok(Vec::new())
        }
    }

    fn exec_cfg(dry_run: bool) -> ExecutionConfig {
        ExecutionConfig {
            min_lot: 1,
            threshold_limit_price: dec!(0.90),
            max_order_attempts: 3,
            order_timeout_secs: 10,
            dry_run,
        }
    }

    fn ledger() -> BudgetLedger {
        BudgetLedger::new(LedgerCaps {
            global_cap: dec!(500),
            per_market_cap: dec!(50),
        })
    }

    fn weather_opportunity() -> Opportunity {
        Opportunity {
            market: crate::types::tests::sample_weather_market(),
            fair: FairValue::Gate { pass: true, margin_f: 7.0 },
            market_price: Some(dec!(0.85)),
            edge: None,
            decision: TradeDecision::BuyYes,
            generated_at: Utc::now(),
        }
    }

    fn barrier_opportunity() -> Opportunity {
        Opportunity {
            market: crate::types::tests::sample_barrier_market(),
            fair: FairValue::Probability(0.305),
            market_price: Some(dec!(0.095)),
            edge: Some(0.21),
            decision: TradeDecision::BuyYes,
            generated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_threshold_order_uses_fixed_price() {
        let venue = Arc::new(ScriptedVenue::filled());
        let engine = ExecutionEngine::new(venue, exec_cfg(false));
        let ledger = ledger();
        let opp = weather_opportunity();
        let grant = ledger.reserve(&opp.market.external_id, dec!(45), 1).unwrap();

        let sub = engine.submit(&opp, &grant, &ledger).await.unwrap();
        match sub {
            Submission::Placed(p) => {
                // 45 / 0.90 = 50 shares at the configured price.
                assert_eq!(p.price_paid, dec!(0.90));
                assert_eq!(p.shares, 50);
                assert_eq!(p.status, PositionStatus::Filled);
            }
            other => panic!("unexpected: {other:?}"),
        }
        // Reservation trimmed to exact spend: 50 × 0.90 = 45.
        assert_eq!(ledger.committed(), dec!(45));
    }

    #[tokio::test]
    async fn test_barrier_order_uses_live_ask() {
        let venue = Arc::new(ScriptedVenue::filled());
        let engine = ExecutionEngine::new(venue, exec_cfg(false));
        let ledger = ledger();
        let opp = barrier_opportunity();
        let grant = ledger.reserve(&opp.market.external_id, dec!(10), 1).unwrap();

        let sub = engine.submit(&opp, &grant, &ledger).await.unwrap();
        match sub {
            Submission::Placed(p) => {
                // Live ask 0.095 → floor(10 / 0.095) = 105 shares.
                assert_eq!(p.price_paid, dec!(0.095));
                assert_eq!(p.shares, 105);
            }
            other => panic!("unexpected: {other:?}"),
        }
        // 105 × 0.095 = 9.975 committed; 0.025 refunded.
        assert_eq!(ledger.committed(), dec!(9.975));
    }

    #[tokio::test]
    async fn test_below_minimum_lot_rejects_and_releases() {
        let venue = Arc::new(ScriptedVenue::filled());
        let mut cfg = exec_cfg(false);
        cfg.min_lot = 100;
        let engine = ExecutionEngine::new(venue, cfg);
        let ledger = ledger();
        let opp = weather_opportunity();
        // 5 / 0.90 = 5 shares < 100 minimum.
        let grant = ledger.reserve(&opp.market.external_id, dec!(5), 1).unwrap();

        let sub = engine.submit(&opp, &grant, &ledger).await.unwrap();
        assert!(matches!(
            sub,
            Submission::Rejected { reason: SkipReason::BelowMinimumLot, .. }
        ));
        assert_eq!(ledger.committed(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_venue_rejection_releases_reservation() {
        let venue = Arc::new(ScriptedVenue {
            failures: Mutex::new(vec![EngineError::VenueRejected {
                venue: "kalshi".to_string(),
                message: "price out of range".to_string(),
            }]),
            ..ScriptedVenue::filled()
        });
        let engine = ExecutionEngine::new(Arc::clone(&venue) as Arc<dyn VenueClient>, exec_cfg(false));
        let ledger = ledger();
        let opp = weather_opportunity();
        let grant = ledger.reserve(&opp.market.external_id, dec!(45), 1).unwrap();

        let sub = engine.submit(&opp, &grant, &ledger).await.unwrap();
        assert!(matches!(sub, Submission::Rejected { .. }));
        // No silent capital leakage.
        assert_eq!(ledger.committed(), Decimal::ZERO);
        // A definitive rejection is not retried.
        assert_eq!(venue.place_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auth_expired_propagates_after_release() {
        let venue = Arc::new(ScriptedVenue {
            failures: Mutex::new(vec![EngineError::AuthExpired {
                venue: "kalshi".to_string(),
                message: "signature rejected".to_string(),
            }]),
            ..ScriptedVenue::filled()
        });
        let engine = ExecutionEngine::new(venue, exec_cfg(false));
        let ledger = ledger();
        let opp = weather_opportunity();
        let grant = ledger.reserve(&opp.market.external_id, dec!(45), 1).unwrap();

        let err = engine.submit(&opp, &grant, &ledger).await.unwrap_err();
        assert!(err.halts_placement());
        assert_eq!(ledger.committed(), Decimal::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_adopts_landed_order_instead_of_resubmitting() {
        let venue = Arc::new(ScriptedVenue {
            place_delay_secs: Some(60), // well past the 10 s timeout
            resting: Mutex::new(vec![OrderStatus {
                order_id: "ord-landed".to_string(),
                market_id: crate::types::tests::sample_weather_market().external_id,
                state: OrderState::Resting,
                filled_count: 0,
                remaining_count: 50,
            }]),
            ..ScriptedVenue::filled()
        });
        let engine = ExecutionEngine::new(Arc::clone(&venue) as Arc<dyn VenueClient>, exec_cfg(false));
        let ledger = ledger();
        let opp = weather_opportunity();
        let grant = ledger.reserve(&opp.market.external_id, dec!(45), 1).unwrap();

        let sub = engine.submit(&opp, &grant, &ledger).await.unwrap();
        match sub {
            Submission::Placed(p) => assert_eq!(p.status, PositionStatus::Pending),
            other => panic!("unexpected: {other:?}"),
        }
        // The timed-out first attempt was found resting — never resent.
        assert_eq!(venue.place_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dry_run_places_nothing() {
        let venue = Arc::new(ScriptedVenue::filled());
        let engine = ExecutionEngine::new(Arc::clone(&venue) as Arc<dyn VenueClient>, exec_cfg(true));
        let ledger = ledger();
        let opp = weather_opportunity();
        let grant = ledger.reserve(&opp.market.external_id, dec!(45), 1).unwrap();

        let sub = engine.submit(&opp, &grant, &ledger).await.unwrap();
        assert!(matches!(sub, Submission::Placed(_)));
        assert_eq!(venue.place_calls.load(Ordering::SeqCst), 0);
    }
}
