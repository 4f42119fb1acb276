//! Engine — scan, score, reserve, execute, reconcile.
//!
//! One `StrategyInstance` per venue/market-category pair, each driving
//! its own scheduling loop. Instances share nothing mutable except the
//! `BudgetLedger`, whose reserve/release operations are a single atomic
//! critical section.

pub mod executor;
pub mod ledger;
pub mod positions;
pub mod scanner;
pub mod scheduler;

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::alerts::{AlertEvent, AlertKind, AlertSink};
use crate::feed::FeedSource;
use crate::storage;
use crate::types::{EngineError, Opportunity, SkipReason};
use crate::venues::VenueClient;
use executor::{ExecutionEngine, Submission};
use ledger::BudgetLedger;
use positions::{PositionBook, SettlementOutcome};
use scanner::OpportunityScanner;
use scheduler::Scheduler;

/// Summary of one completed tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub markets_scanned: usize,
    pub qualifying: usize,
    pub orders_placed: usize,
    pub orders_rejected: usize,
    pub committed_after: Decimal,
}

pub struct StrategyInstance {
    pub name: String,
    venue: Arc<dyn VenueClient>,
    feed: Arc<dyn FeedSource>,
    scanner: OpportunityScanner,
    scheduler: Scheduler,
    ledger: Arc<BudgetLedger>,
    executor: ExecutionEngine,
    book: PositionBook,
    alerts: AlertSink,
    /// Requested reservation per qualifying opportunity.
    stake_per_trade: Decimal,
    state_file: String,
    /// Set on `AuthExpired`: scanning continues, placement stops.
    placement_halted: bool,
    /// Previous tick's underlying readings, for spike detection.
    last_readings: HashMap<String, f64>,
}

impl StrategyInstance {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        venue: Arc<dyn VenueClient>,
        feed: Arc<dyn FeedSource>,
        scanner: OpportunityScanner,
        scheduler: Scheduler,
        ledger: Arc<BudgetLedger>,
        executor: ExecutionEngine,
        book: PositionBook,
        alerts: AlertSink,
        stake_per_trade: Decimal,
        state_file: String,
    ) -> Self {
        Self {
            name,
            venue,
            feed,
            scanner,
            scheduler,
            ledger,
            executor,
            book,
            alerts,
            stake_per_trade,
            state_file,
            placement_halted: false,
            last_readings: HashMap::new(),
        }
    }

    /// Main loop: tick at the scheduler's cadence until shutdown, then
    /// drain (cancel resting orders; positions are held to resolution).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(instance = %self.name, "Strategy instance started");

        loop {
            let interval = self.scheduler.current_interval(Utc::now());
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let started = Instant::now();
                    self.tick().await;
                    let elapsed = started.elapsed();
                    if elapsed > interval {
                        // Never silently merged into the next tick.
                        warn!(
                            instance = %self.name,
                            elapsed_ms = elapsed.as_millis() as u64,
                            interval_ms = interval.as_millis() as u64,
                            "Tick overran its interval (latency violation)"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    info!(instance = %self.name, "Shutdown signal received");
                    break;
                }
            }
        }

        if let Err(e) = self.drain(false).await {
            error!(instance = %self.name, error = %e, "Drain on shutdown failed");
        }
        info!(instance = %self.name, "Strategy instance stopped");
    }

    /// One scan → score → reserve → execute → reconcile pass.
    pub async fn tick(&mut self) -> Option<TickReport> {
        let now = Utc::now();

        // Release capital from resolutions before taking new risk.
        self.sync_settlements().await;

        let in_snipe = self.scheduler.in_snipe_window(now);
        let outcome = match self.scanner.scan(now, in_snipe).await {
            Ok(o) => o,
            Err(e) => {
                // The tick is lost, the loop is not.
                warn!(instance = %self.name, error = %e, "Scan failed; tick skipped");
                return None;
            }
        };

        self.track_spikes(&outcome.readings);

        // Audit trail: every decision, buys and skips alike.
        for opp in &outcome.opportunities {
            info!(instance = %self.name, decision = %opp, "Opportunity");
            self.alerts.notify(AlertEvent::new(
                AlertKind::Decision,
                &self.name,
                Some(&opp.market.external_id),
                opp.to_string(),
            ));
        }

        let actionable: Vec<&Opportunity> = outcome
            .opportunities
            .iter()
            .filter(|o| o.decision.is_actionable())
            .filter(|o| !self.book.holds(&o.market.external_id))
            .collect();
        let qualifying = actionable.len();

        let mut placed = 0usize;
        let mut rejected = 0usize;

        if self.placement_halted {
            if qualifying > 0 {
                warn!(
                    instance = %self.name,
                    qualifying,
                    "Placement halted (auth); observing only"
                );
            }
        } else {
            for opp in actionable {
                if !self.execute_one(opp, qualifying, &mut placed, &mut rejected).await {
                    break;
                }
            }
        }

        if let Err(e) = storage::save_book(&self.book, Some(&self.state_file)) {
            error!(instance = %self.name, error = %e, "Failed to save position book");
        }

        let report = TickReport {
            markets_scanned: outcome.opportunities.len(),
            qualifying,
            orders_placed: placed,
            orders_rejected: rejected,
            committed_after: self.ledger.committed(),
        };
        info!(
            instance = %self.name,
            scanned = report.markets_scanned,
            qualifying = report.qualifying,
            placed = report.orders_placed,
            rejected = report.orders_rejected,
            committed = %report.committed_after,
            "Tick complete"
        );
        Some(report)
    }

    /// Reserve and submit one opportunity. Returns false when placement
    /// must stop for the rest of the tick (auth failure).
    async fn execute_one(
        &mut self,
        opportunity: &Opportunity,
        qualifying: usize,
        placed: &mut usize,
        rejected: &mut usize,
    ) -> bool {
        let market_id = opportunity.market.external_id.clone();

        let grant = match self
            .ledger
            .reserve(&market_id, self.stake_per_trade, qualifying)
        {
            Ok(g) => g,
            Err(e) => {
                // Granted nothing — a skip, not an error.
                info!(
                    instance = %self.name,
                    market_id = %market_id,
                    reason = %SkipReason::InsufficientBudget,
                    error = %e,
                    "Reservation not granted"
                );
                return true;
            }
        };

        match self.executor.submit(opportunity, &grant, &self.ledger).await {
            Ok(Submission::Placed(position)) => {
                self.alerts.notify(AlertEvent::new(
                    AlertKind::OrderPlaced,
                    &self.name,
                    Some(&market_id),
                    position.to_string(),
                ));
                self.book.record(position);
                *placed += 1;
                true
            }
            Ok(Submission::Rejected { reason, detail, .. }) => {
                self.alerts.notify(AlertEvent::new(
                    AlertKind::OrderRejected,
                    &self.name,
                    Some(&market_id),
                    format!("{reason}: {detail}"),
                ));
                *rejected += 1;
                true
            }
            Err(e) => {
                // AuthExpired: halt placement, keep observing, alert.
                self.placement_halted = true;
                self.alerts.notify(AlertEvent::new(
                    AlertKind::AuthFailure,
                    &self.name,
                    Some(&market_id),
                    e.to_string(),
                ));
                error!(instance = %self.name, error = %e, "Placement halted");
                false
            }
        }
    }

    /// Pull resolution events for held markets and release their budget.
    async fn sync_settlements(&mut self) {
        let open = self.book.open_market_ids();
        if open.is_empty() {
            return;
        }

        match self.venue.settlements(&open).await {
            Ok(settlements) => {
                for settlement in settlements {
                    match self.book.apply_settlement(&settlement) {
                        SettlementOutcome::Resolved { won, payout, .. } => {
                            let released = self.ledger.release(&settlement.market_id);
                            info!(
                                instance = %self.name,
                                market_id = %settlement.market_id,
                                won,
                                payout = %payout,
                                released = %released,
                                "Settlement applied"
                            );
                        }
                        // Replay or unknown market: nothing to release.
                        SettlementOutcome::AlreadyResolved | SettlementOutcome::Unknown => {}
                    }
                }
            }
            Err(e) => {
                warn!(instance = %self.name, error = %e, "Settlement sync failed");
            }
        }
    }

    /// Compare this tick's underlying readings with the previous tick's
    /// and arm spike mode on a qualifying move.
    fn track_spikes(&mut self, readings: &HashMap<String, f64>) {
        let now = Utc::now();
        for (key, value) in readings {
            if let Some(previous) = self.last_readings.get(key) {
                if self.scheduler.record_move(now, *previous, *value) {
                    // Cached inputs are no longer trustworthy.
                    self.feed.invalidate(key);
                    self.alerts.notify(AlertEvent::new(
                        AlertKind::ModeChange,
                        &self.name,
                        None,
                        format!("spike armed by {key} move"),
                    ));
                }
            }
        }
        self.last_readings.extend(readings.clone());
    }

    /// Drain and halt: cancel all unfilled orders, optionally liquidate
    /// open positions at the best available price. The documented
    /// emergency procedure, as a first-class operation.
    pub async fn drain(&mut self, liquidate: bool) -> Result<(), EngineError> {
        info!(instance = %self.name, liquidate, "Draining");
        self.alerts.notify(AlertEvent::new(
            AlertKind::Drain,
            &self.name,
            None,
            format!("drain started (liquidate={liquidate})"),
        ));

        // 1. Cancel every resting order.
        match self.venue.open_orders().await {
            Ok(orders) => {
                for order in orders {
                    match self.venue.cancel_order(&order.order_id).await {
                        Ok(()) => {
                            info!(order_id = %order.order_id, "Order cancelled");
                            if self.book.cancel_pending(&order.market_id).is_some() {
                                self.ledger.release(&order.market_id);
                            }
                        }
                        Err(e) => {
                            warn!(order_id = %order.order_id, error = %e, "Cancel failed")
                        }
                    }
                }
            }
            Err(e) => warn!(instance = %self.name, error = %e, "Open-order listing failed"),
        }

        // 2. Optionally liquidate filled positions at best bid.
        if liquidate {
            let open: Vec<_> = self
                .book
                .open_positions()
                .into_iter()
                .cloned()
                .collect();
            for position in open {
                let quote = match self.venue.orderbook(&position.market_id).await {
                    Ok(q) => q,
                    Err(e) => {
                        warn!(market_id = %position.market_id, error = %e, "No book; cannot liquidate");
                        continue;
                    }
                };
                let Some(bid) = quote.bid_for(position.side) else {
                    warn!(market_id = %position.market_id, "No bid; cannot liquidate");
                    continue;
                };

                let order = crate::venues::OrderRequest::gtc_sell(
                    &position.market_id,
                    position.side,
                    bid,
                    position.shares,
                );
                match self.venue.place_order(&order).await {
                    Ok(_ack) => {
                        self.book.mark_liquidated(&position.market_id, bid);
                        self.ledger.release(&position.market_id);
                    }
                    Err(e) => {
                        warn!(market_id = %position.market_id, error = %e, "Liquidation failed")
                    }
                }
            }
        }

        storage::save_book(&self.book, Some(&self.state_file)).map_err(|e| {
            EngineError::Venue {
                venue: self.venue.venue().to_string(),
                message: format!("state save failed during drain: {e}"),
            }
        })?;

        info!(instance = %self.name, "Drain complete");
        Ok(())
    }

    /// Whether placement is currently halted (auth failure observed).
    pub fn is_placement_halted(&self) -> bool {
        self.placement_halted
    }
}
