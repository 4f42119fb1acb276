//! Position book.
//!
//! Holds every position the engine has opened and its resolution
//! outcome. The executor is the only writer of new positions; the book
//! owns all status transitions afterwards. Resolved positions are
//! immutable — replaying a settlement event is a no-op, which is what
//! keeps budget release idempotent one layer up.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::types::{Position, PositionStatus, Side};
use crate::venues::{Settlement, SettlementResult};

/// Outcome of applying one settlement event.
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    /// Position resolved; capital should be released and PnL booked.
    Resolved { position_id: String, won: bool, payout: Decimal },
    /// Position was already terminal — replay detected, nothing to do.
    AlreadyResolved,
    /// No position held in that market.
    Unknown,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PositionBook {
    /// Keyed by market id: the engine never holds two positions in one
    /// market (the ledger refuses the second reservation).
    positions: HashMap<String, Position>,
    pub realized_pnl: Decimal,
    pub wins: u64,
    pub losses: u64,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly created position (from the executor).
    pub fn record(&mut self, position: Position) {
        if let Some(existing) = self.positions.get(&position.market_id) {
            warn!(
                market_id = %position.market_id,
                existing = %existing.id,
                "Replacing existing position record"
            );
        }
        info!(position = %position, "Position recorded");
        self.positions.insert(position.market_id.clone(), position);
    }

    /// Promote a pending position once the venue confirms the fill.
    pub fn mark_filled(&mut self, market_id: &str) {
        if let Some(p) = self.positions.get_mut(market_id) {
            if p.status == PositionStatus::Pending {
                p.status = PositionStatus::Filled;
            }
        }
    }

    /// Apply a venue resolution event.
    ///
    /// Winning YES (or NO) positions pay out $1/share. Idempotent:
    /// a position already in a terminal status is left untouched.
    pub fn apply_settlement(&mut self, settlement: &Settlement) -> SettlementOutcome {
        let Some(p) = self.positions.get_mut(&settlement.market_id) else {
            return SettlementOutcome::Unknown;
        };

        if p.status.is_terminal() {
            return SettlementOutcome::AlreadyResolved;
        }

        let won = matches!(
            (settlement.result, p.side),
            (SettlementResult::Yes, Side::Yes) | (SettlementResult::No, Side::No)
        );

        let payout = if won {
            Decimal::from(p.shares)
        } else {
            Decimal::ZERO
        };
        let pnl = payout - p.cost();

        p.status = if won {
            self.wins += 1;
            PositionStatus::ResolvedWin
        } else {
            self.losses += 1;
            PositionStatus::ResolvedLoss
        };
        self.realized_pnl += pnl;

        info!(
            market_id = %settlement.market_id,
            won,
            payout = %payout,
            pnl = %pnl,
            "Position resolved"
        );

        SettlementOutcome::Resolved {
            position_id: p.id.clone(),
            won,
            payout,
        }
    }

    /// Remove a pending position whose order was cancelled before any
    /// fill — no money moved, so the record simply goes away.
    pub fn cancel_pending(&mut self, market_id: &str) -> Option<Position> {
        match self.positions.get(market_id) {
            Some(p) if p.status == PositionStatus::Pending => {
                info!(market_id, "Pending position cancelled before fill");
                self.positions.remove(market_id)
            }
            _ => None,
        }
    }

    /// Mark a position liquidated by the drain procedure.
    pub fn mark_liquidated(&mut self, market_id: &str, exit_price: Decimal) -> Option<Decimal> {
        let p = self.positions.get_mut(market_id)?;
        if p.status.is_terminal() {
            return None;
        }
        let proceeds = Decimal::from(p.shares) * exit_price;
        self.realized_pnl += proceeds - p.cost();
        p.status = PositionStatus::Liquidated;
        info!(market_id, proceeds = %proceeds, "Position liquidated");
        Some(proceeds)
    }

    pub fn get(&self, market_id: &str) -> Option<&Position> {
        self.positions.get(market_id)
    }

    /// Whether the engine already holds (or is pending into) a market.
    pub fn holds(&self, market_id: &str) -> bool {
        self.positions
            .get(market_id)
            .map(|p| !p.status.is_terminal())
            .unwrap_or(false)
    }

    /// All non-terminal positions.
    pub fn open_positions(&self) -> Vec<&Position> {
        self.positions
            .values()
            .filter(|p| !p.status.is_terminal())
            .collect()
    }

    pub fn open_market_ids(&self) -> Vec<String> {
        self.open_positions()
            .iter()
            .map(|p| p.market_id.clone())
            .collect()
    }

    /// Capital currently tied up in open positions.
    pub fn open_exposure(&self) -> Decimal {
        self.open_positions().iter().map(|p| p.cost()).sum()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Build a position from a confirmed order.
pub fn position_from_fill(
    venue: crate::types::Venue,
    market_id: &str,
    side: Side,
    shares: u64,
    price_paid: Decimal,
    filled: bool,
) -> Position {
    Position {
        id: uuid::Uuid::new_v4().to_string(),
        venue,
        market_id: market_id.to_string(),
        side,
        shares,
        price_paid,
        opened_at: Utc::now(),
        status: if filled {
            PositionStatus::Filled
        } else {
            PositionStatus::Pending
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
