//! Budget ledger — the single capital authority.
//!
//! Every strategy instance reserves through this ledger; nothing else
//! commits capital. Reserve and release run inside one mutex critical
//! section, so two opportunities can never both grant against the same
//! pre-reservation snapshot of available capital.
//!
//! The cap comes from exactly one configuration source (`[budget]` in
//! config.toml). A disagreeing secondary override is rejected at
//! startup — see `config::check_budget_authority`.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::types::EngineError;

/// Capital caps, read once at startup from the authoritative source.
#[derive(Debug, Clone, Copy)]
pub struct LedgerCaps {
    pub global_cap: Decimal,
    pub per_market_cap: Decimal,
}

/// A granted reservation. Holds no lock; release is keyed by market.
#[derive(Debug, Clone, PartialEq)]
pub struct Grant {
    pub market_id: String,
    pub amount: Decimal,
}

#[derive(Debug, Default)]
struct LedgerState {
    committed: Decimal,
    /// Open reservations by market id. Keyed release makes replayed
    /// resolution events idempotent: the second release finds nothing.
    reservations: HashMap<String, Decimal>,
}

pub struct BudgetLedger {
    caps: LedgerCaps,
    state: Mutex<LedgerState>,
}

impl BudgetLedger {
    pub fn new(caps: LedgerCaps) -> Self {
        info!(
            global_cap = %caps.global_cap,
            per_market_cap = %caps.per_market_cap,
            "Budget ledger initialised"
        );
        Self {
            caps,
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn global_cap(&self) -> Decimal {
        self.caps.global_cap
    }

    pub fn committed(&self) -> Decimal {
        self.state.lock().unwrap().committed
    }

    pub fn available(&self) -> Decimal {
        let state = self.state.lock().unwrap();
        self.caps.global_cap - state.committed
    }

    /// Reserve capital for one opportunity.
    ///
    /// `qualifying_count` is the number of opportunities that qualified
    /// in the *current* tick; the available pool is split across them so
    /// fewer simultaneous opportunities get proportionally larger
    /// stakes, always under the hard per-market ceiling:
    ///
    /// `granted = min(requested, per_market_cap, available / max(1, qualifying_count))`
    pub fn reserve(
        &self,
        market_id: &str,
        requested: Decimal,
        qualifying_count: usize,
    ) -> Result<Grant, EngineError> {
        let mut state = self.state.lock().unwrap();

        if state.reservations.contains_key(market_id) {
            // Capital already committed to this market; never double up.
            return Err(EngineError::InsufficientBudget {
                market_id: market_id.to_string(),
            });
        }

        let available = self.caps.global_cap - state.committed;
        let divisor = Decimal::from(qualifying_count.max(1));
        let fair_share = available / divisor;
        let granted = requested.min(self.caps.per_market_cap).min(fair_share);

        if granted <= Decimal::ZERO {
            return Err(EngineError::InsufficientBudget {
                market_id: market_id.to_string(),
            });
        }

        state.committed += granted;
        state.reservations.insert(market_id.to_string(), granted);

        debug!(
            market_id,
            granted = %granted,
            committed = %state.committed,
            available = %(self.caps.global_cap - state.committed),
            "Reservation granted"
        );

        Ok(Grant {
            market_id: market_id.to_string(),
            amount: granted,
        })
    }

    /// Return a market's reserved capital to the pool — on resolution,
    /// cancellation, or rejection. Idempotent: releasing a market with
    /// no open reservation is a no-op returning zero.
    pub fn release(&self, market_id: &str) -> Decimal {
        let mut state = self.state.lock().unwrap();
        match state.reservations.remove(market_id) {
            Some(amount) => {
                state.committed -= amount;
                debug!(
                    market_id,
                    released = %amount,
                    committed = %state.committed,
                    "Reservation released"
                );
                amount
            }
            None => Decimal::ZERO,
        }
    }

    /// Shrink an open reservation to what was actually spent (partial
    /// fills, lot-size flooring). The difference returns to the pool.
    pub fn settle_to(&self, market_id: &str, spent: Decimal) {
        let mut state = self.state.lock().unwrap();
        if let Some(reserved) = state.reservations.get_mut(market_id) {
            if spent < *reserved {
                let refund = *reserved - spent;
                *reserved = spent;
                state.committed -= refund;
                debug!(market_id, refund = %refund, "Reservation trimmed to spend");
            }
        }
    }

    /// Invariant: `committed + available == global_cap`, and committed
    /// equals the sum of open reservations.
    #[cfg(test)]
    pub fn assert_invariant(&self) {
        let state = self.state.lock().unwrap();
        let sum: Decimal = state.reservations.values().copied().sum();
        assert_eq!(sum, state.committed, "reservations must sum to committed");
        assert_eq!(
            state.committed + (self.caps.global_cap - state.committed),
            self.caps.global_cap
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
