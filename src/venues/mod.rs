//! Venue integrations.
//!
//! Defines the `VenueClient` trait and provides implementations for:
//! - Kalshi — RSA-PSS signed session, weather threshold/bucket markets
//! - Polymarket — local secp256k1 order signing behind an egress proxy,
//!   crypto barrier-touch markets
//!
//! Everything above this layer is venue-agnostic: auth signing, proxy
//! routing, and pagination live inside the clients.

pub mod kalshi;
pub mod polymarket;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{EngineError, Market, Quote, Side, Venue};

// ---------------------------------------------------------------------------
// Order types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAction {
    Buy,
    Sell,
}

/// All engine orders are good-till-cancelled limit orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub market_id: String,
    pub side: Side,
    pub action: OrderAction,
    /// Limit price, dollars per share.
    pub price: Decimal,
    pub count: u64,
    /// Engine-generated idempotency key, echoed by the venue.
    pub client_order_id: String,
}

impl OrderRequest {
    /// A GTC limit buy with a fresh client order id.
    pub fn gtc_buy(market_id: &str, side: Side, price: Decimal, count: u64) -> Self {
        Self {
            market_id: market_id.to_string(),
            side,
            action: OrderAction::Buy,
            price,
            count,
            client_order_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// A GTC limit sell (used only by the drain/liquidate path).
    pub fn gtc_sell(market_id: &str, side: Side, price: Decimal, count: u64) -> Self {
        Self {
            market_id: market_id.to_string(),
            side,
            action: OrderAction::Sell,
            price,
            count,
            client_order_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    Resting,
    Filled,
    Canceled,
    Rejected,
}

/// Venue acknowledgement of a placed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub state: OrderState,
    pub filled_count: u64,
}

/// A resting or historical order as reported by the venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatus {
    pub order_id: String,
    pub market_id: String,
    pub state: OrderState,
    pub filled_count: u64,
    pub remaining_count: u64,
}

/// A position as reported by the venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenuePosition {
    pub market_id: String,
    pub side: Side,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementResult {
    Yes,
    No,
}

/// A market resolution event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub market_id: String,
    pub result: SettlementResult,
    pub settled_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over outcome-market venues.
///
/// Implementors own auth signing, pagination, and any egress routing.
/// All methods are bounded by the client's HTTP timeout.
#[async_trait]
pub trait VenueClient: Send + Sync {
    fn venue(&self) -> Venue;

    /// All markets currently open for trading (pagination transparent).
    async fn open_markets(&self) -> Result<Vec<Market>, EngineError>;

    /// Best bid/ask per side for one market.
    async fn orderbook(&self, market_id: &str) -> Result<Quote, EngineError>;

    /// Place a GTC limit order.
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, EngineError>;

    async fn cancel_order(&self, order_id: &str) -> Result<(), EngineError>;

    /// Look up one order; `None` if the venue has no record of it.
    async fn order_status(&self, order_id: &str) -> Result<Option<OrderStatus>, EngineError>;

    /// All resting orders (used by the drain procedure).
    async fn open_orders(&self) -> Result<Vec<OrderStatus>, EngineError>;

    async fn positions(&self) -> Result<Vec<VenuePosition>, EngineError>;

    /// Resolution events for the given markets.
    async fn settlements(&self, market_ids: &[String]) -> Result<Vec<Settlement>, EngineError>;
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Map an HTTP failure status to the engine error taxonomy.
///
/// 401/403 is an account-level auth failure (halts placement); 4xx is a
/// per-order rejection; anything else is a venue fault.
pub(crate) fn map_http_error(venue: Venue, status: reqwest::StatusCode, body: &str) -> EngineError {
    let venue_name = venue.to_string();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        EngineError::AuthExpired {
            venue: venue_name,
            message: format!("{status}: {body}"),
        }
    } else if status.is_client_error() {
        EngineError::VenueRejected {
            venue: venue_name,
            message: format!("{status}: {body}"),
        }
    } else {
        EngineError::Venue {
            venue: venue_name,
            message: format!("{status}: {body}"),
        }
    }
}

pub(crate) fn map_transport_error(venue: Venue, err: reqwest::Error) -> EngineError {
    EngineError::Venue {
        venue: venue.to_string(),
        message: err.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
