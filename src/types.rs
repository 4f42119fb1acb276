//! Shared types for the VANTAGE engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that venue, feed, model,
//! and engine modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Venue & market identity
// ---------------------------------------------------------------------------

/// Execution venue identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Venue {
    Kalshi,
    Polymarket,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::Kalshi => write!(f, "kalshi"),
            Venue::Polymarket => write!(f, "polymarket"),
        }
    }
}

impl std::str::FromStr for Venue {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kalshi" => Ok(Venue::Kalshi),
            "polymarket" => Ok(Venue::Polymarket),
            _ => Err(anyhow::anyhow!("Unknown venue: {s}")),
        }
    }
}

/// Contract side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Yes,
    No,
}

impl Side {
    /// The opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Yes => write!(f, "YES"),
            Side::No => write!(f, "NO"),
        }
    }
}

/// Market class, used to route a market to its fair-value model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketCategory {
    /// Daily-high temperature at-or-above / at-or-below a strike.
    Threshold,
    /// Daily-high temperature inside a bucket.
    Between,
    /// Crypto touch option: underlying reaches a barrier above spot.
    BarrierReach,
    /// Crypto touch option: underlying dips to a barrier below spot.
    BarrierDip,
}

impl MarketCategory {
    /// All known categories (useful for iteration).
    pub const ALL: &'static [MarketCategory] = &[
        MarketCategory::Threshold,
        MarketCategory::Between,
        MarketCategory::BarrierReach,
        MarketCategory::BarrierDip,
    ];

    /// Whether this category settles against a weather station reading.
    pub fn is_weather(&self) -> bool {
        matches!(self, MarketCategory::Threshold | MarketCategory::Between)
    }

    /// Whether this category settles against an exchange price path.
    pub fn is_barrier(&self) -> bool {
        matches!(self, MarketCategory::BarrierReach | MarketCategory::BarrierDip)
    }
}

impl fmt::Display for MarketCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketCategory::Threshold => write!(f, "threshold"),
            MarketCategory::Between => write!(f, "between"),
            MarketCategory::BarrierReach => write!(f, "barrier_reach"),
            MarketCategory::BarrierDip => write!(f, "barrier_dip"),
        }
    }
}

impl std::str::FromStr for MarketCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "threshold" => Ok(MarketCategory::Threshold),
            "between" => Ok(MarketCategory::Between),
            "barrier_reach" => Ok(MarketCategory::BarrierReach),
            "barrier_dip" => Ok(MarketCategory::BarrierDip),
            _ => Err(anyhow::anyhow!("Unknown market category: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Contract terms & resolution authority
// ---------------------------------------------------------------------------

/// Direction of a temperature threshold contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdDirection {
    AtOrAbove,
    AtOrBelow,
}

/// The payout-defining terms of a market, tagged by class.
///
/// Temperatures are degrees Fahrenheit; barriers are quoted in the
/// underlying asset's USD price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Contract {
    Threshold {
        strike_f: f64,
        direction: ThresholdDirection,
    },
    Between {
        floor_f: f64,
        cap_f: f64,
    },
    BarrierReach {
        barrier: f64,
    },
    BarrierDip {
        barrier: f64,
    },
}

impl Contract {
    /// The category this contract routes to.
    pub fn category(&self) -> MarketCategory {
        match self {
            Contract::Threshold { .. } => MarketCategory::Threshold,
            Contract::Between { .. } => MarketCategory::Between,
            Contract::BarrierReach { .. } => MarketCategory::BarrierReach,
            Contract::BarrierDip { .. } => MarketCategory::BarrierDip,
        }
    }
}

/// A weather station a venue settles temperature markets against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationRef {
    /// Official station identifier (e.g. "KNYC").
    pub station_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// An exchange pair a venue settles barrier markets against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRef {
    /// Exchange symbol (e.g. "BTCUSDT").
    pub symbol: String,
    /// Exchange named in the venue's resolution rule.
    pub exchange: String,
}

/// What a market's payout is contractually defined against.
///
/// This must match the venue's documented resolution authority exactly.
/// The mapping lives in configuration and is validated at startup —
/// a mismatch silently invalidates every fair-value computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UnderlyingRef {
    Station(StationRef),
    Asset(AssetRef),
}

impl UnderlyingRef {
    /// Stable key for feed caches and spike tracking.
    pub fn key(&self) -> String {
        match self {
            UnderlyingRef::Station(s) => format!("station:{}", s.station_id),
            UnderlyingRef::Asset(a) => format!("asset:{}:{}", a.exchange, a.symbol),
        }
    }
}

impl fmt::Display for UnderlyingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnderlyingRef::Station(s) => write!(f, "{} ({})", s.station_id, s.name),
            UnderlyingRef::Asset(a) => write!(f, "{}@{}", a.symbol, a.exchange),
        }
    }
}

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// Venue-reported market lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStatus {
    Open,
    AcceptingOrders,
    Closed,
    Resolved,
}

impl MarketStatus {
    /// Whether new orders can be placed.
    pub fn accepts_orders(&self) -> bool {
        matches!(self, MarketStatus::Open | MarketStatus::AcceptingOrders)
    }
}

/// Best bid/ask per side, in dollars per share (0.00–1.00).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub yes_bid: Option<Decimal>,
    pub yes_ask: Option<Decimal>,
    pub no_bid: Option<Decimal>,
    pub no_ask: Option<Decimal>,
}

impl Quote {
    /// The ask price for buying the given side.
    pub fn ask_for(&self, side: Side) -> Option<Decimal> {
        match side {
            Side::Yes => self.yes_ask,
            Side::No => self.no_ask,
        }
    }

    /// The bid price for selling out of the given side.
    pub fn bid_for(&self, side: Side) -> Option<Decimal> {
        match side {
            Side::Yes => self.yes_bid,
            Side::No => self.no_bid,
        }
    }
}

/// A tradeable outcome market on a venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub venue: Venue,
    /// Venue-native identifier (ticker or condition id).
    pub external_id: String,
    pub title: String,
    pub contract: Contract,
    pub underlying: UnderlyingRef,
    /// Human-readable descriptor of the venue's resolution rule.
    pub resolution_source: String,
    pub expiry: DateTime<Utc>,
    pub quote: Quote,
    pub status: MarketStatus,
}

impl Market {
    pub fn category(&self) -> MarketCategory {
        self.contract.category()
    }

    /// Whole days until expiry (negative once expired).
    pub fn days_to_expiry(&self, now: DateTime<Utc>) -> i64 {
        (self.expiry - now).num_days()
    }

    /// Time to expiry in years, using a 365-day year.
    pub fn years_to_expiry(&self, now: DateTime<Utc>) -> f64 {
        (self.expiry - now).num_seconds() as f64 / (365.0 * 86_400.0)
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({} | {} | exp {})",
            self.venue,
            self.external_id,
            self.category(),
            self.underlying,
            self.expiry.format("%Y-%m-%d %H:%MZ"),
        )
    }
}

// ---------------------------------------------------------------------------
// Opportunity
// ---------------------------------------------------------------------------

/// Model output attached to an opportunity.
///
/// Threshold/bucket markets produce a deterministic gate, not a
/// probability; barrier markets produce a touch probability in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FairValue {
    /// Margin gate result. `margin_f` is the forecast margin (threshold)
    /// or bucket proximity (between), in °F.
    Gate { pass: bool, margin_f: f64 },
    /// Barrier touch probability.
    Probability(f64),
    /// Model inputs were invalid (σ = 0 or T ≤ 0); no value exists.
    Undefined,
}

/// Why a market was passed over this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    DataUnavailable,
    ModelUndefined,
    BelowSafetyMargin,
    OutsideProximity,
    OutsideSnipeWindow,
    InsufficientEdge,
    OutsidePriceBand,
    ExpiryTooFar,
    MarketClosed,
    NoQuote,
    AlreadyPositioned,
    InsufficientBudget,
    BelowMinimumLot,
    VenueRejected,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::DataUnavailable => "data_unavailable",
            SkipReason::ModelUndefined => "model_undefined",
            SkipReason::BelowSafetyMargin => "below_safety_margin",
            SkipReason::OutsideProximity => "outside_proximity",
            SkipReason::OutsideSnipeWindow => "outside_snipe_window",
            SkipReason::InsufficientEdge => "insufficient_edge",
            SkipReason::OutsidePriceBand => "outside_price_band",
            SkipReason::ExpiryTooFar => "expiry_too_far",
            SkipReason::MarketClosed => "market_closed",
            SkipReason::NoQuote => "no_quote",
            SkipReason::AlreadyPositioned => "already_positioned",
            SkipReason::InsufficientBudget => "insufficient_budget",
            SkipReason::BelowMinimumLot => "below_minimum_lot",
            SkipReason::VenueRejected => "venue_rejected",
        };
        write!(f, "{s}")
    }
}

/// The per-market verdict for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TradeDecision {
    BuyYes,
    BuyNo,
    Skip(SkipReason),
}

impl TradeDecision {
    pub fn is_actionable(&self) -> bool {
        matches!(self, TradeDecision::BuyYes | TradeDecision::BuyNo)
    }

    /// The side to buy, if this is an actionable decision.
    pub fn side(&self) -> Option<Side> {
        match self {
            TradeDecision::BuyYes => Some(Side::Yes),
            TradeDecision::BuyNo => Some(Side::No),
            TradeDecision::Skip(_) => None,
        }
    }
}

impl fmt::Display for TradeDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeDecision::BuyYes => write!(f, "buy_yes"),
            TradeDecision::BuyNo => write!(f, "buy_no"),
            TradeDecision::Skip(r) => write!(f, "skip({r})"),
        }
    }
}

/// A scored market for one tick.
///
/// Ephemeral by design — recomputed every tick and logged for audit,
/// never the system of record. Every skip must be reconstructable from
/// this record alone (fair value, price, decision, failing gate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub market: Market,
    pub fair: FairValue,
    /// The ask on the side the decision concerns (if quoted).
    pub market_price: Option<Decimal>,
    /// `fair − price` in probability space; None for gate models.
    pub edge: Option<f64>,
    pub decision: TradeDecision,
    pub generated_at: DateTime<Utc>,
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fair = match self.fair {
            FairValue::Gate { pass, margin_f } => {
                format!("gate={} margin={margin_f:.1}°F", if pass { "pass" } else { "fail" })
            }
            FairValue::Probability(p) => format!("p={:.3}", p),
            FairValue::Undefined => "p=undef".to_string(),
        };
        let price = self
            .market_price
            .map(|p| format!("{:.0}¢", p * Decimal::from(100)))
            .unwrap_or_else(|| "-".to_string());
        let edge = self
            .edge
            .map(|e| format!("{:.1}%", e * 100.0))
            .unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "{} | {fair} | ask={price} edge={edge} | {}",
            self.market, self.decision,
        )
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// Lifecycle of a held position. Immutable once resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Pending,
    Filled,
    ResolvedWin,
    ResolvedLoss,
    Liquidated,
}

impl PositionStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PositionStatus::ResolvedWin | PositionStatus::ResolvedLoss | PositionStatus::Liquidated
        )
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PositionStatus::Pending => "pending",
            PositionStatus::Filled => "filled",
            PositionStatus::ResolvedWin => "resolved_win",
            PositionStatus::ResolvedLoss => "resolved_loss",
            PositionStatus::Liquidated => "liquidated",
        };
        write!(f, "{s}")
    }
}

/// A position created on fill confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub venue: Venue,
    pub market_id: String,
    pub side: Side,
    pub shares: u64,
    /// Limit price paid, dollars per share.
    pub price_paid: Decimal,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
}

impl Position {
    /// Capital committed to this position.
    pub fn cost(&self) -> Decimal {
        Decimal::from(self.shares) * self.price_paid
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} x{} @ {:.0}¢ ({})",
            self.venue,
            self.side,
            self.market_id,
            self.shares,
            self.price_paid * Decimal::from(100),
            self.status,
        )
    }
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Domain-specific error types for the engine.
///
/// Per-market errors (`DataUnavailable`, `ModelUndefined`) are isolated
/// to the affected market and never abort a tick. Account-level errors
/// (`AuthExpired`) halt order placement but not observation.
/// `ConfigConflict` refuses startup outright.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Data unavailable for {underlying}: {message}")]
    DataUnavailable { underlying: String, message: String },

    #[error("Model undefined: {0}")]
    ModelUndefined(String),

    #[error("Insufficient budget for {market_id}")]
    InsufficientBudget { market_id: String },

    #[error("Order rejected by {venue}: {message}")]
    VenueRejected { venue: String, message: String },

    #[error("Authentication expired on {venue}: {message}")]
    AuthExpired { venue: String, message: String },

    #[error("Configuration conflict: {0}")]
    ConfigConflict(String),

    #[error("Timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("Venue error ({venue}): {message}")]
    Venue { venue: String, message: String },
}

impl EngineError {
    /// Whether this error should halt further order placement for the
    /// owning instance (read-only scanning continues).
    pub fn halts_placement(&self) -> bool {
        matches!(self, EngineError::AuthExpired { .. })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    pub(crate) fn sample_weather_market() -> Market {
        Market {
            venue: Venue::Kalshi,
            external_id: "KXHIGHNY-26FEB14-B55".to_string(),
            title: "Highest temperature in NYC on Feb 14?".to_string(),
            contract: Contract::Threshold {
                strike_f: 55.0,
                direction: ThresholdDirection::AtOrAbove,
            },
            underlying: UnderlyingRef::Station(StationRef {
                station_id: "KNYC".to_string(),
                name: "Central Park, NYC".to_string(),
                latitude: 40.779,
                longitude: -73.969,
            }),
            resolution_source: "NWS Central Park daily climate report".to_string(),
            expiry: Utc::now() + Duration::hours(20),
            quote: Quote {
                yes_bid: Some(dec!(0.80)),
                yes_ask: Some(dec!(0.85)),
                no_bid: Some(dec!(0.15)),
                no_ask: Some(dec!(0.20)),
            },
            status: MarketStatus::Open,
        }
    }

    pub(crate) fn sample_barrier_market() -> Market {
        Market {
            venue: Venue::Polymarket,
            external_id: "0xbtc150k".to_string(),
            title: "Will Bitcoin reach $150,000 this year?".to_string(),
            contract: Contract::BarrierReach { barrier: 150_000.0 },
            underlying: UnderlyingRef::Asset(AssetRef {
                symbol: "BTCUSDT".to_string(),
                exchange: "Binance".to_string(),
            }),
            resolution_source: "Binance BTCUSDT 1-minute candles".to_string(),
            expiry: Utc::now() + Duration::days(320),
            quote: Quote {
                yes_bid: Some(dec!(0.09)),
                yes_ask: Some(dec!(0.095)),
                no_bid: Some(dec!(0.90)),
                no_ask: Some(dec!(0.91)),
            },
            status: MarketStatus::Open,
        }
    }

    // -- Side / category tests --

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Yes.opposite(), Side::No);
        assert_eq!(Side::No.opposite(), Side::Yes);
    }

    #[test]
    fn test_category_routing() {
        assert!(MarketCategory::Threshold.is_weather());
        assert!(MarketCategory::Between.is_weather());
        assert!(MarketCategory::BarrierReach.is_barrier());
        assert!(MarketCategory::BarrierDip.is_barrier());
        assert!(!MarketCategory::Threshold.is_barrier());
    }

    #[test]
    fn test_category_from_str() {
        assert_eq!(
            "threshold".parse::<MarketCategory>().unwrap(),
            MarketCategory::Threshold
        );
        assert_eq!(
            "BARRIER_REACH".parse::<MarketCategory>().unwrap(),
            MarketCategory::BarrierReach
        );
        assert!("lottery".parse::<MarketCategory>().is_err());
    }

    #[test]
    fn test_contract_category() {
        assert_eq!(
            Contract::Between { floor_f: 50.0, cap_f: 54.0 }.category(),
            MarketCategory::Between
        );
        assert_eq!(
            Contract::BarrierDip { barrier: 40_000.0 }.category(),
            MarketCategory::BarrierDip
        );
    }

    #[test]
    fn test_venue_round_trip() {
        assert_eq!("kalshi".parse::<Venue>().unwrap(), Venue::Kalshi);
        assert_eq!(format!("{}", Venue::Polymarket), "polymarket");
        assert!("nyse".parse::<Venue>().is_err());
    }

    // -- UnderlyingRef tests --

    #[test]
    fn test_underlying_key_stability() {
        let m = sample_weather_market();
        assert_eq!(m.underlying.key(), "station:KNYC");
        let b = sample_barrier_market();
        assert_eq!(b.underlying.key(), "asset:Binance:BTCUSDT");
    }

    // -- Quote tests --

    #[test]
    fn test_quote_ask_for_side() {
        let q = Quote {
            yes_bid: Some(dec!(0.40)),
            yes_ask: Some(dec!(0.45)),
            no_bid: Some(dec!(0.55)),
            no_ask: Some(dec!(0.60)),
        };
        assert_eq!(q.ask_for(Side::Yes), Some(dec!(0.45)));
        assert_eq!(q.ask_for(Side::No), Some(dec!(0.60)));
        assert_eq!(q.bid_for(Side::Yes), Some(dec!(0.40)));
    }

    // -- Market tests --

    #[test]
    fn test_market_years_to_expiry() {
        let m = sample_barrier_market();
        let t = m.years_to_expiry(Utc::now());
        assert!((t - 320.0 / 365.0).abs() < 0.01, "t = {t}");
    }

    #[test]
    fn test_market_status_accepts_orders() {
        assert!(MarketStatus::Open.accepts_orders());
        assert!(MarketStatus::AcceptingOrders.accepts_orders());
        assert!(!MarketStatus::Closed.accepts_orders());
        assert!(!MarketStatus::Resolved.accepts_orders());
    }

    #[test]
    fn test_market_serialization_round_trip() {
        let m = sample_weather_market();
        let json = serde_json::to_string(&m).unwrap();
        let parsed: Market = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.external_id, m.external_id);
        assert_eq!(parsed.category(), MarketCategory::Threshold);
    }

    // -- Decision tests --

    #[test]
    fn test_decision_side() {
        assert_eq!(TradeDecision::BuyYes.side(), Some(Side::Yes));
        assert_eq!(TradeDecision::BuyNo.side(), Some(Side::No));
        assert_eq!(TradeDecision::Skip(SkipReason::NoQuote).side(), None);
        assert!(!TradeDecision::Skip(SkipReason::InsufficientEdge).is_actionable());
    }

    #[test]
    fn test_opportunity_display_reconstructable() {
        let opp = Opportunity {
            market: sample_barrier_market(),
            fair: FairValue::Probability(0.305),
            market_price: Some(dec!(0.095)),
            edge: Some(0.21),
            decision: TradeDecision::BuyYes,
            generated_at: Utc::now(),
        };
        let line = format!("{opp}");
        assert!(line.contains("p=0.305"));
        assert!(line.contains("ask=10¢") || line.contains("ask=9¢"));
        assert!(line.contains("buy_yes"));
    }

    // -- Position tests --

    #[test]
    fn test_position_cost() {
        let p = Position {
            id: "p1".to_string(),
            venue: Venue::Kalshi,
            market_id: "m1".to_string(),
            side: Side::Yes,
            shares: 40,
            price_paid: dec!(0.85),
            opened_at: Utc::now(),
            status: PositionStatus::Filled,
        };
        assert_eq!(p.cost(), dec!(34.0));
    }

    #[test]
    fn test_position_status_terminal() {
        assert!(PositionStatus::ResolvedWin.is_terminal());
        assert!(PositionStatus::ResolvedLoss.is_terminal());
        assert!(PositionStatus::Liquidated.is_terminal());
        assert!(!PositionStatus::Pending.is_terminal());
        assert!(!PositionStatus::Filled.is_terminal());
    }

    // -- Error tests --

    #[test]
    fn test_error_display() {
        let e = EngineError::DataUnavailable {
            underlying: "station:KNYC".to_string(),
            message: "request timed out".to_string(),
        };
        assert_eq!(
            format!("{e}"),
            "Data unavailable for station:KNYC: request timed out"
        );
    }

    #[test]
    fn test_auth_expired_halts_placement() {
        let e = EngineError::AuthExpired {
            venue: "kalshi".to_string(),
            message: "signature rejected".to_string(),
        };
        assert!(e.halts_placement());
        let e2 = EngineError::VenueRejected {
            venue: "kalshi".to_string(),
            message: "price out of range".to_string(),
        };
        assert!(!e2.halts_placement());
    }
}
