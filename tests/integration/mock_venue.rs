//! Scripted venue and feed for pipeline tests.
//!
//! The mock venue serves a fixed market list, records every order it
//! receives, and replays scripted settlement events. The stub feed
//! returns canned forecasts/spot/volatility per underlying and can be
//! told to fail for one underlying to exercise failure isolation.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use vantage::types::{
    AssetRef, Contract, EngineError, Market, MarketStatus, Quote, StationRef,
    ThresholdDirection, UnderlyingRef, Venue,
};
use vantage::feed::FeedSource;
use vantage::venues::{
    OrderAck, OrderRequest, OrderState, OrderStatus, Settlement, VenueClient, VenuePosition,
};

// ---------------------------------------------------------------------------
// Market builders
// ---------------------------------------------------------------------------

pub fn nyc_station() -> StationRef {
    StationRef {
        station_id: "KNYC".to_string(),
        name: "Central Park, NYC".to_string(),
        latitude: 40.779,
        longitude: -73.969,
    }
}

pub fn btc_asset() -> AssetRef {
    AssetRef {
        symbol: "BTCUSDT".to_string(),
        exchange: "Binance".to_string(),
    }
}

pub fn threshold_market(id: &str, strike_f: f64) -> Market {
    Market {
        venue: Venue::Kalshi,
        external_id: id.to_string(),
        title: format!("High temp at or above {strike_f}°F?"),
        contract: Contract::Threshold {
            strike_f,
            direction: ThresholdDirection::AtOrAbove,
        },
        underlying: UnderlyingRef::Station(nyc_station()),
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

pub fn barrier_market(id: &str, barrier: f64, yes_ask: Decimal) -> Market {
    Market {
        venue: Venue::Polymarket,
        external_id: id.to_string(),
        title: format!("Will Bitcoin reach ${barrier}?"),
        contract: Contract::BarrierReach { barrier },
        underlying: UnderlyingRef::Asset(btc_asset()),
        resolution_source: "Binance BTCUSDT".to_string(),
        expiry: Utc::now() + Duration::days(320),
        quote: Quote {
            yes_bid: Some(yes_ask - dec!(0.005)),
            yes_ask: Some(yes_ask),
            no_bid: Some(dec!(0.99) - yes_ask),
            no_ask: Some(Decimal::ONE - yes_ask + dec!(0.005)),
        },
        status: MarketStatus::Open,
    }
}

// ---------------------------------------------------------------------------
// Mock venue
// ---------------------------------------------------------------------------

pub struct MockVenue {
    pub venue: Venue,
    pub markets: Mutex<Vec<Market>>,
    pub placed: Mutex<Vec<OrderRequest>>,
    pub place_calls: AtomicU32,
    /// Error every place_order call returns, if set.
    pub place_error: Mutex<Option<EngineError>>,
    pub settlements: Mutex<Vec<Settlement>>,
    pub resting: Mutex<Vec<OrderStatus>>,
    pub cancelled: Mutex<Vec<String>>,
}

impl MockVenue {
    pub fn new(venue: Venue, markets: Vec<Market>) -> Self {
        Self {
            venue,
            markets: Mutex::new(markets),
            placed: Mutex::new(Vec::new()),
            place_calls: AtomicU32::new(0),
            place_error: Mutex::new(None),
            settlements: Mutex::new(Vec::new()),
            resting: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    pub fn placed_orders(&self) -> Vec<OrderRequest> {
        self.placed.lock().unwrap().clone()
    }
}

#[async_trait]
impl VenueClient for MockVenue {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn open_markets(&self) -> Result<Vec<Market>, EngineError> {
        Ok(self.markets.lock().unwrap().clone())
    }

    async fn orderbook(&self, market_id: &str) -> Result<Quote, EngineError> {
        self.markets
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.external_id == market_id)
            .map(|m| m.quote)
            .ok_or_else(|| EngineError::Venue {
                venue: self.venue.to_string(),
                message: format!("unknown market {market_id}"),
            })
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, EngineError> {
        self.place_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.place_error.lock().unwrap().take() {
            return Err(err);
        }
        self.placed.lock().unwrap().push(order.clone());
        Ok(OrderAck {
            order_id: format!("ord-{}", order.client_order_id),
            state: OrderState::Filled,
            filled_count: order.count,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), EngineError> {
        self.cancelled.lock().unwrap().push(order_id.to_string());
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

    async fn settlements(&self, market_ids: &[String]) -> Result<Vec<Settlement>, EngineError> {
        Ok(self
            .settlements
            .lock()
            .unwrap()
            .iter()
            .filter(|s| market_ids.contains(&s.market_id))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Stub feed
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StubFeed {
    /// station_id → forecast high (°F), served for every date.
    pub highs: Mutex<HashMap<String, f64>>,
    /// symbol → (spot, sigma).
    pub crypto: Mutex<HashMap<String, (f64, f64)>>,
    /// Underlyings whose lookups fail this run.
    pub failing: Mutex<Vec<String>>,
    pub invalidated: Mutex<Vec<String>>,
}

impl StubFeed {
    pub fn with_high(station_id: &str, high_f: f64) -> Self {
        let feed = Self::default();
        feed.highs
            .lock()
            .unwrap()
            .insert(station_id.to_string(), high_f);
        feed
    }

    pub fn with_crypto(symbol: &str, spot: f64, sigma: f64) -> Self {
        let feed = Self::default();
        feed.crypto
            .lock()
            .unwrap()
            .insert(symbol.to_string(), (spot, sigma));
        feed
    }

    fn is_failing(&self, key: &str) -> bool {
        self.failing.lock().unwrap().iter().any(|k| k == key)
    }
}

#[async_trait]
impl FeedSource for StubFeed {
    async fn forecast_high(
        &self,
        station: &StationRef,
        _date: NaiveDate,
    ) -> Result<f64, EngineError> {
        if self.is_failing(&station.station_id) {
            return Err(EngineError::DataUnavailable {
                underlying: format!("station:{}", station.station_id),
                message: "scripted failure".to_string(),
            });
        }
        self.highs
            .lock()
            .unwrap()
            .get(&station.station_id)
            .copied()
            .ok_or_else(|| EngineError::DataUnavailable {
                underlying: format!("station:{}", station.station_id),
                message: "no scripted forecast".to_string(),
            })
    }

    async fn spot(&self, asset: &AssetRef) -> Result<f64, EngineError> {
        if self.is_failing(&asset.symbol) {
            return Err(EngineError::DataUnavailable {
                underlying: format!("asset:{}", asset.symbol),
                message: "scripted failure".to_string(),
            });
        }
        self.crypto
            .lock()
            .unwrap()
            .get(&asset.symbol)
            .map(|(spot, _)| *spot)
            .ok_or_else(|| EngineError::DataUnavailable {
                underlying: format!("asset:{}", asset.symbol),
                message: "no scripted spot".to_string(),
            })
    }

    async fn volatility(&self, asset: &AssetRef) -> Result<f64, EngineError> {
        self.crypto
            .lock()
            .unwrap()
            .get(&asset.symbol)
            .map(|(_, sigma)| *sigma)
            .ok_or_else(|| EngineError::DataUnavailable {
                underlying: format!("asset:{}", asset.symbol),
                message: "no scripted volatility".to_string(),
            })
    }

    fn invalidate(&self, underlying_key: &str) {
        self.invalidated
            .lock()
            .unwrap()
            .push(underlying_key.to_string());
    }
}
