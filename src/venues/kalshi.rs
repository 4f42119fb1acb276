//! Kalshi integration.
//!
//! Market discovery and order placement over the Kalshi trade API.
//! Every request carries an RSA-PSS(SHA-256) signature over
//! `timestamp + method + path` (query string excluded), base64-encoded
//! in the `KALSHI-ACCESS-*` headers.
//!
//! Temperature markets settle against a specific NWS station; the
//! ticker-prefix → station mapping comes from configuration and a market
//! with no mapping is never traded.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::pss::{BlindedSigningKey, Signature};
use rsa::sha2::Sha256;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::RsaPrivateKey;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, KalshiConfig};
use crate::types::{
    Contract, EngineError, Market, MarketStatus, Quote, Side, StationRef, ThresholdDirection,
    UnderlyingRef, Venue,
};
use crate::venues::{
    map_http_error, map_transport_error, OrderAck, OrderAction, OrderRequest, OrderState,
    OrderStatus, Settlement, SettlementResult, VenueClient, VenuePosition,
};

const PAGE_LIMIT: u32 = 200;
/// Hard stop on pagination; the open-market universe never approaches this.
const MAX_PAGES: u32 = 25;

// ---------------------------------------------------------------------------
// Request signing
// ---------------------------------------------------------------------------

/// API credentials plus the parsed RSA private key.
///
/// Signature format: `RSA-PSS(SHA256, timestamp + method + path)` → base64.
/// The path must NOT include query parameters.
#[derive(Clone)]
pub struct RequestSigner {
    api_key: String,
    signing_key: BlindedSigningKey<Sha256>,
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("api_key", &self.api_key)
            .field("signing_key", &"<redacted>")
            .finish()
    }
}

impl RequestSigner {
    /// Create from an API key id and a PEM-encoded private key string.
    ///
    /// The PEM may contain literal `\n` (two chars) instead of real
    /// newlines; both forms are accepted.
    pub fn new(api_key: &str, pem: &str) -> Result<Self> {
        let pem = pem.replace("\\n", "\n");
        let pem = pem.trim();

        let private_key = RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .context("Failed to parse Kalshi RSA private key")?;

        Ok(Self {
            api_key: api_key.to_string(),
            signing_key: BlindedSigningKey::<Sha256>::new(private_key),
        })
    }

    /// Sign a request, returning `(timestamp_ms, base64_signature)`.
    pub fn sign(&self, method: &str, path: &str) -> (String, String) {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let path_clean = path.split('?').next().unwrap_or(path);
        let message = format!("{timestamp}{method}{path_clean}");

        let mut rng = rand::thread_rng();
        let signature: Signature = self
            .signing_key
            .sign_with_rng(&mut rng, message.as_bytes());
        let sig_b64 = base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());

        (timestamp, sig_b64)
    }

    fn headers(&self, method: &str, path: &str) -> Result<reqwest::header::HeaderMap, EngineError> {
        let (timestamp, signature) = self.sign(method, path);
        let mut headers = reqwest::header::HeaderMap::new();
        let bad_header = |what: &str| EngineError::Venue {
            venue: "kalshi".to_string(),
            message: format!("could not build {what} header"),
        };
        headers.insert(
            "KALSHI-ACCESS-KEY",
            self.api_key.parse().map_err(|_| bad_header("key"))?,
        );
        headers.insert(
            "KALSHI-ACCESS-TIMESTAMP",
            timestamp.parse().map_err(|_| bad_header("timestamp"))?,
        );
        headers.insert(
            "KALSHI-ACCESS-SIGNATURE",
            signature.parse().map_err(|_| bad_header("signature"))?,
        );
        Ok(headers)
    }
}

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MarketsPage {
    #[serde(default)]
    markets: Vec<ApiMarket>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
struct ApiMarket {
    ticker: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    yes_bid: Option<i64>,
    #[serde(default)]
    yes_ask: Option<i64>,
    #[serde(default)]
    no_bid: Option<i64>,
    #[serde(default)]
    no_ask: Option<i64>,
    #[serde(default)]
    close_time: Option<DateTime<Utc>>,
    #[serde(default)]
    strike_type: Option<String>,
    #[serde(default)]
    floor_strike: Option<f64>,
    #[serde(default)]
    cap_strike: Option<f64>,
    #[serde(default)]
    rules_primary: String,
}

#[derive(Debug, Deserialize)]
struct OrderEnvelope {
    order: ApiOrder,
}

#[derive(Debug, Deserialize)]
struct ApiOrder {
    order_id: String,
    #[serde(default)]
    ticker: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    fill_count: u64,
    #[serde(default)]
    remaining_count: u64,
}

#[derive(Debug, Deserialize)]
struct OrdersPage {
    #[serde(default)]
    orders: Vec<ApiOrder>,
}

#[derive(Debug, Deserialize)]
struct PositionsPage {
    #[serde(default)]
    market_positions: Vec<ApiPosition>,
}

#[derive(Debug, Deserialize)]
struct ApiPosition {
    ticker: String,
    /// Signed: positive = YES contracts, negative = NO.
    #[serde(default)]
    position: i64,
}

#[derive(Debug, Deserialize)]
struct SettlementsPage {
    #[serde(default)]
    settlements: Vec<ApiSettlement>,
}

#[derive(Debug, Deserialize)]
struct ApiSettlement {
    ticker: String,
    #[serde(default)]
    market_result: String,
    #[serde(default)]
    settled_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    ticker: &'a str,
    client_order_id: &'a str,
    side: &'a str,
    action: &'a str,
    count: u64,
    r#type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    yes_price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    no_price: Option<i64>,
}

// ---------------------------------------------------------------------------
// Price conversions (venue quotes in cents)
// ---------------------------------------------------------------------------

fn cents_to_price(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

fn price_to_cents(price: Decimal) -> i64 {
    (price * Decimal::from(100)).round().to_i64().unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct KalshiClient {
    http: Client,
    base_url: String,
    /// Path portion of `base_url`, prepended to endpoints when signing.
    base_path: String,
    signer: RequestSigner,
    /// Ticker-prefix → settlement station (from `[resolution.stations]`).
    stations: HashMap<String, StationRef>,
}

impl KalshiClient {
    pub fn new(
        cfg: &KalshiConfig,
        stations: HashMap<String, StationRef>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let api_key = AppConfig::resolve_env(&cfg.api_key_env)?;
        let pem = SecretString::new(AppConfig::resolve_env(&cfg.private_key_env)?);
        let signer = RequestSigner::new(&api_key, pem.expose_secret())?;

        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("VANTAGE/0.1.0")
            .build()
            .context("Failed to build Kalshi HTTP client")?;

        let base_url = cfg.base_url.trim_end_matches('/').to_string();
        let base_path = reqwest::Url::parse(&base_url)
            .context("Bad Kalshi base URL")?
            .path()
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http,
            base_url,
            base_path,
            signer,
            stations,
        })
    }

    /// The configured station a ticker settles against, by longest
    /// matching series prefix. `None` means the market is untradeable:
    /// without the mapping the resolution authority is unknown.
    fn station_for(&self, ticker: &str) -> Option<&StationRef> {
        self.stations
            .iter()
            .filter(|(prefix, _)| ticker.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, station)| station)
    }

    fn convert_market(&self, api: &ApiMarket) -> Option<Market> {
        let station = match self.station_for(&api.ticker) {
            Some(s) => s,
            None => {
                debug!(ticker = %api.ticker, "No station mapping; skipping market");
                return None;
            }
        };

        let contract = match api.strike_type.as_deref() {
            Some("greater") | Some("greater_or_equal") => Contract::Threshold {
                strike_f: api.floor_strike?,
                direction: ThresholdDirection::AtOrAbove,
            },
            Some("less") | Some("less_or_equal") => Contract::Threshold {
                strike_f: api.cap_strike?,
                direction: ThresholdDirection::AtOrBelow,
            },
            Some("between") => Contract::Between {
                floor_f: api.floor_strike?,
                cap_f: api.cap_strike?,
            },
            _ => {
                debug!(ticker = %api.ticker, strike_type = ?api.strike_type, "Unsupported strike type");
                return None;
            }
        };

        let status = match api.status.as_str() {
            "open" => MarketStatus::Open,
            "active" => MarketStatus::AcceptingOrders,
            "settled" | "finalized" => MarketStatus::Resolved,
            _ => MarketStatus::Closed,
        };

        let resolution_source = if api.rules_primary.is_empty() {
            format!("NWS {} ({}) daily climate report", station.name, station.station_id)
        } else {
            api.rules_primary.clone()
        };

        Some(Market {
            venue: Venue::Kalshi,
            external_id: api.ticker.clone(),
            title: api.title.clone(),
            contract,
            underlying: UnderlyingRef::Station(station.clone()),
            resolution_source,
            expiry: api.close_time?,
            quote: Quote {
                yes_bid: api.yes_bid.map(cents_to_price),
                yes_ask: api.yes_ask.map(cents_to_price),
                no_bid: api.no_bid.map(cents_to_price),
                no_ask: api.no_ask.map(cents_to_price),
            },
            status,
        })
    }

    async fn get_signed<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T, EngineError> {
        let path = format!("{}{}", self.base_path, endpoint.split('?').next().unwrap_or(endpoint));
        let headers = self.signer.headers("GET", &path)?;

        let resp = self
            .http
            .get(format!("{}{}", self.base_url, endpoint))
            .headers(headers)
            .query(query)
            .send()
            .await
            .map_err(|e| map_transport_error(Venue::Kalshi, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(Venue::Kalshi, status, &body));
        }
        resp.json::<T>()
            .await
            .map_err(|e| map_transport_error(Venue::Kalshi, e))
    }
}

#[async_trait]
impl VenueClient for KalshiClient {
    fn venue(&self) -> Venue {
        Venue::Kalshi
    }

    async fn open_markets(&self) -> Result<Vec<Market>, EngineError> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;

        for _page in 0..MAX_PAGES {
            let mut query = vec![
                ("status", "open".to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            if let Some(c) = &cursor {
                query.push(("cursor", c.clone()));
            }

            let page: MarketsPage = self.get_signed("/markets", &query).await?;
            all.extend(page.markets.iter().filter_map(|m| self.convert_market(m)));

            match page.cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }

        info!(count = all.len(), "Kalshi open markets fetched");
        Ok(all)
    }

    async fn orderbook(&self, market_id: &str) -> Result<Quote, EngineError> {
        // The markets endpoint already carries best bid/ask per side;
        // querying one ticker keeps it fresh without a depth parse.
        let page: MarketsPage = self
            .get_signed("/markets", &[("tickers", market_id.to_string())])
            .await?;
        let api = page.markets.first().ok_or_else(|| EngineError::Venue {
            venue: "kalshi".to_string(),
            message: format!("market {market_id} not found"),
        })?;
        Ok(Quote {
            yes_bid: api.yes_bid.map(cents_to_price),
            yes_ask: api.yes_ask.map(cents_to_price),
            no_bid: api.no_bid.map(cents_to_price),
            no_ask: api.no_ask.map(cents_to_price),
        })
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, EngineError> {
        let endpoint = "/portfolio/orders";
        let path = format!("{}{}", self.base_path, endpoint);
        let headers = self.signer.headers("POST", &path)?;

        let cents = price_to_cents(order.price);
        let body = CreateOrderBody {
            ticker: &order.market_id,
            client_order_id: &order.client_order_id,
            side: match order.side {
                Side::Yes => "yes",
                Side::No => "no",
            },
            action: match order.action {
                OrderAction::Buy => "buy",
                OrderAction::Sell => "sell",
            },
            count: order.count,
            r#type: "limit",
            yes_price: matches!(order.side, Side::Yes).then_some(cents),
            no_price: matches!(order.side, Side::No).then_some(cents),
        };

        let resp = self
            .http
            .post(format!("{}{}", self.base_url, endpoint))
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(Venue::Kalshi, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(market_id = %order.market_id, %status, "Kalshi order failed");
            return Err(map_http_error(Venue::Kalshi, status, &body));
        }

        let envelope: OrderEnvelope = resp
            .json()
            .await
            .map_err(|e| map_transport_error(Venue::Kalshi, e))?;

        Ok(OrderAck {
            order_id: envelope.order.order_id,
            state: order_state(&envelope.order.status),
            filled_count: envelope.order.fill_count,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), EngineError> {
        let endpoint = format!("/portfolio/orders/{order_id}");
        let path = format!("{}{}", self.base_path, endpoint);
        let headers = self.signer.headers("DELETE", &path)?;

        let resp = self
            .http
            .delete(format!("{}{}", self.base_url, endpoint))
            .headers(headers)
            .send()
            .await
            .map_err(|e| map_transport_error(Venue::Kalshi, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(Venue::Kalshi, status, &body));
        }
        Ok(())
    }

    async fn order_status(&self, order_id: &str) -> Result<Option<OrderStatus>, EngineError> {
        let endpoint = format!("/portfolio/orders/{order_id}");
        let path = format!("{}{}", self.base_path, endpoint);
        let headers = self.signer.headers("GET", &path)?;

        let resp = self
            .http
            .get(format!("{}{}", self.base_url, endpoint))
            .headers(headers)
            .send()
            .await
            .map_err(|e| map_transport_error(Venue::Kalshi, e))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(Venue::Kalshi, status, &body));
        }

        let envelope: OrderEnvelope = resp
            .json()
            .await
            .map_err(|e| map_transport_error(Venue::Kalshi, e))?;
        Ok(Some(api_order_to_status(&envelope.order)))
    }

    async fn open_orders(&self) -> Result<Vec<OrderStatus>, EngineError> {
        let page: OrdersPage = self
            .get_signed("/portfolio/orders", &[("status", "resting".to_string())])
            .await?;
        Ok(page.orders.iter().map(api_order_to_status).collect())
    }

    async fn positions(&self) -> Result<Vec<VenuePosition>, EngineError> {
        let page: PositionsPage = self.get_signed("/portfolio/positions", &[]).await?;
        Ok(page
            .market_positions
            .iter()
            .filter(|p| p.position != 0)
            .map(|p| VenuePosition {
                market_id: p.ticker.clone(),
                side: if p.position > 0 { Side::Yes } else { Side::No },
                count: p.position.unsigned_abs(),
            })
            .collect())
    }

    async fn settlements(&self, market_ids: &[String]) -> Result<Vec<Settlement>, EngineError> {
        let page: SettlementsPage = self.get_signed("/portfolio/settlements", &[]).await?;
        Ok(page
            .settlements
            .into_iter()
            .filter(|s| market_ids.contains(&s.ticker))
            .filter_map(|s| {
                let result = match s.market_result.as_str() {
                    "yes" => SettlementResult::Yes,
                    "no" => SettlementResult::No,
                    _ => return None,
                };
                Some(Settlement {
                    market_id: s.ticker,
                    result,
                    settled_at: s.settled_time.unwrap_or_else(Utc::now),
                })
            })
            .collect())
    }
}

fn order_state(status: &str) -> OrderState {
    match status {
        "executed" | "filled" => OrderState::Filled,
        "canceled" | "cancelled" => OrderState::Canceled,
        "rejected" => OrderState::Rejected,
        _ => OrderState::Resting,
    }
}

fn api_order_to_status(order: &ApiOrder) -> OrderStatus {
    OrderStatus {
        order_id: order.order_id.clone(),
        market_id: order.ticker.clone(),
        state: order_state(&order.status),
        filled_count: order.fill_count,
        remaining_count: order.remaining_count,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
