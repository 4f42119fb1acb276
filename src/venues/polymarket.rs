//! Polymarket integration.
//!
//! Market discovery over the Gamma API (no auth) and order flow over the
//! CLOB API. Orders and session headers are signed locally with a
//! secp256k1 wallet key via `alloy` — the key never leaves the process.
//!
//! The venue geo-blocks the operator's region, so every request is
//! relayed through a configured egress proxy. That proxy exists for
//! connectivity only; auth still happens locally.
//!
//! Barrier terms are parsed from the market question ("Will Bitcoin
//! reach $150,000 ...?"); the asset → exchange-pair mapping comes from
//! `[resolution.assets]` and an unmapped asset is never traded.

use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Proxy};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, PolymarketConfig};
use crate::types::{
    AssetRef, Contract, EngineError, Market, MarketStatus, Quote, Side, UnderlyingRef, Venue,
};
use crate::venues::{
    map_http_error, map_transport_error, OrderAck, OrderAction, OrderRequest, OrderState,
    OrderStatus, Settlement, SettlementResult, VenueClient, VenuePosition,
};

const PAGE_LIMIT: u32 = 100;
const MAX_PAGES: u32 = 20;

// ---------------------------------------------------------------------------
// Gamma API response types (market discovery)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
struct GammaMarket {
    #[serde(default, rename = "conditionId")]
    condition_id: String,
    #[serde(default)]
    question: String,
    #[serde(default, rename = "endDate")]
    end_date: Option<String>,
    #[serde(default)]
    closed: bool,
    /// Outcome prices as a JSON string: "[\"0.095\",\"0.905\"]"
    #[serde(default, rename = "outcomePrices")]
    outcome_prices: Option<String>,
    #[serde(default, rename = "bestBid")]
    best_bid: Option<f64>,
    #[serde(default, rename = "bestAsk")]
    best_ask: Option<f64>,
    #[serde(default)]
    description: String,
}

// ---------------------------------------------------------------------------
// CLOB API types (order flow)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ClobOrderBody<'a> {
    market: &'a str,
    side: &'a str,
    outcome: &'a str,
    price: String,
    size: u64,
    order_type: &'a str,
    client_id: &'a str,
    owner: String,
    signature: String,
}

#[derive(Debug, Deserialize)]
struct ClobOrderResponse {
    #[serde(default)]
    success: bool,
    #[serde(default, rename = "orderID")]
    order_id: String,
    #[serde(default)]
    status: String,
    #[serde(default, rename = "errorMsg")]
    error_msg: String,
}

#[derive(Debug, Deserialize)]
struct ClobOrder {
    id: String,
    #[serde(default)]
    market: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    original_size: u64,
    #[serde(default)]
    size_matched: u64,
}

#[derive(Debug, Deserialize)]
struct ClobBook {
    #[serde(default)]
    bids: Vec<ClobLevel>,
    #[serde(default)]
    asks: Vec<ClobLevel>,
}

#[derive(Debug, Deserialize)]
struct ClobLevel {
    price: String,
    #[serde(default)]
    #[allow(dead_code)]
    size: String,
}

#[derive(Debug, Deserialize)]
struct ClobPosition {
    #[serde(default)]
    market: String,
    #[serde(default)]
    outcome: String,
    #[serde(default)]
    size: u64,
}

// ---------------------------------------------------------------------------
// Question parsing
// ---------------------------------------------------------------------------

/// Keyword aliases per asset key in `[resolution.assets]`.
fn asset_aliases(key: &str) -> Vec<String> {
    let mut aliases = vec![key.to_lowercase()];
    match key.to_uppercase().as_str() {
        "BTC" => aliases.push("bitcoin".to_string()),
        "ETH" => aliases.push("ethereum".to_string()),
        "SOL" => aliases.push("solana".to_string()),
        "XRP" => aliases.push("ripple".to_string()),
        _ => {}
    }
    aliases
}

/// Extract the first dollar amount from a question.
/// Handles "$150,000", "$150000.50", and "$150k"/"$1.5m" forms.
fn parse_usd_amount(text: &str) -> Option<f64> {
    let start = text.find('$')? + 1;
    let rest = &text[start..];

    let mut digits = String::new();
    let mut multiplier = 1.0;
    for c in rest.chars() {
        match c {
            '0'..='9' | '.' => digits.push(c),
            ',' => continue,
            'k' | 'K' => {
                multiplier = 1_000.0;
                break;
            }
            'm' | 'M' => {
                multiplier = 1_000_000.0;
                break;
            }
            _ => break,
        }
    }

    let value: f64 = digits.parse().ok()?;
    Some(value * multiplier)
}

/// Parse barrier terms out of a market question.
///
/// Returns the matched asset key, its `AssetRef`, and the contract.
fn parse_contract(
    question: &str,
    assets: &HashMap<String, AssetRef>,
) -> Option<(String, AssetRef, Contract)> {
    let q = question.to_lowercase();

    let (key, asset) = assets.iter().find_map(|(key, asset)| {
        asset_aliases(key)
            .iter()
            .any(|alias| q.contains(alias.as_str()))
            .then(|| (key.clone(), asset.clone()))
    })?;

    let barrier = parse_usd_amount(question)?;

    let reach_words = ["reach", "hit", "touch", "exceed", "above"];
    let dip_words = ["dip", "fall", "drop", "below"];

    let contract = if reach_words.iter().any(|w| q.contains(w)) {
        Contract::BarrierReach { barrier }
    } else if dip_words.iter().any(|w| q.contains(w)) {
        Contract::BarrierDip { barrier }
    } else {
        return None;
    };

    Some((key, asset, contract))
}

/// Parse Gamma's outcome-price string: "[\"0.65\",\"0.35\"]".
fn parse_outcome_prices(s: &str) -> Option<(f64, f64)> {
    let cleaned = s.replace(['[', ']', '"', '\\'], "");
    let parts: Vec<&str> = cleaned.split(',').map(|p| p.trim()).collect();
    if parts.len() >= 2 {
        let yes = parts[0].parse::<f64>().ok()?;
        let no = parts[1].parse::<f64>().ok()?;
        Some((yes, no))
    } else {
        None
    }
}

fn f64_price(p: f64) -> Option<Decimal> {
    Decimal::from_f64(p)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct PolymarketClient {
    http: Client,
    gamma_url: String,
    clob_url: String,
    signer: PrivateKeySigner,
    /// Asset key → exchange pair (from `[resolution.assets]`).
    assets: HashMap<String, AssetRef>,
}

impl PolymarketClient {
    pub fn new(
        cfg: &PolymarketConfig,
        assets: HashMap<String, AssetRef>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let key = SecretString::new(AppConfig::resolve_env(&cfg.private_key_env)?);
        let signer = build_signer(key.expose_secret())?;

        let mut builder = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("VANTAGE/0.1.0");

        // The venue geo-blocks direct traffic; route through the proxy.
        if let Some(proxy_env) = &cfg.egress_proxy_env {
            let proxy_url = AppConfig::resolve_env(proxy_env)?;
            builder = builder.proxy(Proxy::all(&proxy_url).context("Bad egress proxy URL")?);
            info!("Polymarket egress proxy configured");
        }

        let http = builder.build().context("Failed to build Polymarket HTTP client")?;

        Ok(Self {
            http,
            gamma_url: cfg.gamma_url.trim_end_matches('/').to_string(),
            clob_url: cfg.clob_url.trim_end_matches('/').to_string(),
            signer,
            assets,
        })
    }

    /// Session headers: the wallet signs `polymarket:{timestamp}` to
    /// prove key ownership on portfolio endpoints.
    async fn auth_headers(&self) -> Result<Vec<(String, String)>, EngineError> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let message = format!("polymarket:{timestamp}");
        let signature = self
            .signer
            .sign_message(message.as_bytes())
            .await
            .map_err(|e| EngineError::Venue {
                venue: "polymarket".to_string(),
                message: format!("auth signing failed: {e}"),
            })?;

        Ok(vec![
            ("POLY_ADDRESS".to_string(), format!("{:?}", self.signer.address())),
            (
                "POLY_SIGNATURE".to_string(),
                format!("0x{}", hex::encode(signature.as_bytes())),
            ),
            ("POLY_TIMESTAMP".to_string(), timestamp),
            ("POLY_NONCE".to_string(), "0".to_string()),
        ])
    }

    fn convert_market(&self, gm: &GammaMarket) -> Option<Market> {
        if gm.condition_id.is_empty() || gm.question.is_empty() || gm.closed {
            return None;
        }

        let (_, asset, contract) = parse_contract(&gm.question, &self.assets)?;

        let expiry = gm
            .end_date
            .as_deref()
            .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
            .map(|dt| dt.with_timezone(&Utc))?;

        let (yes_price, no_price) = gm
            .outcome_prices
            .as_deref()
            .and_then(parse_outcome_prices)
            .unwrap_or((0.5, 0.5));

        let yes_bid = gm.best_bid.and_then(f64_price);
        let yes_ask = gm
            .best_ask
            .or(Some(yes_price))
            .and_then(f64_price);
        // Binary complement for the NO side.
        let no_bid = yes_ask.map(|a| Decimal::ONE - a);
        let no_ask = yes_bid
            .map(|b| Decimal::ONE - b)
            .or_else(|| f64_price(no_price));

        Some(Market {
            venue: Venue::Polymarket,
            external_id: gm.condition_id.clone(),
            title: gm.question.clone(),
            contract,
            underlying: UnderlyingRef::Asset(asset.clone()),
            resolution_source: if gm.description.is_empty() {
                format!("{} {} price feed", asset.exchange, asset.symbol)
            } else {
                gm.description.clone()
            },
            expiry,
            quote: Quote {
                yes_bid,
                yes_ask,
                no_bid,
                no_ask,
            },
            status: MarketStatus::Open,
        })
    }

    async fn fetch_gamma_page(
        &self,
        query: &[(&str, String)],
    ) -> Result<Vec<GammaMarket>, EngineError> {
        let resp = self
            .http
            .get(format!("{}/markets", self.gamma_url))
            .query(query)
            .send()
            .await
            .map_err(|e| map_transport_error(Venue::Polymarket, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(Venue::Polymarket, status, &body));
        }
        resp.json::<Vec<GammaMarket>>()
            .await
            .map_err(|e| map_transport_error(Venue::Polymarket, e))
    }
}

fn build_signer(private_key: &str) -> Result<PrivateKeySigner> {
    let key = private_key.strip_prefix("0x").unwrap_or(private_key);
    let bytes = hex::decode(key).context("Invalid private key hex")?;
    if bytes.len() != 32 {
        anyhow::bail!("Private key must be 32 bytes, got {}", bytes.len());
    }
    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&bytes);
    PrivateKeySigner::from_bytes(&key_bytes.into()).context("Failed to create signer")
}

fn clob_order_state(status: &str) -> OrderState {
    match status.to_lowercase().as_str() {
        "matched" | "filled" => OrderState::Filled,
        "canceled" | "cancelled" => OrderState::Canceled,
        "rejected" => OrderState::Rejected,
        _ => OrderState::Resting,
    }
}

#[async_trait]
impl VenueClient for PolymarketClient {
    fn venue(&self) -> Venue {
        Venue::Polymarket
    }

    async fn open_markets(&self) -> Result<Vec<Market>, EngineError> {
        let mut all = Vec::new();

        for page in 0..MAX_PAGES {
            let query = vec![
                ("active", "true".to_string()),
                ("closed", "false".to_string()),
                ("limit", PAGE_LIMIT.to_string()),
                ("offset", (page * PAGE_LIMIT).to_string()),
            ];
            let markets = self.fetch_gamma_page(&query).await?;
            let n = markets.len();
            all.extend(markets.iter().filter_map(|gm| self.convert_market(gm)));
            if n < PAGE_LIMIT as usize {
                break;
            }
        }

        info!(count = all.len(), "Polymarket barrier markets fetched");
        Ok(all)
    }

    async fn orderbook(&self, market_id: &str) -> Result<Quote, EngineError> {
        let resp = self
            .http
            .get(format!("{}/book", self.clob_url))
            .query(&[("market", market_id)])
            .send()
            .await
            .map_err(|e| map_transport_error(Venue::Polymarket, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(Venue::Polymarket, status, &body));
        }

        let book: ClobBook = resp
            .json()
            .await
            .map_err(|e| map_transport_error(Venue::Polymarket, e))?;

        let yes_bid = book
            .bids
            .iter()
            .filter_map(|l| l.price.parse::<Decimal>().ok())
            .max();
        let yes_ask = book
            .asks
            .iter()
            .filter_map(|l| l.price.parse::<Decimal>().ok())
            .min();

        Ok(Quote {
            yes_bid,
            yes_ask,
            no_bid: yes_ask.map(|a| Decimal::ONE - a),
            no_ask: yes_bid.map(|b| Decimal::ONE - b),
        })
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, EngineError> {
        // Sign the order terms; the venue verifies against the wallet.
        let terms = format!(
            "{}:{}:{}:{}:{}",
            order.market_id, order.side, order.price, order.count, order.client_order_id
        );
        let signature = self
            .signer
            .sign_message(terms.as_bytes())
            .await
            .map_err(|e| EngineError::Venue {
                venue: "polymarket".to_string(),
                message: format!("order signing failed: {e}"),
            })?;

        let body = ClobOrderBody {
            market: &order.market_id,
            side: match order.action {
                OrderAction::Buy => "BUY",
                OrderAction::Sell => "SELL",
            },
            outcome: match order.side {
                Side::Yes => "YES",
                Side::No => "NO",
            },
            price: order.price.to_string(),
            size: order.count,
            order_type: "GTC",
            client_id: &order.client_order_id,
            owner: format!("{:?}", self.signer.address()),
            signature: format!("0x{}", hex::encode(signature.as_bytes())),
        };

        let mut req = self.http.post(format!("{}/order", self.clob_url)).json(&body);
        for (k, v) in self.auth_headers().await? {
            req = req.header(k, v);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| map_transport_error(Venue::Polymarket, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(market_id = %order.market_id, %status, "Polymarket order failed");
            return Err(map_http_error(Venue::Polymarket, status, &body));
        }

        let ack: ClobOrderResponse = resp
            .json()
            .await
            .map_err(|e| map_transport_error(Venue::Polymarket, e))?;

        if !ack.success {
            return Err(EngineError::VenueRejected {
                venue: "polymarket".to_string(),
                message: ack.error_msg,
            });
        }

        let state = clob_order_state(&ack.status);
        Ok(OrderAck {
            order_id: ack.order_id,
            filled_count: if state == OrderState::Filled { order.count } else { 0 },
            state,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), EngineError> {
        let mut req = self.http.delete(format!("{}/order/{order_id}", self.clob_url));
        for (k, v) in self.auth_headers().await? {
            req = req.header(k, v);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| map_transport_error(Venue::Polymarket, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(Venue::Polymarket, status, &body));
        }
        Ok(())
    }

    async fn order_status(&self, order_id: &str) -> Result<Option<OrderStatus>, EngineError> {
        let mut req = self.http.get(format!("{}/order/{order_id}", self.clob_url));
        for (k, v) in self.auth_headers().await? {
            req = req.header(k, v);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| map_transport_error(Venue::Polymarket, e))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(Venue::Polymarket, status, &body));
        }

        let order: ClobOrder = resp
            .json()
            .await
            .map_err(|e| map_transport_error(Venue::Polymarket, e))?;
        Ok(Some(clob_order_to_status(&order)))
    }

    async fn open_orders(&self) -> Result<Vec<OrderStatus>, EngineError> {
        let mut req = self
            .http
            .get(format!("{}/orders", self.clob_url))
            .query(&[("state", "LIVE")]);
        for (k, v) in self.auth_headers().await? {
            req = req.header(k, v);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| map_transport_error(Venue::Polymarket, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(Venue::Polymarket, status, &body));
        }

        let orders: Vec<ClobOrder> = resp
            .json()
            .await
            .map_err(|e| map_transport_error(Venue::Polymarket, e))?;
        Ok(orders.iter().map(clob_order_to_status).collect())
    }

    async fn positions(&self) -> Result<Vec<VenuePosition>, EngineError> {
        let mut req = self.http.get(format!("{}/positions", self.clob_url));
        for (k, v) in self.auth_headers().await? {
            req = req.header(k, v);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| map_transport_error(Venue::Polymarket, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(Venue::Polymarket, status, &body));
        }

        let positions: Vec<ClobPosition> = resp
            .json()
            .await
            .map_err(|e| map_transport_error(Venue::Polymarket, e))?;
        Ok(positions
            .into_iter()
            .filter(|p| p.size > 0)
            .map(|p| VenuePosition {
                market_id: p.market,
                side: if p.outcome.eq_ignore_ascii_case("yes") {
                    Side::Yes
                } else {
                    Side::No
                },
                count: p.size,
            })
            .collect())
    }

    async fn settlements(&self, market_ids: &[String]) -> Result<Vec<Settlement>, EngineError> {
        if market_ids.is_empty() {
            return Ok(Vec::new());
        }

        // Resolved markets pin the winning outcome's price to 1.
        let query = vec![
            ("condition_ids", market_ids.join(",")),
            ("closed", "true".to_string()),
            ("limit", PAGE_LIMIT.to_string()),
        ];
        let markets = self.fetch_gamma_page(&query).await?;

        Ok(markets
            .iter()
            .filter(|gm| gm.closed && market_ids.contains(&gm.condition_id))
            .filter_map(|gm| {
                let (yes, no) = gm.outcome_prices.as_deref().and_then(parse_outcome_prices)?;
                let result = if yes > 0.99 && no < 0.01 {
                    SettlementResult::Yes
                } else if no > 0.99 && yes < 0.01 {
                    SettlementResult::No
                } else {
                    debug!(market_id = %gm.condition_id, "Closed but not yet resolved");
                    return None;
                };
                let settled_at = gm
                    .end_date
                    .as_deref()
                    .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now);
                Some(Settlement {
                    market_id: gm.condition_id.clone(),
                    result,
                    settled_at,
                })
            })
            .collect())
    }
}

fn clob_order_to_status(order: &ClobOrder) -> OrderStatus {
    let state = clob_order_state(&order.status);
    OrderStatus {
        order_id: order.id.clone(),
        market_id: order.market.clone(),
        state,
        filled_count: order.size_matched,
        remaining_count: order.original_size.saturating_sub(order.size_matched),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
