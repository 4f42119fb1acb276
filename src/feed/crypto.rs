//! Crypto reference-data provider.
//!
//! Fetches spot prices and daily candles from the Binance public REST
//! API — the exchange the barrier venues' resolution rules name — and
//! derives annualized realized volatility from trailing daily closes.
//!
//! API: `https://api.binance.com/api/v3`
//! Auth: None required for market data.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::types::AssetRef;

const BINANCE_API_URL: &str = "https://api.binance.com/api/v3";

/// Trailing window for realized volatility, calendar days.
const VOL_WINDOW_DAYS: usize = 30;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TickerPrice {
    #[allow(dead_code)]
    symbol: String,
    price: String,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct CryptoClient {
    http: Client,
    base_url: String,
}

impl CryptoClient {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("VANTAGE/0.1.0")
            .build()
            .context("Failed to build crypto HTTP client")?;
        Ok(Self {
            http,
            base_url: BINANCE_API_URL.to_string(),
        })
    }

    /// Current spot price, USD.
    pub async fn fetch_spot(&self, asset: &AssetRef) -> Result<f64> {
        let url = format!("{}/ticker/price", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("symbol", asset.symbol.as_str())])
            .send()
            .await
            .context("Binance ticker request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("Binance ticker API error: {status}");
        }

        let ticker: TickerPrice = resp
            .json()
            .await
            .context("Failed to parse Binance ticker response")?;

        let spot: f64 = ticker
            .price
            .parse()
            .with_context(|| format!("Bad spot price: {}", ticker.price))?;

        debug!(symbol = %asset.symbol, spot, "Spot fetched");
        Ok(spot)
    }

    /// Annualized realized volatility from trailing daily closes.
    pub async fn fetch_volatility(&self, asset: &AssetRef) -> Result<f64> {
        let closes = self.fetch_daily_closes(asset, VOL_WINDOW_DAYS + 1).await?;
        let sigma = realized_volatility(&closes)
            .ok_or_else(|| anyhow::anyhow!("Not enough candles for {}", asset.symbol))?;
        debug!(symbol = %asset.symbol, sigma, "Realized volatility computed");
        Ok(sigma)
    }

    /// Last `limit` daily closes, oldest first.
    async fn fetch_daily_closes(&self, asset: &AssetRef, limit: usize) -> Result<Vec<f64>> {
        let url = format!("{}/klines", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("symbol", asset.symbol.as_str()),
                ("interval", "1d"),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await
            .context("Binance klines request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("Binance klines API error: {status}");
        }

        // Klines are arrays; the close is the 5th element, as a string.
        let rows: Vec<Vec<serde_json::Value>> = resp
            .json()
            .await
            .context("Failed to parse Binance klines response")?;

        rows.iter()
            .map(|row| {
                row.get(4)
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow::anyhow!("Kline row missing close"))
                    .and_then(|s| s.parse::<f64>().context("Bad close price"))
            })
            .collect()
    }
}

/// Annualized stdev of daily log returns over the close series.
///
/// Returns `None` for fewer than two closes or any non-positive close
/// (a degenerate series must read as "insufficient data", not σ = 0).
pub fn realized_volatility(closes: &[f64]) -> Option<f64> {
    if closes.len() < 2 || closes.iter().any(|&c| c <= 0.0) {
        return None;
    }

    let returns: Vec<f64> = closes.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;

    if returns.len() < 2 {
        return None;
    }
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);

    Some(variance.sqrt() * 365.0_f64.sqrt())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
