//! Temperature forecast provider.
//!
//! Uses the free Open-Meteo API (no key required) for multi-day daily
//! high forecasts, keyed by station coordinate. The coordinate comes
//! from the configured resolution mapping — never from text heuristics —
//! because the venue settles against one specific station and a nearby
//! but wrong coordinate silently invalidates the safety margin.
//!
//! API: `https://api.open-meteo.com/v1/forecast`
//! Auth: None required.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::types::StationRef;

const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    #[serde(default)]
    daily: Option<OpenMeteoDaily>,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoDaily {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    temperature_2m_max: Vec<f64>,
}

/// A station's multi-day daily-high forecast, °F by date.
#[derive(Debug, Clone)]
pub struct HighForecast {
    pub station_id: String,
    pub days: Vec<(NaiveDate, f64)>,
}

impl HighForecast {
    /// The forecast high for a specific calendar date, if covered.
    pub fn high_for(&self, date: NaiveDate) -> Option<f64> {
        self.days.iter().find(|(d, _)| *d == date).map(|(_, t)| *t)
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct ForecastClient {
    http: Client,
    base_url: String,
}

impl ForecastClient {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("VANTAGE/0.1.0")
            .build()
            .context("Failed to build forecast HTTP client")?;
        Ok(Self {
            http,
            base_url: OPEN_METEO_URL.to_string(),
        })
    }

    /// Fetch the multi-day high-temperature forecast for a station.
    pub async fn fetch_highs(&self, station: &StationRef) -> Result<HighForecast> {
        debug!(station = %station.station_id, "Fetching high-temperature forecast");

        let resp = self
            .http
            .get(&self.base_url)
            .query(&[
                ("latitude", station.latitude.to_string()),
                ("longitude", station.longitude.to_string()),
                ("daily", "temperature_2m_max".to_string()),
                ("temperature_unit", "fahrenheit".to_string()),
                ("forecast_days", "14".to_string()),
                ("timezone", "auto".to_string()),
            ])
            .send()
            .await
            .context("Open-Meteo request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("Open-Meteo API error: {status}");
        }

        let data: OpenMeteoResponse = resp
            .json()
            .await
            .context("Failed to parse Open-Meteo response")?;

        let daily = data
            .daily
            .ok_or_else(|| anyhow::anyhow!("Open-Meteo response missing daily block"))?;

        let days = Self::zip_days(&daily.time, &daily.temperature_2m_max)?;
        if days.is_empty() {
            anyhow::bail!("Open-Meteo returned an empty forecast");
        }

        Ok(HighForecast {
            station_id: station.station_id.clone(),
            days,
        })
    }

    fn zip_days(times: &[String], highs: &[f64]) -> Result<Vec<(NaiveDate, f64)>> {
        times
            .iter()
            .zip(highs.iter())
            .map(|(t, &hi)| {
                let date = NaiveDate::parse_from_str(t, "%Y-%m-%d")
                    .with_context(|| format!("Bad forecast date: {t}"))?;
                Ok((date, hi))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
