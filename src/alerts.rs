//! Alert sink.
//!
//! Every buy/skip decision, rejection, and scheduler mode transition
//! emits a structured event. `notify` never blocks and never fails the
//! caller: events go into an unbounded channel drained by a background
//! task that forwards to Telegram when configured and logs otherwise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{AlertsConfig, AppConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    Decision,
    OrderPlaced,
    OrderRejected,
    ModeChange,
    AuthFailure,
    Drain,
}

/// A structured event for the external alerting collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub instance: String,
    pub market_id: Option<String>,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl AlertEvent {
    pub fn new(kind: AlertKind, instance: &str, market_id: Option<&str>, message: String) -> Self {
        Self {
            kind,
            instance: instance.to_string(),
            market_id: market_id.map(str::to_string),
            message,
            at: Utc::now(),
        }
    }
}

/// Cheap cloneable handle; dropping every handle stops the forwarder.
#[derive(Clone)]
pub struct AlertSink {
    tx: mpsc::UnboundedSender<AlertEvent>,
}

impl AlertSink {
    /// Fire-and-forget. Errors (forwarder gone) are swallowed — alerting
    /// must never take the trading loop down.
    pub fn notify(&self, event: AlertEvent) {
        let _ = self.tx.send(event);
    }

    /// A sink whose events go nowhere (tests).
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }
}

struct TelegramTarget {
    http: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

/// Spawn the forwarding task and return the shared handle.
pub fn spawn_sink(cfg: &AlertsConfig) -> AlertSink {
    let (tx, mut rx) = mpsc::unbounded_channel::<AlertEvent>();

    let telegram = build_telegram(cfg);
    if telegram.is_none() {
        info!("No Telegram alert target configured; events will be logged only");
    }

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            debug!(kind = ?event.kind, instance = %event.instance, "Alert event");
            if let Some(target) = &telegram {
                forward_to_telegram(target, &event).await;
            } else {
                info!(
                    kind = ?event.kind,
                    instance = %event.instance,
                    market_id = ?event.market_id,
                    "{}", event.message
                );
            }
        }
    });

    AlertSink { tx }
}

fn build_telegram(cfg: &AlertsConfig) -> Option<TelegramTarget> {
    let token_env = cfg.telegram_bot_token_env.as_deref()?;
    let chat_env = cfg.telegram_chat_id_env.as_deref()?;
    let bot_token = AppConfig::resolve_env(token_env).ok()?;
    let chat_id = AppConfig::resolve_env(chat_env).ok()?;
    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .ok()?;
    Some(TelegramTarget {
        http,
        bot_token,
        chat_id,
    })
}

async fn forward_to_telegram(target: &TelegramTarget, event: &AlertEvent) {
    let text = format!(
        "[{:?}] {} {} — {}",
        event.kind,
        event.instance,
        event.market_id.as_deref().unwrap_or("-"),
        event.message,
    );
    let url = format!("https://api.telegram.org/bot{}/sendMessage", target.bot_token);
    let result = target
        .http
        .post(&url)
        .json(&serde_json::json!({ "chat_id": target.chat_id, "text": text }))
        .send()
        .await;

    if let Err(e) = result {
        // Alerting is best-effort by contract.
        warn!(error = %e, "Telegram alert delivery failed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
