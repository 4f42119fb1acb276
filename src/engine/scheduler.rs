//! Polling scheduler.
//!
//! An explicit state machine with three named modes instead of ad hoc
//! flag/timestamp juggling:
//!
//! - `baseline` — slow polling between events
//! - `snipe_window` — fast polling around known daily market-open times,
//!   while freshly listed markets are still mispriced
//! - `spike` — fast polling for a bounded duration after a large sudden
//!   underlying move; re-triggering restarts the timer, never stacks it
//!
//! The machine is a pure function of the clock passed in: no network,
//! no global time reads, fully unit-testable.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

use crate::config::SchedulerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Baseline,
    SnipeWindow,
    Spike,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Baseline => write!(f, "baseline"),
            Mode::SnipeWindow => write!(f, "snipe_window"),
            Mode::Spike => write!(f, "spike"),
        }
    }
}

/// Snapshot of the machine for logging and alerts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SchedulerState {
    pub mode: Mode,
    pub interval_secs: u64,
    pub spike_expires_at: Option<DateTime<Utc>>,
}

pub struct Scheduler {
    baseline_interval: std::time::Duration,
    snipe_interval: std::time::Duration,
    spike_interval: std::time::Duration,
    snipe_opens: Vec<NaiveTime>,
    snipe_window: Duration,
    spike_threshold: f64,
    spike_duration: Duration,
    spike_until: Option<DateTime<Utc>>,
    last_mode: Mode,
}

impl Scheduler {
    pub fn new(cfg: &SchedulerConfig) -> anyhow::Result<Self> {
        let snipe_opens = cfg
            .snipe_open_times_utc
            .iter()
            .map(|s| {
                NaiveTime::parse_from_str(s, "%H:%M")
                    .map_err(|e| anyhow::anyhow!("Bad snipe open time {s:?}: {e}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            baseline_interval: std::time::Duration::from_secs(cfg.baseline_interval_secs),
            snipe_interval: std::time::Duration::from_secs(cfg.snipe_interval_secs),
            spike_interval: std::time::Duration::from_secs(cfg.spike_interval_secs),
            snipe_opens,
            snipe_window: Duration::seconds(cfg.snipe_window_secs as i64),
            spike_threshold: cfg.spike_threshold,
            spike_duration: Duration::seconds(cfg.spike_duration_secs as i64),
            spike_until: None,
            last_mode: Mode::Baseline,
        })
    }

    /// The time-derived mode, ignoring any active spike.
    fn base_mode(&self, now: DateTime<Utc>) -> Mode {
        let t = now.time();
        let in_window = self.snipe_opens.iter().any(|open| {
            let elapsed = t.signed_duration_since(*open);
            elapsed >= Duration::zero() && elapsed < self.snipe_window
        });
        if in_window {
            Mode::SnipeWindow
        } else {
            Mode::Baseline
        }
    }

    /// Current mode. An expired spike reverts to whatever the clock says
    /// the mode should be — the "previous state" under continuous
    /// triggering, without storing history.
    pub fn mode(&mut self, now: DateTime<Utc>) -> Mode {
        if let Some(until) = self.spike_until {
            if now < until {
                return self.transition(Mode::Spike, now);
            }
            self.spike_until = None;
        }
        let mode = self.base_mode(now);
        self.transition(mode, now)
    }

    fn transition(&mut self, mode: Mode, now: DateTime<Utc>) -> Mode {
        if mode != self.last_mode {
            info!(
                from = %self.last_mode,
                to = %mode,
                at = %now,
                "Scheduler mode transition"
            );
            self.last_mode = mode;
        }
        mode
    }

    /// Polling interval for the current mode.
    pub fn current_interval(&mut self, now: DateTime<Utc>) -> std::time::Duration {
        match self.mode(now) {
            Mode::Baseline => self.baseline_interval,
            Mode::SnipeWindow => self.snipe_interval,
            Mode::Spike => self.spike_interval,
        }
    }

    /// Whether the clock sits inside a snipe window (spike does not
    /// count: bucket entries key off market-open timing, not volatility).
    pub fn in_snipe_window(&self, now: DateTime<Utc>) -> bool {
        self.base_mode(now) == Mode::SnipeWindow
    }

    /// Report an underlying reading pair (previous tick → this tick).
    /// A move at or beyond the spike threshold arms — or re-arms — the
    /// bounded spike timer. Returns true when a spike was (re)triggered.
    pub fn record_move(&mut self, now: DateTime<Utc>, previous: f64, current: f64) -> bool {
        if previous <= 0.0 || !current.is_finite() {
            return false;
        }
        let moved = ((current - previous) / previous).abs();
        if moved < self.spike_threshold {
            return false;
        }

        // Restart, never stack: an already-armed timer is overwritten.
        let until = now + self.spike_duration;
        warn!(
            moved_pct = format!("{:.2}%", moved * 100.0),
            until = %until,
            "Underlying spike detected; fast polling armed"
        );
        self.spike_until = Some(until);
        true
    }

    pub fn state(&mut self, now: DateTime<Utc>) -> SchedulerState {
        let mode = self.mode(now);
        let interval_secs = match mode {
            Mode::Baseline => self.baseline_interval.as_secs(),
            Mode::SnipeWindow => self.snipe_interval.as_secs(),
            Mode::Spike => self.spike_interval.as_secs(),
        };
        SchedulerState {
            mode,
            interval_secs,
            spike_expires_at: self.spike_until,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
