//! End-to-end pipeline scenarios against the scripted venue and feed.

use chrono::{Timelike, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use vantage::alerts::AlertSink;
use vantage::config::{
    BarrierModelConfig, ModelConfig, SchedulerConfig, ThresholdModelConfig,
};
use vantage::engine::executor::{ExecutionConfig, ExecutionEngine};
use vantage::engine::ledger::{BudgetLedger, LedgerCaps};
use vantage::engine::positions::PositionBook;
use vantage::engine::scanner::OpportunityScanner;
use vantage::engine::scheduler::Scheduler;
use vantage::engine::StrategyInstance;
use vantage::feed::FeedSource;
use vantage::storage;
use vantage::types::{Contract, EngineError, MarketCategory, Side, Venue};
use vantage::venues::{OrderAction, OrderState, OrderStatus, Settlement, SettlementResult, VenueClient};

use crate::mock_venue::{barrier_market, threshold_market, MockVenue, StubFeed};

fn model_config() -> ModelConfig {
    ModelConfig {
        threshold: ThresholdModelConfig {
            safety_margin_f: 5.0,
            proximity_bound_f: 2.0,
            limit_price: dec!(0.90),
        },
        barrier: BarrierModelConfig {
            min_edge: 0.05,
            min_price: dec!(0.01),
            max_price: dec!(0.15),
        },
    }
}

fn scheduler_config(snipe_opens: Vec<String>) -> SchedulerConfig {
    SchedulerConfig {
        baseline_interval_secs: 45,
        snipe_interval_secs: 3,
        spike_interval_secs: 5,
        snipe_open_times_utc: snipe_opens,
        snipe_window_secs: 420,
        spike_threshold: 0.02,
        spike_duration_secs: 180,
    }
}

fn temp_state_file() -> String {
    let mut p = std::env::temp_dir();
    p.push(format!("vantage_it_{}.json", uuid::Uuid::new_v4()));
    p.to_string_lossy().to_string()
}

struct Harness {
    instance: StrategyInstance,
    venue: Arc<MockVenue>,
    ledger: Arc<BudgetLedger>,
    state_file: String,
}

fn harness(
    venue: MockVenue,
    feed: StubFeed,
    categories: Vec<MarketCategory>,
    snipe_opens: Vec<String>,
) -> Harness {
    let venue = Arc::new(venue);
    let feed: Arc<dyn FeedSource> = Arc::new(feed);
    let ledger = Arc::new(BudgetLedger::new(LedgerCaps {
        global_cap: dec!(500),
        per_market_cap: dec!(50),
    }));

    let scanner = OpportunityScanner::new(
        Arc::clone(&venue) as Arc<dyn VenueClient>,
        Arc::clone(&feed),
        categories,
        model_config(),
        30,
    );
    let scheduler = Scheduler::new(&scheduler_config(snipe_opens)).unwrap();
    let executor = ExecutionEngine::new(
        Arc::clone(&venue) as Arc<dyn VenueClient>,
        ExecutionConfig {
            min_lot: 1,
            threshold_limit_price: dec!(0.90),
            max_order_attempts: 2,
            order_timeout_secs: 5,
            dry_run: false,
        },
    );

    let state_file = temp_state_file();
    let instance = StrategyInstance::new(
        "it-instance".to_string(),
        Arc::clone(&venue) as Arc<dyn VenueClient>,
        feed,
        scanner,
        scheduler,
        Arc::clone(&ledger),
        executor,
        PositionBook::new(),
        AlertSink::disabled(),
        dec!(50),
        state_file.clone(),
    );

    Harness {
        instance,
        venue,
        ledger,
        state_file,
    }
}

/// Scenario: threshold = 55°F-or-higher, forecast = 62°F, safety
/// margin = 5° → buy_yes, GTC order at the configured price, and a
/// reservation within the per-market cap.
#[tokio::test]
async fn e2e_threshold_slam_dunk_buys_at_configured_price() {
    let venue = MockVenue::new(
        Venue::Kalshi,
        vec![threshold_market("KXHIGHNY-26FEB14-T55", 55.0)],
    );
    let feed = StubFeed::with_high("KNYC", 62.0);
    let mut h = harness(venue, feed, vec![MarketCategory::Threshold], vec![]);

    let report = h.instance.tick().await.unwrap();
    assert_eq!(report.markets_scanned, 1);
    assert_eq!(report.qualifying, 1);
    assert_eq!(report.orders_placed, 1);

    let orders = h.venue.placed_orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].side, Side::Yes);
    assert_eq!(orders[0].action, OrderAction::Buy);
    // Fixed configured price, not the 85¢ live ask.
    assert_eq!(orders[0].price, dec!(0.90));
    // 50 / 0.90 → 55 shares.
    assert_eq!(orders[0].count, 55);

    // Reservation trimmed to spend and within the per-market cap.
    assert_eq!(h.ledger.committed(), dec!(49.50));
    assert!(h.ledger.committed() <= dec!(50));

    // The position survives a restart via the state file.
    let book = storage::load_book(Some(&h.state_file)).unwrap().unwrap();
    assert!(book.holds("KXHIGHNY-26FEB14-T55"));
    storage::delete_book(Some(&h.state_file)).unwrap();
}

/// Margin below the safety margin never buys.
#[tokio::test]
async fn e2e_threshold_below_margin_skips() {
    let venue = MockVenue::new(
        Venue::Kalshi,
        vec![threshold_market("KXHIGHNY-26FEB14-T60", 60.0)],
    );
    // Forecast clears the strike by only 2°F.
    let feed = StubFeed::with_high("KNYC", 62.0);
    let mut h = harness(venue, feed, vec![MarketCategory::Threshold], vec![]);

    let report = h.instance.tick().await.unwrap();
    assert_eq!(report.qualifying, 0);
    assert!(h.venue.placed_orders().is_empty());
    assert_eq!(h.ledger.committed(), Decimal::ZERO);
    storage::delete_book(Some(&h.state_file)).unwrap();
}

/// Scenario: reach barrier $150,000, S = $70,239, σ = 0.79,
/// T = 320/365, ask = $0.095, min_edge = 0.05 → P ≈ 0.305, edge ≈ 0.21
/// → buy at the live best ask. Perturbing the ask to $0.26 flips the
/// decision to skip.
#[tokio::test]
async fn e2e_barrier_reference_scenario_both_branches() {
    // Buy branch.
    let venue = MockVenue::new(
        Venue::Polymarket,
        vec![barrier_market("0xbtc150k", 150_000.0, dec!(0.095))],
    );
    let feed = StubFeed::with_crypto("BTCUSDT", 70_239.0, 0.79);
    let mut h = harness(venue, feed, vec![MarketCategory::BarrierReach], vec![]);

    let report = h.instance.tick().await.unwrap();
    assert_eq!(report.orders_placed, 1);
    let orders = h.venue.placed_orders();
    assert_eq!(orders[0].side, Side::Yes);
    // Barrier orders price at the live best ask, not a fixed price.
    assert_eq!(orders[0].price, dec!(0.095));
    storage::delete_book(Some(&h.state_file)).unwrap();

    // Skip branch: same market, ask perturbed to 26¢ (edge < 5%).
    let venue = MockVenue::new(
        Venue::Polymarket,
        vec![barrier_market("0xbtc150k", 150_000.0, dec!(0.26))],
    );
    let feed = StubFeed::with_crypto("BTCUSDT", 70_239.0, 0.79);
    let mut h = harness(venue, feed, vec![MarketCategory::BarrierReach], vec![]);

    let report = h.instance.tick().await.unwrap();
    assert_eq!(report.markets_scanned, 1);
    assert_eq!(report.qualifying, 0);
    assert!(h.venue.placed_orders().is_empty());
    storage::delete_book(Some(&h.state_file)).unwrap();
}

/// One underlying's feed failure skips only that market; the other
/// market in the same tick still trades.
#[tokio::test]
async fn feed_failure_isolated_to_one_market() {
    let mut chicago = threshold_market("KXHIGHCHI-26FEB14-T40", 40.0);
    if let vantage::types::UnderlyingRef::Station(ref mut s) = chicago.underlying {
        s.station_id = "KMDW".to_string();
    }
    let venue = MockVenue::new(
        Venue::Kalshi,
        vec![threshold_market("KXHIGHNY-26FEB14-T55", 55.0), chicago],
    );

    let feed = StubFeed::with_high("KNYC", 62.0);
    // Chicago's station has no data and is marked failing.
    feed.failing.lock().unwrap().push("KMDW".to_string());

    let mut h = harness(venue, feed, vec![MarketCategory::Threshold], vec![]);
    let report = h.instance.tick().await.unwrap();

    // Both markets examined; only the healthy one traded.
    assert_eq!(report.markets_scanned, 2);
    assert_eq!(report.qualifying, 1);
    assert_eq!(report.orders_placed, 1);
    assert_eq!(h.venue.placed_orders()[0].market_id, "KXHIGHNY-26FEB14-T55");
    storage::delete_book(Some(&h.state_file)).unwrap();
}

/// Between-bucket markets trade only inside the snipe window.
#[tokio::test]
async fn between_bucket_gated_by_snipe_window() {
    let make_market = || {
        let mut m = threshold_market("KXHIGHNY-26FEB14-B57", 55.0);
        m.contract = Contract::Between {
            floor_f: 55.0,
            cap_f: 59.0,
        };
        m
    };

    // Outside any window: proximity passes, timing gate fails.
    let venue = MockVenue::new(Venue::Kalshi, vec![make_market()]);
    let feed = StubFeed::with_high("KNYC", 57.0);
    let mut h = harness(venue, feed, vec![MarketCategory::Between], vec![]);
    let report = h.instance.tick().await.unwrap();
    assert_eq!(report.qualifying, 0);
    storage::delete_book(Some(&h.state_file)).unwrap();

    // Inside a window opening this minute: the same market trades.
    let now = Utc::now();
    let open = format!("{:02}:{:02}", now.hour(), now.minute());
    let venue = MockVenue::new(Venue::Kalshi, vec![make_market()]);
    let feed = StubFeed::with_high("KNYC", 57.0);
    let mut h = harness(venue, feed, vec![MarketCategory::Between], vec![open]);
    let report = h.instance.tick().await.unwrap();
    assert_eq!(report.orders_placed, 1);
    storage::delete_book(Some(&h.state_file)).unwrap();
}

/// Settlement releases the reservation exactly once.
#[tokio::test]
async fn settlement_releases_budget_once() {
    let venue = MockVenue::new(
        Venue::Kalshi,
        vec![threshold_market("KXHIGHNY-26FEB14-T55", 55.0)],
    );
    let feed = StubFeed::with_high("KNYC", 62.0);
    let mut h = harness(venue, feed, vec![MarketCategory::Threshold], vec![]);

    h.instance.tick().await.unwrap();
    assert_eq!(h.ledger.committed(), dec!(49.50));

    // The market resolves YES and disappears from the venue listing.
    h.venue.markets.lock().unwrap().clear();
    h.venue.settlements.lock().unwrap().push(Settlement {
        market_id: "KXHIGHNY-26FEB14-T55".to_string(),
        result: SettlementResult::Yes,
        settled_at: Utc::now(),
    });

    h.instance.tick().await.unwrap();
    assert_eq!(h.ledger.committed(), Decimal::ZERO);
    assert_eq!(h.ledger.available(), dec!(500));

    // Replaying the release finds nothing to double-release.
    assert_eq!(h.ledger.release("KXHIGHNY-26FEB14-T55"), Decimal::ZERO);
    assert_eq!(h.ledger.available(), dec!(500));
    storage::delete_book(Some(&h.state_file)).unwrap();
}

/// An auth failure halts placement but scanning continues.
#[tokio::test]
async fn auth_failure_halts_placement_not_observation() {
    let venue = MockVenue::new(
        Venue::Kalshi,
        vec![threshold_market("KXHIGHNY-26FEB14-T55", 55.0)],
    );
    *venue.place_error.lock().unwrap() = Some(EngineError::AuthExpired {
        venue: "kalshi".to_string(),
        message: "signature rejected".to_string(),
    });
    let feed = StubFeed::with_high("KNYC", 62.0);
    let mut h = harness(venue, feed, vec![MarketCategory::Threshold], vec![]);

    let report = h.instance.tick().await.unwrap();
    assert_eq!(report.orders_placed, 0);
    assert!(h.instance.is_placement_halted());
    // Reservation was released on the failure.
    assert_eq!(h.ledger.committed(), Decimal::ZERO);

    // Next tick still scans (read-only) but places nothing, even though
    // the venue would now accept orders.
    let report = h.instance.tick().await.unwrap();
    assert_eq!(report.markets_scanned, 1);
    assert_eq!(report.orders_placed, 0);
    assert_eq!(h.venue.place_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    storage::delete_book(Some(&h.state_file)).unwrap();
}

/// Drain cancels every resting order.
#[tokio::test]
async fn drain_cancels_resting_orders() {
    let venue = MockVenue::new(Venue::Kalshi, vec![]);
    venue.resting.lock().unwrap().push(OrderStatus {
        order_id: "ord-1".to_string(),
        market_id: "KXHIGHNY-26FEB14-T55".to_string(),
        state: OrderState::Resting,
        filled_count: 0,
        remaining_count: 55,
    });
    let feed = StubFeed::default();
    let mut h = harness(venue, feed, vec![MarketCategory::Threshold], vec![]);

    h.instance.drain(false).await.unwrap();
    assert_eq!(h.venue.cancelled.lock().unwrap().as_slice(), ["ord-1"]);
    storage::delete_book(Some(&h.state_file)).unwrap();
}
