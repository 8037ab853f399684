//! Full detect → evaluate → decide → act pipeline against `MockMarket`.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::future::Future;
use std::sync::Arc;
use std::task::Poll;

use pearl_sniper::alerts::LogAlerter;
use pearl_sniper::engine::detector::ChangeDetector;
use pearl_sniper::engine::gate::{GateConfig, PurchaseGate};
use pearl_sniper::engine::poller::{AdaptivePoller, PollMode, PollerConfig};
use pearl_sniper::engine::sniper::Sniper;
use pearl_sniper::market::{MarketFeed, RetryPolicy};
use pearl_sniper::storage;
use pearl_sniper::strategy::valuation::{ValuationConfig, ValueCalculator};
use pearl_sniper::types::*;

use crate::mock_market::{listing, MockMarket};

fn t0() -> DateTime<Utc> {
    // Tuesday 09:00 UTC: base polling mode
    Utc.with_ymd_and_hms(2025, 10, 14, 9, 0, 0).unwrap()
}

fn outfits() -> Category {
    Category::new(55, 1, "Male Outfits (Set)")
}

fn live_gate() -> GateConfig {
    GateConfig {
        enabled: true,
        dry_run: false,
        ..GateConfig::default()
    }
}

/// Stays pending through the first poll, then resolves: one tick, then stop.
fn stop_after_first_tick() -> impl Future<Output = ()> {
    let mut polls = 0;
    std::future::poll_fn(move |cx| {
        polls += 1;
        if polls > 1 {
            Poll::Ready(())
        } else {
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    })
}

fn build(market: &Arc<MockMarket>, gate: GateConfig) -> Sniper {
    let feed: Arc<dyn MarketFeed> = market.clone();
    Sniper::new(
        ChangeDetector::new(Arc::clone(&feed), Category::pearl_shop()).with_retry(RetryPolicy::none()),
        AdaptivePoller::new(PollerConfig::default()),
        ValueCalculator::new(Arc::clone(&feed), ValuationConfig::default())
            .with_retry(RetryPolicy::none()),
        Arc::new(PurchaseGate::new(feed, gate)),
        Box::new(LogAlerter::new(true)),
    )
}

#[tokio::test]
async fn test_worked_example_end_to_end() {
    let market = Arc::new(MockMarket::with_reference_prices());
    market.set_listings(
        &outfits(),
        vec![listing(&outfits(), 40001, "[Kibelius] Outfit Set", 2_170_000_000, 1)],
    );

    let mut sniper = build(&market, live_gate());
    let report = sniper.run_tick(t0()).await.unwrap();

    assert_eq!(report.events, 1);
    assert_eq!(report.new_listings, 1);
    assert_eq!(report.profitable, 1);

    let attempt = &report.attempts[0];
    assert_eq!(attempt.outcome, PurchaseOutcome::Authorized(Execution::Purchased));
    assert_eq!(attempt.item_id, 40001);
    assert_eq!(attempt.price, 2_170_000_000);
    assert_eq!(attempt.profit, Some(6_932_500_000));
    assert!((attempt.roi.unwrap() - 3.1947).abs() < 1e-4);

    let orders = market.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].price_per_unit, 2_170_000_000);
    assert_eq!(orders[0].quantity, 1);

    // all eight pearl-shop views were polled once
    assert_eq!(market.category_fetches(), 8);
    assert_eq!(sniper.poller_stats(t0()).mode, PollMode::Activity);
}

#[tokio::test]
async fn test_dry_run_sends_no_orders() {
    let market = Arc::new(MockMarket::with_reference_prices());
    market.set_listings(
        &outfits(),
        vec![listing(&outfits(), 40001, "[Kibelius] Outfit Set", 2_170_000_000, 1)],
    );

    let gate = GateConfig {
        dry_run: true,
        ..live_gate()
    };
    let mut sniper = build(&market, gate);
    let report = sniper.run_tick(t0()).await.unwrap();

    assert_eq!(report.attempts.len(), 1);
    assert_eq!(report.attempts[0].outcome, PurchaseOutcome::Authorized(Execution::DryRun));
    assert!(market.orders().is_empty());
}

#[tokio::test]
async fn test_price_above_max_is_rejected_without_order() {
    let market = Arc::new(MockMarket::with_reference_prices());
    market.set_listings(
        &outfits(),
        vec![listing(&outfits(), 40001, "[Kibelius] Outfit Set", 2_170_000_000, 1)],
    );

    let gate = GateConfig {
        max_price: 2_000_000_000,
        ..live_gate()
    };
    let mut sniper = build(&market, gate);
    let report = sniper.run_tick(t0()).await.unwrap();

    assert!(matches!(
        report.attempts[0].outcome,
        PurchaseOutcome::Rejected(GuardRejection::PriceAboveMax { .. })
    ));
    assert!(market.orders().is_empty());
}

#[tokio::test]
async fn test_restock_triggers_second_purchase() {
    let market = Arc::new(MockMarket::with_reference_prices());
    let item = |qty| listing(&outfits(), 40001, "[Kibelius] Outfit Set", 2_170_000_000, qty);
    market.set_listings(&outfits(), vec![item(1)]);

    let mut sniper = build(&market, live_gate());
    let first = sniper.run_tick(t0()).await.unwrap();
    assert_eq!(first.purchases(), 1);

    // bought out: nothing to see
    let quiet = sniper.run_tick(t0() + Duration::seconds(2)).await.unwrap();
    assert_eq!(quiet.events, 0);

    // restocked with more units than ever seen
    market.set_listings(&outfits(), vec![item(3)]);
    let restock = sniper.run_tick(t0() + Duration::seconds(4)).await.unwrap();
    assert_eq!(restock.restocks, 1);
    assert_eq!(restock.purchases(), 1);
    assert_eq!(market.orders().len(), 2);

    // two units remain; that is below the historical max of 3
    let after = sniper.run_tick(t0() + Duration::seconds(6)).await.unwrap();
    assert_eq!(after.events, 0);
}

#[tokio::test]
async fn test_hourly_limit_across_listings() {
    let market = Arc::new(MockMarket::with_reference_prices());
    market.set_listings(
        &outfits(),
        vec![
            listing(&outfits(), 1, "[Kibelius] Outfit Set", 2_000_000_000, 1),
            listing(&outfits(), 2, "[Narc] Outfit Set", 2_100_000_000, 1),
            listing(&outfits(), 3, "[Ninja] Outfit Set", 2_200_000_000, 1),
        ],
    );

    let gate = GateConfig {
        max_purchases_per_hour: 2,
        cooldown: Duration::zero(),
        ..live_gate()
    };
    let mut sniper = build(&market, gate);
    let report = sniper.run_tick(t0()).await.unwrap();

    assert_eq!(report.attempts.len(), 3);
    assert_eq!(report.purchases(), 2);
    assert!(matches!(
        report.attempts[2].outcome,
        PurchaseOutcome::Rejected(GuardRejection::RateLimited { purchases: 2, max: 2 })
    ));
    assert_eq!(market.orders().len(), 2);
}

#[tokio::test]
async fn test_cooldown_within_one_tick() {
    let market = Arc::new(MockMarket::with_reference_prices());
    market.set_listings(
        &outfits(),
        vec![
            listing(&outfits(), 1, "[Kibelius] Outfit Set", 2_000_000_000, 1),
            listing(&outfits(), 2, "[Narc] Outfit Set", 2_100_000_000, 1),
        ],
    );

    let mut sniper = build(&market, live_gate());
    let report = sniper.run_tick(t0()).await.unwrap();

    assert_eq!(report.purchases(), 1);
    assert_eq!(
        report.attempts[1].reason,
        "Cooldown active (2.0s remaining)"
    );
}

#[tokio::test]
async fn test_server_refusal_is_recorded() {
    let market = Arc::new(MockMarket::with_reference_prices());
    market.set_listings(
        &outfits(),
        vec![listing(&outfits(), 40001, "[Kibelius] Outfit Set", 2_170_000_000, 1)],
    );
    market.set_buy_response(5, "Not enough silver");

    let mut sniper = build(&market, live_gate());
    let report = sniper.run_tick(t0()).await.unwrap();

    assert_eq!(report.attempts[0].reason, "API error: Not enough silver");
    let stats = sniper.gate().stats(t0()).await;
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.cooldown_remaining_secs, 0.0);
}

#[tokio::test]
async fn test_failing_category_is_isolated() {
    let market = Arc::new(MockMarket::with_reference_prices());
    let class_outfits = Category::new(55, 5, "Class Outfits (Set)");
    market.fail_category(&class_outfits);
    market.set_listings(
        &outfits(),
        vec![listing(&outfits(), 40001, "[Kibelius] Outfit Set", 2_170_000_000, 1)],
    );

    let mut sniper = build(&market, live_gate());
    let report = sniper.run_tick(t0()).await.unwrap();

    assert_eq!(report.events, 1);
    assert_eq!(sniper.detector_metrics().failed_fetches, 1);
}

#[tokio::test]
async fn test_auth_failure_aborts_run() {
    let market = Arc::new(MockMarket::with_reference_prices());
    market.set_error(MarketError::Authentication { status: 401 });

    let mut sniper = build(&market, live_gate());
    let err = sniper.run(std::future::pending()).await.unwrap_err();
    assert!(err.is_auth());
    assert!(market.orders().is_empty());
}

#[tokio::test]
async fn test_report_written_at_shutdown() {
    let market = Arc::new(MockMarket::with_reference_prices());
    market.set_listings(
        &outfits(),
        vec![listing(&outfits(), 40001, "[Kibelius] Outfit Set", 2_170_000_000, 1)],
    );

    let mut sniper = build(&market, live_gate());
    sniper.run(stop_after_first_tick()).await.unwrap();

    let mut path = std::env::temp_dir();
    path.push(format!("pearl_sniper_it_report_{}.json", uuid::Uuid::new_v4()));
    let path = path.to_string_lossy().to_string();

    let report = sniper.report(Utc::now()).await;
    storage::save_report(&report, Some(&path)).unwrap();
    let loaded = storage::load_report(Some(&path)).unwrap().unwrap();

    assert_eq!(loaded.detector.ticks, 1);
    assert_eq!(loaded.purchases.purchased, 1);
    assert_eq!(loaded.history.len(), 1);
    assert_eq!(loaded.history[0].item_id, 40001);

    std::fs::remove_file(&path).unwrap();
}
