//! PEARL SNIPER: marketplace restock sniper for pearl-shop items.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the marketplace client from the session in the environment, and
//! runs the detect → evaluate → decide → act loop until Ctrl+C or until
//! the marketplace rejects the session. The session report is written on
//! the way out either way.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use pearl_sniper::alerts::LogAlerter;
use pearl_sniper::config::AppConfig;
use pearl_sniper::engine::detector::ChangeDetector;
use pearl_sniper::engine::gate::{PurchaseGate, StdinConfirmer};
use pearl_sniper::engine::poller::AdaptivePoller;
use pearl_sniper::engine::sniper::Sniper;
use pearl_sniper::market::client::TradeClient;
use pearl_sniper::market::MarketFeed;
use pearl_sniper::storage::{self, SessionReport};
use pearl_sniper::strategy::valuation::ValueCalculator;
use pearl_sniper::types::format_silver;

const BANNER: &str = r#"
 ____                 _   ____        _
|  _ \ ___  __ _ _ __| | / ___| _ __ (_)_ __   ___ _ __
| |_) / _ \/ _` | '__| | \___ \| '_ \| | '_ \ / _ \ '__|
|  __/  __/ (_| | |  | |  ___) | | | | | |_) |  __/ |
|_|   \___|\__,_|_|  |_| |____/|_| |_|_| .__/ \___|_|
                                       |_|
  Pearl-shop restock sniper
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = AppConfig::path_from_env();
    let cfg = AppConfig::load(&config_path)?;

    init_logging();
    for warning in cfg.warnings() {
        warn!("{warning}");
    }

    println!("{BANNER}");
    info!(
        config = %config_path,
        region = %cfg.market.region,
        categories = cfg.categories().len(),
        purchase_enabled = cfg.purchase.enabled,
        dry_run = cfg.purchase.dry_run,
        max_price = %format_silver(cfg.purchase.max_price),
        "PEARL SNIPER starting up"
    );

    // -- Initialise components -------------------------------------------

    let credentials = cfg
        .credentials()
        .context("No marketplace session available")?;
    let client = TradeClient::new(cfg.market.region, credentials, cfg.request_timeout())?;
    let feed: Arc<dyn MarketFeed> = Arc::new(client);
    let retry = cfg.retry_policy();

    let detector = ChangeDetector::new(Arc::clone(&feed), cfg.categories()).with_retry(retry);
    let poller = AdaptivePoller::new(cfg.poller_config());
    let calculator = ValueCalculator::new(Arc::clone(&feed), cfg.valuation_config()).with_retry(retry);

    let mut gate = PurchaseGate::new(Arc::clone(&feed), cfg.gate_config());
    if cfg.purchase.require_confirmation {
        gate = gate.with_confirmer(Box::new(StdinConfirmer));
    }
    if !cfg.purchase.enabled {
        warn!("Auto-buy disabled: detections are alerted and recorded only");
    } else if cfg.purchase.dry_run {
        warn!("Dry-run mode: purchases are simulated");
    }

    let mut sniper = Sniper::new(
        detector,
        poller,
        calculator,
        Arc::new(gate),
        Box::new(LogAlerter::new(cfg.alerts.enabled)),
    )
    .with_fallback_prices(cfg.valuation.fallback_price_a, cfg.valuation.fallback_price_b);

    // -- Main loop -------------------------------------------------------

    info!("Entering main loop. Press Ctrl+C to stop.");
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = stop_tx.send(());
            }
            Err(e) => error!(error = %e, "Could not listen for Ctrl+C"),
        }
    });
    let shutdown = async move {
        // sender dropped without a signal: run until the session ends
        if stop_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let outcome = sniper.run(shutdown).await;

    // -- Shutdown --------------------------------------------------------

    let report = sniper.report(Utc::now()).await;
    log_final_report(&report);
    if let Err(e) = storage::save_report(&report, Some(&cfg.report.path)) {
        error!(error = %e, "Failed to save session report");
    } else {
        info!(path = %cfg.report.path, "Session report written");
    }

    outcome.context("Marketplace rejected the session: credentials invalid")?;
    info!("PEARL SNIPER shut down cleanly.");
    Ok(())
}

/// Log a human-readable session summary.
fn log_final_report(report: &SessionReport) {
    let d = &report.detector;
    let p = &report.purchases;
    info!(
        ticks = d.ticks,
        requests = d.requests,
        new_listings = d.new_listings,
        restocks = d.restocks,
        failed_fetches = d.failed_fetches,
        seen = d.seen_keys,
        polls = report.poller.total_polls,
        "Detector summary"
    );
    info!(
        attempts = p.total_attempts,
        purchased = p.purchased,
        would_buy = p.would_buy,
        rejected = p.rejected,
        failed = p.failed,
        success_rate = format!("{:.1}%", p.success_rate * 100.0),
        spent = %format_silver(p.total_spent),
        profit = %format_silver(p.total_profit),
        "Purchase summary"
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pearl_sniper=info"));

    let json_logging = std::env::var("PEARL_SNIPER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
