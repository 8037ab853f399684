//! The sniper loop: detect → evaluate → decide → act.
//!
//! One tick refreshes reference prices when stale, polls every category,
//! values each detection and routes profitable ones through the alerting
//! seam and the purchase gate. Purchases happen inline, in the same tick as
//! the detection. The poller then picks the delay before the next tick.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::alerts::AlertDispatcher;
use crate::engine::detector::{ChangeDetector, DetectorMetrics};
use crate::engine::gate::PurchaseGate;
use crate::engine::poller::{AdaptivePoller, PollerStats};
use crate::storage::SessionReport;
use crate::strategy::valuation::ValueCalculator;
use crate::types::{format_silver, MarketError, PurchaseAttempt};

/// What happened during one tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub events: usize,
    pub new_listings: usize,
    pub restocks: usize,
    pub assessed: usize,
    pub profitable: usize,
    pub attempts: Vec<PurchaseAttempt>,
    pub prices_fresh: bool,
}

impl TickReport {
    pub fn purchases(&self) -> usize {
        self.attempts.iter().filter(|a| a.is_success()).count()
    }
}

pub struct Sniper {
    detector: ChangeDetector,
    poller: AdaptivePoller,
    calculator: ValueCalculator,
    gate: Arc<PurchaseGate>,
    alerts: Box<dyn AlertDispatcher>,
    fallback_prices: Option<(i64, i64)>,
}

impl Sniper {
    pub fn new(
        detector: ChangeDetector,
        poller: AdaptivePoller,
        calculator: ValueCalculator,
        gate: Arc<PurchaseGate>,
        alerts: Box<dyn AlertDispatcher>,
    ) -> Self {
        Self {
            detector,
            poller,
            calculator,
            gate,
            alerts,
            fallback_prices: None,
        }
    }

    /// Material prices to value with until the first live fetch succeeds.
    pub fn with_fallback_prices(mut self, price_a: i64, price_b: i64) -> Self {
        self.fallback_prices = Some((price_a, price_b));
        self
    }

    pub fn gate(&self) -> &Arc<PurchaseGate> {
        &self.gate
    }

    pub fn calculator(&self) -> &ValueCalculator {
        &self.calculator
    }

    pub fn detector_metrics(&self) -> DetectorMetrics {
        self.detector.metrics()
    }

    pub fn poller_stats(&self, now: DateTime<Utc>) -> PollerStats {
        self.poller.stats(now)
    }

    /// One full pass. Only an authentication failure is returned as `Err`;
    /// every other failure is absorbed by the component that hit it.
    pub async fn run_tick(&mut self, now: DateTime<Utc>) -> Result<TickReport, MarketError> {
        let mut report = TickReport {
            prices_fresh: self.calculator.refresh(now, false).await?,
            ..TickReport::default()
        };
        if !report.prices_fresh {
            if let Some((a, b)) = self.fallback_prices {
                self.calculator.apply_fallback(a, b, now);
            }
        }

        let events = self.detector.tick(now).await?;
        report.events = events.len();

        for event in &events {
            self.poller.record_activity(now);
            if event.is_new_listing {
                report.new_listings += 1;
            } else {
                report.restocks += 1;
            }

            let Some(assessment) = self.calculator.assess(&event.listing) else {
                debug!(item = %event.listing.display_name, "No reference prices, skipping valuation");
                continue;
            };
            report.assessed += 1;
            if !assessment.is_profitable {
                continue;
            }
            report.profitable += 1;

            self.alerts.deliver(&assessment, &event.listing).await;
            let attempt = self
                .gate
                .try_purchase(&assessment, &event.listing, now)
                .await?;
            report.attempts.push(attempt);
        }

        Ok(report)
    }

    /// Tick until `shutdown` resolves. An in-flight tick always completes;
    /// shutdown is only observed between ticks.
    ///
    /// `shutdown` is polled once before the first tick so that lazily
    /// registered listeners (such as `tokio::signal::ctrl_c`) are armed
    /// while that tick runs.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), MarketError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        if shutdown.as_mut().now_or_never().is_some() {
            info!("Shutdown signal received before the first tick.");
            return Ok(());
        }

        loop {
            match self.run_tick(Utc::now()).await {
                Ok(report) => log_tick_report(&report),
                Err(e) => {
                    error!(error = %e, "Stopping: marketplace rejected credentials");
                    return Err(e);
                }
            }

            let now = Utc::now();
            let delay = self.poller.next_interval(now);
            debug!(
                delay_ms = delay.as_millis() as u64,
                mode = %self.poller.mode(now),
                "Waiting for next tick"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut shutdown => {
                    info!("Shutdown signal received.");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Snapshot of everything worth persisting at shutdown.
    pub async fn report(&self, now: DateTime<Utc>) -> SessionReport {
        SessionReport {
            generated_at: now,
            detector: self.detector.metrics(),
            poller: self.poller.stats(now),
            purchases: self.gate.stats(now).await,
            history: self.gate.history().await,
        }
    }
}

fn log_tick_report(report: &TickReport) {
    if report.events == 0 {
        return;
    }
    let spent: i64 = report
        .attempts
        .iter()
        .filter(|a| a.is_success())
        .map(|a| a.price)
        .sum();
    info!(
        events = report.events,
        new = report.new_listings,
        restocks = report.restocks,
        profitable = report.profitable,
        purchases = report.purchases(),
        spent = %format_silver(spent),
        "Tick complete"
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
