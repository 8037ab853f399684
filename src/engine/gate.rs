//! Purchase gate.
//!
//! Turns a profitable assessment into either a purchase (real or dry-run)
//! or a recorded rejection. Guards run in a fixed order and the first
//! failure wins:
//!
//! 1. enabled
//! 2. price ≤ max price
//! 3. profit ≥ min profit
//! 4. ROI ≥ min ROI
//! 5. successful purchases in the last hour < hourly limit
//! 6. cooldown since the last purchase has elapsed
//! 7. manual confirmation (optional)
//! 8. dry run → recorded as a would-buy success, nothing is sent
//! 9. purchase request
//!
//! Every pass through the gate appends exactly one `PurchaseAttempt` to the
//! in-memory audit trail. The gate's state lock is held from the guard
//! checks until the attempt is committed, so two concurrent triggers can
//! never both pass the cooldown.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::market::MarketFeed;
use crate::types::{
    format_silver, BuyOrder, Execution, GuardRejection, Listing, MarketError, PurchaseAttempt,
    PurchaseOutcome, ValueAssessment,
};

/// Window for the hourly purchase limit.
const RATE_WINDOW_SECS: i64 = 3600;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub enabled: bool,
    pub max_price: i64,
    pub min_profit: Option<i64>,
    pub min_roi: Option<f64>,
    pub max_purchases_per_hour: u32,
    pub cooldown: Duration,
    pub dry_run: bool,
    pub require_confirmation: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_price: 5_000_000_000,
            min_profit: Some(100_000_000),
            min_roi: Some(0.05),
            max_purchases_per_hour: 10,
            cooldown: Duration::seconds(2),
            dry_run: false,
            require_confirmation: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Confirmation
// ---------------------------------------------------------------------------

/// Human (or policy) sign-off before a purchase is sent.
#[async_trait]
pub trait PurchaseConfirmer: Send + Sync {
    async fn confirm(&self, listing: &Listing, assessment: &ValueAssessment) -> bool;
}

/// Confirms everything.
pub struct AutoConfirm;

#[async_trait]
impl PurchaseConfirmer for AutoConfirm {
    async fn confirm(&self, _listing: &Listing, _assessment: &ValueAssessment) -> bool {
        true
    }
}

/// Asks on the terminal; only `y` / `yes` confirms.
pub struct StdinConfirmer;

#[async_trait]
impl PurchaseConfirmer for StdinConfirmer {
    async fn confirm(&self, listing: &Listing, assessment: &ValueAssessment) -> bool {
        let prompt = format!(
            "\nBuy {} for {}? profit {} ({:.1}% ROI) [y/N]: ",
            listing.display_name,
            format_silver(listing.price_per_unit),
            format_silver(assessment.profit),
            assessment.roi * 100.0,
        );
        let mut stdout = tokio::io::stdout();
        if stdout.write_all(prompt.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
            return false;
        }

        let mut line = String::new();
        match BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
            Ok(_) => is_yes(&line),
            Err(e) => {
                warn!(error = %e, "Could not read confirmation");
                false
            }
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurchaseStats {
    pub total_attempts: usize,
    /// Real purchases plus dry-run would-buys.
    pub successful: usize,
    pub purchased: usize,
    pub would_buy: usize,
    pub rejected: usize,
    /// Execution failures and abandoned requests.
    pub failed: usize,
    pub success_rate: f64,
    /// Real purchases only.
    pub total_spent: i64,
    pub total_profit: i64,
    pub attempts_last_hour: usize,
    pub purchases_last_hour: usize,
    pub hourly_headroom: u32,
    pub cooldown_remaining_secs: f64,
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct GateState {
    history: Vec<PurchaseAttempt>,
    last_purchase: Option<DateTime<Utc>>,
}

impl GateState {
    fn purchases_since(&self, cutoff: DateTime<Utc>) -> usize {
        self.history
            .iter()
            .filter(|a| a.timestamp > cutoff && a.is_success())
            .count()
    }

    fn cooldown_remaining(&self, cooldown: Duration, now: DateTime<Utc>) -> Option<Duration> {
        let elapsed = now - self.last_purchase?;
        (elapsed < cooldown).then(|| cooldown - elapsed)
    }
}

pub struct PurchaseGate {
    feed: Arc<dyn MarketFeed>,
    config: GateConfig,
    confirmer: Box<dyn PurchaseConfirmer>,
    state: Mutex<GateState>,
}

impl PurchaseGate {
    pub fn new(feed: Arc<dyn MarketFeed>, config: GateConfig) -> Self {
        Self {
            feed,
            config,
            confirmer: Box::new(AutoConfirm),
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn with_confirmer(mut self, confirmer: Box<dyn PurchaseConfirmer>) -> Self {
        self.confirmer = confirmer;
        self
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Run the guard sequence and, if everything passes, buy one unit.
    ///
    /// Always records and returns the attempt, except on an authentication
    /// failure from the purchase request: that attempt is recorded as
    /// abandoned and the error is returned so the caller can stop.
    pub async fn try_purchase(
        &self,
        assessment: &ValueAssessment,
        listing: &Listing,
        now: DateTime<Utc>,
    ) -> Result<PurchaseAttempt, MarketError> {
        let mut state = self.state.lock().await;

        let (outcome, fatal) = match self.check_guards(&state, assessment, listing, now) {
            Err(rejection) => {
                info!(item = %listing.display_name, reason = %rejection, "Purchase blocked");
                (PurchaseOutcome::Rejected(rejection), None)
            }
            Ok(()) => self.authorize(&mut state, assessment, listing, now).await,
        };

        let attempt = Self::record(&mut state, assessment, listing, now, outcome);
        match fatal {
            Some(e) => Err(e),
            None => Ok(attempt),
        }
    }

    /// Guards 7–9. Returns the outcome to record, plus the error to surface
    /// when the purchase request failed authentication.
    async fn authorize(
        &self,
        state: &mut GateState,
        assessment: &ValueAssessment,
        listing: &Listing,
        now: DateTime<Utc>,
    ) -> (PurchaseOutcome, Option<MarketError>) {
        if self.config.require_confirmation && !self.confirmer.confirm(listing, assessment).await {
            info!(item = %listing.display_name, "Purchase not confirmed");
            return (
                PurchaseOutcome::Rejected(GuardRejection::ConfirmationDeclined),
                None,
            );
        }

        if self.config.dry_run {
            info!(
                item = %listing.display_name,
                price = %format_silver(listing.price_per_unit),
                profit = %format_silver(assessment.profit),
                "[DRY RUN] Would buy"
            );
            return (PurchaseOutcome::Authorized(Execution::DryRun), None);
        }

        let order = BuyOrder {
            item_key: listing.item_key,
            sub_key: listing.sub_key,
            price_per_unit: listing.price_per_unit,
            quantity: 1,
        };
        match self.feed.buy(&order).await {
            Ok(resp) if resp.is_success() => {
                state.last_purchase = Some(now);
                info!(
                    item = %listing.display_name,
                    price = %format_silver(listing.price_per_unit),
                    profit = %format_silver(assessment.profit),
                    "Purchase successful"
                );
                (PurchaseOutcome::Authorized(Execution::Purchased), None)
            }
            Ok(resp) => {
                warn!(
                    item = %listing.display_name,
                    code = resp.result_code,
                    message = %resp.message,
                    "Purchase rejected by server"
                );
                let execution = Execution::Failed {
                    message: resp.message,
                };
                (PurchaseOutcome::Authorized(execution), None)
            }
            Err(e) => {
                let execution = Execution::Abandoned {
                    message: e.to_string(),
                };
                if e.is_auth() {
                    error!(item = %listing.display_name, error = %e, "Purchase hit invalid credentials");
                    (PurchaseOutcome::Authorized(execution), Some(e))
                } else {
                    warn!(item = %listing.display_name, error = %e, "Purchase request abandoned");
                    (PurchaseOutcome::Authorized(execution), None)
                }
            }
        }
    }

    /// Guards 1–6.
    fn check_guards(
        &self,
        state: &GateState,
        assessment: &ValueAssessment,
        listing: &Listing,
        now: DateTime<Utc>,
    ) -> Result<(), GuardRejection> {
        let cfg = &self.config;
        let price = listing.price_per_unit;

        if !cfg.enabled {
            return Err(GuardRejection::Disabled);
        }
        if price > cfg.max_price {
            return Err(GuardRejection::PriceAboveMax { price, max: cfg.max_price });
        }
        if let Some(min) = cfg.min_profit {
            if assessment.profit < min {
                return Err(GuardRejection::ProfitBelowMin { profit: assessment.profit, min });
            }
        }
        if let Some(min) = cfg.min_roi {
            if assessment.roi < min {
                return Err(GuardRejection::RoiBelowMin { roi: assessment.roi, min });
            }
        }

        let recent = state.purchases_since(now - Duration::seconds(RATE_WINDOW_SECS));
        if recent >= cfg.max_purchases_per_hour as usize {
            return Err(GuardRejection::RateLimited {
                purchases: recent,
                max: cfg.max_purchases_per_hour,
            });
        }

        if let Some(remaining) = state.cooldown_remaining(cfg.cooldown, now) {
            return Err(GuardRejection::Cooldown {
                remaining_secs: remaining.num_milliseconds() as f64 / 1000.0,
            });
        }

        Ok(())
    }

    fn record(
        state: &mut GateState,
        assessment: &ValueAssessment,
        listing: &Listing,
        now: DateTime<Utc>,
        outcome: PurchaseOutcome,
    ) -> PurchaseAttempt {
        let attempt = PurchaseAttempt {
            id: Uuid::new_v4(),
            item_id: listing.item_key,
            item_name: listing.display_name.clone(),
            price: listing.price_per_unit,
            timestamp: now,
            reason: outcome.reason(),
            outcome,
            profit: Some(assessment.profit),
            roi: Some(assessment.roi),
        };
        state.history.push(attempt.clone());
        attempt
    }

    /// Snapshot of the audit trail.
    pub async fn history(&self) -> Vec<PurchaseAttempt> {
        self.state.lock().await.history.clone()
    }

    pub async fn stats(&self, now: DateTime<Utc>) -> PurchaseStats {
        let state = self.state.lock().await;
        let cutoff = now - Duration::seconds(RATE_WINDOW_SECS);

        let mut stats = PurchaseStats {
            total_attempts: state.history.len(),
            ..PurchaseStats::default()
        };

        for attempt in &state.history {
            match &attempt.outcome {
                PurchaseOutcome::Authorized(Execution::Purchased) => {
                    stats.purchased += 1;
                    stats.total_spent += attempt.price;
                    stats.total_profit += attempt.profit.unwrap_or(0);
                }
                PurchaseOutcome::Authorized(Execution::DryRun) => stats.would_buy += 1,
                PurchaseOutcome::Authorized(_) => stats.failed += 1,
                PurchaseOutcome::Rejected(_) => stats.rejected += 1,
            }
            if attempt.timestamp > cutoff {
                stats.attempts_last_hour += 1;
            }
        }

        stats.successful = stats.purchased + stats.would_buy;
        stats.success_rate = if stats.total_attempts > 0 {
            stats.successful as f64 / stats.total_attempts as f64
        } else {
            0.0
        };
        stats.purchases_last_hour = state.purchases_since(cutoff);
        stats.hourly_headroom = self
            .config
            .max_purchases_per_hour
            .saturating_sub(stats.purchases_last_hour as u32);
        stats.cooldown_remaining_secs = state
            .cooldown_remaining(self.config.cooldown, now)
            .map(|d| d.num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        stats
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
