//! Extraction valuation.
//!
//! A pearl item can be extracted into two reference materials (material A,
//! Cron Stone; material B, Valks' Cry) with no transaction tax, so its worth
//! is `qty_a * price_a + qty_b * price_b`. The calculator caches the two
//! material prices and refreshes them on a TTL.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::classify::{KeywordClassifier, OutfitClassifier};
use crate::market::{MarketFeed, RetryPolicy};
use crate::types::{format_silver, Archetype, Listing, MarketError, ValueAssessment};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Material A (Cron Stone).
pub const MATERIAL_A_ID: u64 = 16004;
/// Material B (Valks' Cry).
pub const MATERIAL_B_ID: u64 = 16003;

/// Materials produced by extracting one item of an archetype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MaterialYield {
    pub material_a: i64,
    pub material_b: i64,
    pub parts: u8,
}

/// Fixed extraction table.
pub fn material_yield(archetype: Archetype) -> MaterialYield {
    match archetype {
        Archetype::Premium => MaterialYield { material_a: 993, material_b: 331, parts: 7 },
        Archetype::Classic => MaterialYield { material_a: 801, material_b: 267, parts: 6 },
        Archetype::Simple => MaterialYield { material_a: 543, material_b: 181, parts: 4 },
        // varies per gear piece; this is the typical yield
        Archetype::Mount => MaterialYield { material_a: 900, material_b: 300, parts: 1 },
    }
}

#[derive(Debug, Clone)]
pub struct ValuationConfig {
    /// Minimum absolute profit in silver.
    pub min_profit: i64,
    /// Minimum profit / price ratio.
    pub min_roi: f64,
    /// How long fetched material prices stay fresh.
    pub price_ttl: Duration,
}

impl Default for ValuationConfig {
    fn default() -> Self {
        Self {
            min_profit: 100_000_000,
            min_roi: 0.05,
            price_ttl: Duration::seconds(300),
        }
    }
}

// ---------------------------------------------------------------------------
// Reference prices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PriceSource {
    Live,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReferencePrices {
    pub price_a: i64,
    pub price_b: i64,
    pub fetched_at: DateTime<Utc>,
    pub source: PriceSource,
}

// ---------------------------------------------------------------------------
// Calculator
// ---------------------------------------------------------------------------

pub struct ValueCalculator {
    feed: Arc<dyn MarketFeed>,
    config: ValuationConfig,
    retry: RetryPolicy,
    classifier: Box<dyn OutfitClassifier>,
    prices: Option<ReferencePrices>,
}

impl ValueCalculator {
    pub fn new(feed: Arc<dyn MarketFeed>, config: ValuationConfig) -> Self {
        Self {
            feed,
            config,
            retry: RetryPolicy::default(),
            classifier: Box::new(KeywordClassifier),
            prices: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn OutfitClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &ValuationConfig {
        &self.config
    }

    pub fn prices(&self) -> Option<&ReferencePrices> {
        self.prices.as_ref()
    }

    /// Whether cached live prices are younger than the TTL.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.prices
            .map(|p| now - p.fetched_at < self.config.price_ttl)
            .unwrap_or(false)
    }

    /// Refresh material prices if the cache is stale (or `force`).
    ///
    /// Returns `Ok(true)` when fresh prices are available afterwards and
    /// `Ok(false)` when the fetch failed; previously cached prices stay in
    /// use. Only an authentication failure is returned as `Err`.
    pub async fn refresh(&mut self, now: DateTime<Utc>, force: bool) -> Result<bool, MarketError> {
        if !force && self.is_fresh(now) {
            return Ok(true);
        }

        let ids = [MATERIAL_A_ID, MATERIAL_B_ID];
        let feed = Arc::clone(&self.feed);
        let result = self
            .retry
            .run("reference-prices", || feed.fetch_lowest_asks(&ids))
            .await;

        match result {
            Ok(asks) => match (asks.get(&MATERIAL_A_ID), asks.get(&MATERIAL_B_ID)) {
                (Some(&price_a), Some(&price_b)) if price_a > 0 && price_b > 0 => {
                    self.prices = Some(ReferencePrices {
                        price_a,
                        price_b,
                        fetched_at: now,
                        source: PriceSource::Live,
                    });
                    info!(
                        price_a = %format_silver(price_a),
                        price_b = %format_silver(price_b),
                        "Reference prices updated"
                    );
                    Ok(true)
                }
                _ => {
                    warn!(returned = asks.len(), "Reference price batch incomplete, keeping cache");
                    Ok(false)
                }
            },
            Err(e) if e.is_auth() => Err(e),
            Err(e) => {
                warn!(error = %e, "Reference price refresh failed, keeping cache");
                Ok(false)
            }
        }
    }

    /// Install caller-supplied prices when nothing has been fetched yet.
    /// They count as fetched at `now`, so the next live attempt waits a TTL.
    pub fn apply_fallback(&mut self, price_a: i64, price_b: i64, now: DateTime<Utc>) -> bool {
        if self.prices.is_some() {
            return false;
        }
        warn!(
            price_a = %format_silver(price_a),
            price_b = %format_silver(price_b),
            "Using fallback reference prices"
        );
        self.prices = Some(ReferencePrices {
            price_a,
            price_b,
            fetched_at: now,
            source: PriceSource::Fallback,
        });
        true
    }

    /// Set prices directly, as if fetched at `now`.
    pub fn set_prices(&mut self, price_a: i64, price_b: i64, now: DateTime<Utc>) {
        self.prices = Some(ReferencePrices {
            price_a,
            price_b,
            fetched_at: now,
            source: PriceSource::Live,
        });
    }

    pub fn classify(&self, item_name: &str) -> Archetype {
        self.classifier.classify(item_name)
    }

    /// Value one unit of `outfit_type` listed at `listed_price`.
    /// `None` when no reference prices are loaded.
    pub fn calculate(&self, outfit_type: Archetype, listed_price: i64) -> Option<ValueAssessment> {
        let prices = self.prices?;
        let yield_ = material_yield(outfit_type);

        let extraction_value = yield_.material_a * prices.price_a + yield_.material_b * prices.price_b;
        let profit = extraction_value - listed_price;
        let roi = if listed_price > 0 {
            profit as f64 / listed_price as f64
        } else {
            0.0
        };
        let is_profitable = profit >= self.config.min_profit && roi >= self.config.min_roi;

        Some(ValueAssessment {
            item_id: None,
            outfit_type,
            listed_price,
            extraction_value,
            profit,
            roi,
            is_profitable,
            price_a: prices.price_a,
            price_b: prices.price_b,
        })
    }

    /// `calculate` by archetype name; `None` for unrecognised names.
    pub fn calculate_named(&self, outfit_type: &str, listed_price: i64) -> Option<ValueAssessment> {
        let archetype = outfit_type.parse::<Archetype>().ok()?;
        self.calculate(archetype, listed_price)
    }

    /// Classify and value a concrete listing.
    pub fn assess(&self, listing: &Listing) -> Option<ValueAssessment> {
        let archetype = self.classify(&listing.display_name);
        let mut assessment = self.calculate(archetype, listing.price_per_unit)?;
        assessment.item_id = Some(listing.item_key);
        debug!(
            item = %listing.display_name,
            archetype = %archetype,
            profit = %format_silver(assessment.profit),
            profitable = assessment.is_profitable,
            "Listing assessed"
        );
        Some(assessment)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
