//! Listing change detector.
//!
//! Every tick fetches all monitored categories concurrently and emits an
//! event for each in-stock listing that is either unseen (by dedup key:
//! item, price, sub-category) or shows more units than the highest quantity
//! ever observed for its stock key (item, sub-category).
//!
//! Detection is best-effort: a category that fails for a tick is simply
//! skipped, and a listing that appears and sells out between two ticks is
//! never seen.

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::market::{MarketFeed, RetryPolicy};
use crate::types::{Category, DedupKey, DetectionEvent, Listing, MarketError, StockKey};

// ---------------------------------------------------------------------------
// Detection state
// ---------------------------------------------------------------------------

/// Seen-set and per-stock-key quantity maxima. Both only grow.
#[derive(Debug, Clone, Default)]
pub struct DetectorState {
    seen: HashSet<DedupKey>,
    stock: HashMap<StockKey, u64>,
}

impl DetectorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_seen(&self, key: &DedupKey) -> bool {
        self.seen.contains(key)
    }

    /// Highest quantity ever observed for `key`.
    pub fn stock_max(&self, key: &StockKey) -> Option<u64> {
        self.stock.get(key).copied()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Apply one listing and return the event it triggers, if any.
    ///
    /// Out-of-stock listings are ignored entirely. A sellout followed by a
    /// relist at or below the previous peak quantity and the same price does
    /// not trigger again.
    pub fn observe(&mut self, listing: &Listing, now: DateTime<Utc>) -> Option<DetectionEvent> {
        if !listing.in_stock() {
            return None;
        }

        let dedup_key = listing.dedup_key();
        let stock_key = listing.stock_key();
        let prior_quantity = self.stock.get(&stock_key).copied().unwrap_or(0);

        let is_new_listing = !self.seen.contains(&dedup_key);
        let stock_increased = listing.available_quantity > prior_quantity;

        self.seen.insert(dedup_key);
        self.stock
            .insert(stock_key, prior_quantity.max(listing.available_quantity));

        if is_new_listing || stock_increased {
            Some(DetectionEvent {
                category: listing.category.clone(),
                listing: listing.clone(),
                timestamp: now,
                is_new_listing,
                prior_quantity,
            })
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectorMetrics {
    pub ticks: u64,
    pub requests: u64,
    pub new_listings: u64,
    pub restocks: u64,
    pub failed_fetches: u64,
    pub seen_keys: usize,
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

pub struct ChangeDetector {
    feed: Arc<dyn MarketFeed>,
    categories: Vec<Category>,
    retry: RetryPolicy,
    state: DetectorState,
    metrics: DetectorMetrics,
}

impl ChangeDetector {
    pub fn new(feed: Arc<dyn MarketFeed>, categories: Vec<Category>) -> Self {
        Self {
            feed,
            categories,
            retry: RetryPolicy::default(),
            state: DetectorState::new(),
            metrics: DetectorMetrics::default(),
        }
    }

    /// Start from existing detection state instead of an empty one.
    pub fn with_state(mut self, state: DetectorState) -> Self {
        self.state = state;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn state(&self) -> &DetectorState {
        &self.state
    }

    pub fn metrics(&self) -> DetectorMetrics {
        DetectorMetrics {
            seen_keys: self.state.seen_count(),
            ..self.metrics.clone()
        }
    }

    /// Poll every category once and return the resulting events.
    ///
    /// Categories are fetched concurrently; one failing category does not
    /// affect the others and is skipped for this tick. An authentication
    /// failure from any category aborts the tick as soon as it arrives,
    /// before any state changes, and is returned as the only `Err`.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<Vec<DetectionEvent>, MarketError> {
        self.metrics.ticks += 1;

        let feed = &self.feed;
        let retry = self.retry;
        let mut fetches: FuturesUnordered<_> = self
            .categories
            .iter()
            .enumerate()
            .map(|(idx, category)| async move {
                let result = retry
                    .run(&category.display_name, || feed.fetch_category(category))
                    .await;
                (idx, category, result)
            })
            .collect();

        let mut results = Vec::with_capacity(self.categories.len());
        while let Some((idx, category, result)) = fetches.next().await {
            self.metrics.requests += 1;
            if let Err(e) = &result {
                if e.is_auth() {
                    // remaining fetches are dropped with the stream
                    return Err(e.clone());
                }
            }
            results.push((idx, category, result));
        }
        results.sort_by_key(|(idx, _, _)| *idx);

        let mut events = Vec::new();
        for (_, category, result) in results {
            let listings = match result {
                Ok(listings) => listings,
                Err(e) => {
                    warn!(category = %category, error = %e, "Category skipped this tick");
                    self.metrics.failed_fetches += 1;
                    continue;
                }
            };

            debug!(category = %category, listings = listings.len(), "Category fetched");

            for mut listing in listings {
                if listing.category != *category {
                    listing.category = category.clone();
                }
                if let Some(event) = self.state.observe(&listing, now) {
                    if event.is_new_listing {
                        self.metrics.new_listings += 1;
                    } else {
                        self.metrics.restocks += 1;
                    }
                    info!(event = %event, "Listing detected");
                    events.push(event);
                }
            }
        }

        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
