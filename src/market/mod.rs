//! Marketplace integration.
//!
//! Defines the `MarketFeed` trait (everything the pipeline needs from the
//! marketplace) and the `TradeClient` implementation that talks to the
//! regional trade web API with a caller-supplied session.

pub mod client;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::{BuyOrder, BuyResponse, Category, Listing, MarketError};

/// Abstraction over the marketplace.
///
/// Implementors never refresh credentials themselves: a 401/403 must surface
/// as `MarketError::Authentication`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// All listings currently shown in one category view, in response order.
    async fn fetch_category(&self, category: &Category) -> Result<Vec<Listing>, MarketError>;

    /// Lowest current ask for each requested item id. Items without a
    /// usable order book are absent from the map.
    async fn fetch_lowest_asks(&self, item_ids: &[u64]) -> Result<HashMap<u64, i64>, MarketError>;

    /// Place a purchase. Sent once; the caller decides what a failure means.
    async fn buy(&self, order: &BuyOrder) -> Result<BuyResponse, MarketError>;

    /// Feed name for logging.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Regions
// ---------------------------------------------------------------------------

/// Marketplace region; each has its own trade host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Eu,
    Na,
    Kr,
    Sa,
}

impl Region {
    pub fn base_url(&self) -> &'static str {
        match self {
            Region::Eu => "https://eu-trade.naeu.playblackdesert.com",
            Region::Na => "https://na-trade.naeu.playblackdesert.com",
            Region::Kr => "https://trade.kr.playblackdesert.com",
            Region::Sa => "https://sa-trade.tr.playblackdesert.com",
        }
    }
}

impl Default for Region {
    fn default() -> Self {
        Region::Eu
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Region::Eu => "eu",
            Region::Na => "na",
            Region::Kr => "kr",
            Region::Sa => "sa",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Session credentials
// ---------------------------------------------------------------------------

/// Opaque credential bundle produced by the external login flow.
#[derive(Clone)]
pub struct SessionCredentials {
    pub cookie: SecretString,
    pub request_token: SecretString,
    pub user_agent: String,
}

impl SessionCredentials {
    pub fn new(cookie: String, request_token: String, user_agent: String) -> Self {
        Self {
            cookie: SecretString::new(cookie),
            request_token: SecretString::new(request_token),
            user_agent,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cookie.expose_secret().is_empty() || self.request_token.expose_secret().is_empty()
    }
}

impl std::fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("cookie", &"[REDACTED]")
            .field("request_token", &"[REDACTED]")
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Bounded retry with exponential backoff for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// No retries, no waiting.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_backoff: Duration::ZERO,
        }
    }

    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Run `op`, retrying only transient errors. Authentication and
    /// validation errors return on the first occurrence.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, MarketError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MarketError>>,
    {
        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                let delay = self.backoff_for(attempt);
                debug!(label, attempt, delay_ms = delay.as_millis() as u64, "Retrying");
                tokio::time::sleep(delay).await;
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    warn!(label, attempt, error = %e, "Transient marketplace error");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
