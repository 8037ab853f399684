//! Trade web API client.
//!
//! Endpoints (all POST, relative to the region host):
//! - `/Home/GetWorldMarketList`: form; listings for one category view
//! - `/Trademarket/GetBiddingInfoList`: JSON; order book of one item
//! - `/Home/Buy`: form; place a purchase
//!
//! Auth: the session cookie plus the anti-forgery token sent as
//! `__RequestVerificationToken`. Both come from the login flow; this client
//! only reports when they stop working.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{MarketFeed, Region, SessionCredentials};
use crate::types::{BuyOrder, BuyResponse, Category, Listing, MarketError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const FEED_NAME: &str = "trade-web";

const LIST_PATH: &str = "/Home/GetWorldMarketList";
const BIDDING_PATH: &str = "/Trademarket/GetBiddingInfoList";
const BUY_PATH: &str = "/Home/Buy";

const TOKEN_FIELD: &str = "__RequestVerificationToken";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketListResponse {
    #[serde(default)]
    market_list: Option<Vec<serde_json::Value>>,
}

/// One entry of `marketList`. Decoded individually so a single malformed
/// record does not discard the whole category.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawListing {
    main_key: u64,
    #[serde(default)]
    sub_key: u64,
    #[serde(default = "unknown_name")]
    name: String,
    price_per_one: i64,
    /// Units currently available.
    #[serde(default)]
    sum_count: u64,
}

fn unknown_name() -> String {
    "Unknown Item".to_string()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BiddingRequest {
    key_type: u8,
    main_key: u64,
    sub_key: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultResponse {
    #[serde(default = "unknown_code")]
    result_code: i64,
    #[serde(default)]
    result_msg: String,
}

fn unknown_code() -> i64 {
    -1
}

/// One price level of an order book: `price-sellers-buyers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: i64,
    pub sellers: u64,
    pub buyers: u64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Marketplace client bound to one region and one session.
pub struct TradeClient {
    http: Client,
    base_url: String,
    credentials: SessionCredentials,
}

impl TradeClient {
    pub fn new(region: Region, credentials: SessionCredentials, timeout: Duration) -> Result<Self> {
        Self::with_base_url(region.base_url(), credentials, timeout)
    }

    /// Client against an arbitrary host (used for staging hosts and tests).
    pub fn with_base_url(
        base_url: &str,
        credentials: SessionCredentials,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(credentials.user_agent.clone())
            .build()
            .context("Failed to build HTTP client for the trade API")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    // -- Internal helpers ------------------------------------------------

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{path}", self.base_url))
            .header("Cookie", self.credentials.cookie.expose_secret().as_str())
            .header("X-Requested-With", "XMLHttpRequest")
            .header("Origin", self.base_url.as_str())
            .header("Referer", format!("{}/Home/list/55-1", self.base_url))
    }

    fn token(&self) -> &str {
        self.credentials.request_token.expose_secret()
    }

    /// Send and map transport / status failures onto `MarketError`.
    async fn send(&self, request: RequestBuilder) -> Result<Response, MarketError> {
        let resp = request.send().await.map_err(map_transport_error)?;
        check_status(resp).await
    }

    async fn fetch_bidding_levels(&self, item_id: u64) -> Result<Vec<PriceLevel>, MarketError> {
        let body = BiddingRequest {
            key_type: 0,
            main_key: item_id,
            sub_key: 0,
        };
        let resp = self.send(self.post(BIDDING_PATH).json(&body)).await?;
        let parsed: ResultResponse = resp
            .json()
            .await
            .map_err(|e| MarketError::Validation(format!("bidding info for {item_id}: {e}")))?;

        if parsed.result_code != 0 {
            return Err(MarketError::Validation(format!(
                "bidding info for {item_id} returned code {}: {}",
                parsed.result_code, parsed.result_msg
            )));
        }

        Ok(parse_price_levels(&parsed.result_msg))
    }
}

#[async_trait]
impl MarketFeed for TradeClient {
    async fn fetch_category(&self, category: &Category) -> Result<Vec<Listing>, MarketError> {
        debug!(category = %category, "Fetching category");

        let main = category.main_category.to_string();
        let sub = category.sub_category.to_string();
        let form = [
            (TOKEN_FIELD, self.token()),
            ("mainCategory", main.as_str()),
            ("subCategory", sub.as_str()),
        ];

        let resp = self.send(self.post(LIST_PATH).form(&form)).await?;
        let body: MarketListResponse = resp
            .json()
            .await
            .map_err(|e| MarketError::Validation(format!("market list for {category}: {e}")))?;

        Ok(decode_listings(body.market_list.unwrap_or_default(), category))
    }

    async fn fetch_lowest_asks(&self, item_ids: &[u64]) -> Result<HashMap<u64, i64>, MarketError> {
        let results = join_all(item_ids.iter().map(|id| async move {
            (*id, self.fetch_bidding_levels(*id).await)
        }))
        .await;

        let mut asks = HashMap::new();
        let mut last_error = None;
        for (id, result) in results {
            match result {
                Ok(levels) => match lowest_ask(&levels) {
                    Some(price) => {
                        asks.insert(id, price);
                    }
                    None => warn!(item_id = id, "Empty order book"),
                },
                Err(e) if e.is_auth() => return Err(e),
                Err(e) => {
                    warn!(item_id = id, error = %e, "Price fetch failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if asks.is_empty() => Err(e),
            _ => Ok(asks),
        }
    }

    async fn buy(&self, order: &BuyOrder) -> Result<BuyResponse, MarketError> {
        let main = order.item_key.to_string();
        let sub = order.sub_key.to_string();
        let price = order.price_per_unit.to_string();
        let count = order.quantity.to_string();
        let form = [
            (TOKEN_FIELD, self.token()),
            ("mainKey", main.as_str()),
            ("subKey", sub.as_str()),
            ("pricePerOne", price.as_str()),
            ("count", count.as_str()),
        ];

        let resp = self.send(self.post(BUY_PATH).form(&form)).await?;
        let parsed: ResultResponse = resp
            .json()
            .await
            .map_err(|e| MarketError::Validation(format!("buy response: {e}")))?;

        Ok(BuyResponse {
            result_code: parsed.result_code,
            message: if parsed.result_msg.is_empty() {
                "Unknown error".to_string()
            } else {
                parsed.result_msg
            },
        })
    }

    fn name(&self) -> &str {
        FEED_NAME
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn map_transport_error(e: reqwest::Error) -> MarketError {
    if e.is_decode() {
        MarketError::Validation(e.to_string())
    } else {
        // timeouts, refused connections, resets
        MarketError::Transient(e.to_string())
    }
}

async fn check_status(resp: Response) -> Result<Response, MarketError> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(MarketError::Authentication {
            status: status.as_u16(),
        });
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(MarketError::Http {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp)
}

/// Decode `marketList` entries, skipping (and logging) malformed records.
fn decode_listings(records: Vec<serde_json::Value>, category: &Category) -> Vec<Listing> {
    let mut listings = Vec::with_capacity(records.len());
    for record in records {
        match serde_json::from_value::<RawListing>(record) {
            Ok(raw) => listings.push(Listing {
                item_key: raw.main_key,
                sub_key: raw.sub_key,
                display_name: raw.name,
                price_per_unit: raw.price_per_one,
                available_quantity: raw.sum_count,
                category: category.clone(),
            }),
            Err(e) => {
                warn!(category = %category, error = %e, "Skipping malformed listing");
            }
        }
    }
    listings
}

/// Parse `price-sellers-buyers|price-sellers-buyers|...`. Malformed levels
/// are dropped.
pub fn parse_price_levels(msg: &str) -> Vec<PriceLevel> {
    msg.split('|')
        .filter_map(|level| {
            let mut parts = level.trim().split('-');
            let price = parts.next()?.parse().ok()?;
            let sellers = parts.next()?.parse().ok()?;
            let buyers = parts.next()?.parse().ok()?;
            Some(PriceLevel {
                price,
                sellers,
                buyers,
            })
        })
        .collect()
}

/// Lowest price with sellers; falls back to the first level's price when
/// nothing is on sale.
pub fn lowest_ask(levels: &[PriceLevel]) -> Option<i64> {
    levels
        .iter()
        .filter(|l| l.sellers > 0)
        .map(|l| l.price)
        .min()
        .or_else(|| levels.first().map(|l| l.price))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
