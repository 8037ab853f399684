//! Shared types for the sniper.
//!
//! These types form the data model used across all modules: what the
//! marketplace returns, what the detector emits, how a listing is valued,
//! and what the purchase gate records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

/// A marketplace category view, addressed by `(main, sub)` category ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Category {
    pub main_category: u32,
    pub sub_category: u32,
    pub display_name: String,
}

impl Category {
    pub fn new(main_category: u32, sub_category: u32, display_name: &str) -> Self {
        Self {
            main_category,
            sub_category,
            display_name: display_name.to_string(),
        }
    }

    /// The eight pearl-shop category views (main category 55).
    pub fn pearl_shop() -> Vec<Category> {
        vec![
            Category::new(55, 1, "Male Outfits (Set)"),
            Category::new(55, 2, "Female Outfits (Set)"),
            Category::new(55, 3, "Male Outfits (Single)"),
            Category::new(55, 4, "Female Outfits (Single)"),
            Category::new(55, 5, "Class Outfits (Set)"),
            Category::new(55, 6, "Functional"),
            Category::new(55, 7, "Mounts"),
            Category::new(55, 8, "Pets"),
        ]
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}-{})",
            self.display_name, self.main_category, self.sub_category
        )
    }
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

/// One price-level entry for an item within a category view.
/// Fetched fresh every tick and never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub item_key: u64,
    pub sub_key: u64,
    pub display_name: String,
    /// Price per unit in silver.
    pub price_per_unit: i64,
    pub available_quantity: u64,
    pub category: Category,
}

impl Listing {
    pub fn in_stock(&self) -> bool {
        self.available_quantity >= 1
    }

    /// Identity of this specific listing instance. The same item at a
    /// different price is a different key.
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            item_key: self.item_key,
            price_per_unit: self.price_per_unit,
            sub_category: self.category.sub_category,
        }
    }

    pub fn stock_key(&self) -> StockKey {
        StockKey {
            item_key: self.item_key,
            sub_category: self.category.sub_category,
        }
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] @ {} x{}",
            self.display_name,
            self.item_key,
            format_silver(self.price_per_unit),
            self.available_quantity,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub item_key: u64,
    pub price_per_unit: i64,
    pub sub_category: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub item_key: u64,
    pub sub_category: u32,
}

/// Emitted by the detector for a listing that is unseen or has grown in stock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionEvent {
    pub category: Category,
    pub listing: Listing,
    pub timestamp: DateTime<Utc>,
    pub is_new_listing: bool,
    /// Highest quantity observed for the stock key before this event.
    pub prior_quantity: u64,
}

impl fmt::Display for DetectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_new_listing { "new" } else { "restock" };
        write!(
            f,
            "[{}] {} ({kind}, was x{}) at {}",
            self.category.display_name,
            self.listing,
            self.prior_quantity,
            self.timestamp.format("%H:%M:%S"),
        )
    }
}

// ---------------------------------------------------------------------------
// Valuation
// ---------------------------------------------------------------------------

/// Outfit archetype, deciding how many materials an extraction yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Archetype {
    Premium,
    Classic,
    Simple,
    Mount,
}

impl Archetype {
    pub const ALL: &'static [Archetype] = &[
        Archetype::Premium,
        Archetype::Classic,
        Archetype::Simple,
        Archetype::Mount,
    ];
}

impl fmt::Display for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Archetype::Premium => write!(f, "premium"),
            Archetype::Classic => write!(f, "classic"),
            Archetype::Simple => write!(f, "simple"),
            Archetype::Mount => write!(f, "mount"),
        }
    }
}

/// Parse an archetype name (case-insensitive).
impl std::str::FromStr for Archetype {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "premium" => Ok(Archetype::Premium),
            "classic" => Ok(Archetype::Classic),
            "simple" => Ok(Archetype::Simple),
            "mount" => Ok(Archetype::Mount),
            other => anyhow::bail!("Unknown outfit archetype: {other}"),
        }
    }
}

/// Profitability of converting a listed item into its materials.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueAssessment {
    /// Item key, when the assessment was made for a concrete listing.
    pub item_id: Option<u64>,
    pub outfit_type: Archetype,
    pub listed_price: i64,
    pub extraction_value: i64,
    /// Extraction value minus listed price. Extraction is untaxed.
    pub profit: i64,
    pub roi: f64,
    pub is_profitable: bool,
    pub price_a: i64,
    pub price_b: i64,
}

impl fmt::Display for ValueAssessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} listed {} -> extracts {} (profit {}, ROI {:.1}%)",
            self.outfit_type,
            format_silver(self.listed_price),
            format_silver(self.extraction_value),
            format_silver(self.profit),
            self.roi * 100.0,
        )
    }
}

// ---------------------------------------------------------------------------
// Purchases
// ---------------------------------------------------------------------------

/// A purchase request sent to the marketplace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyOrder {
    pub item_key: u64,
    pub sub_key: u64,
    pub price_per_unit: i64,
    pub quantity: u64,
}

/// Raw marketplace answer to a purchase request. `result_code == 0` is success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyResponse {
    pub result_code: i64,
    pub message: String,
}

impl BuyResponse {
    pub fn is_success(&self) -> bool {
        self.result_code == 0
    }
}

/// A safety threshold that blocked a purchase. Not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "guard", rename_all = "snake_case")]
pub enum GuardRejection {
    Disabled,
    PriceAboveMax { price: i64, max: i64 },
    ProfitBelowMin { profit: i64, min: i64 },
    RoiBelowMin { roi: f64, min: f64 },
    RateLimited { purchases: usize, max: u32 },
    Cooldown { remaining_secs: f64 },
    ConfirmationDeclined,
}

impl fmt::Display for GuardRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardRejection::Disabled => write!(f, "Auto-buy is disabled"),
            GuardRejection::PriceAboveMax { price, max } => {
                write!(f, "Price {} exceeds max {}", format_silver(*price), format_silver(*max))
            }
            GuardRejection::ProfitBelowMin { profit, min } => {
                write!(f, "Profit {} below min {}", format_silver(*profit), format_silver(*min))
            }
            GuardRejection::RoiBelowMin { roi, min } => {
                write!(f, "ROI {:.1}% below min {:.1}%", roi * 100.0, min * 100.0)
            }
            GuardRejection::RateLimited { purchases, max } => write!(
                f,
                "Rate limit exceeded ({purchases}/{max} purchases in the last hour)"
            ),
            GuardRejection::Cooldown { remaining_secs } => {
                write!(f, "Cooldown active ({remaining_secs:.1}s remaining)")
            }
            GuardRejection::ConfirmationDeclined => write!(f, "Manual confirmation declined"),
        }
    }
}

/// What happened once every guard passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Execution {
    /// The server accepted the order.
    Purchased,
    /// Dry-run mode: would have bought, no request was sent.
    DryRun,
    /// The server received the order and refused it (funds, availability).
    Failed { message: String },
    /// The request never got a usable answer (timeout, connection loss).
    Abandoned { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PurchaseOutcome {
    Authorized(Execution),
    Rejected(GuardRejection),
}

impl PurchaseOutcome {
    /// Counts toward the hourly limit and the statistics.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            PurchaseOutcome::Authorized(Execution::Purchased)
                | PurchaseOutcome::Authorized(Execution::DryRun)
        )
    }

    pub fn reason(&self) -> String {
        match self {
            PurchaseOutcome::Authorized(Execution::Purchased) => "Purchased".to_string(),
            PurchaseOutcome::Authorized(Execution::DryRun) => {
                "Dry run - no actual purchase".to_string()
            }
            PurchaseOutcome::Authorized(Execution::Failed { message }) => {
                format!("API error: {message}")
            }
            PurchaseOutcome::Authorized(Execution::Abandoned { message }) => {
                format!("Request abandoned: {message}")
            }
            PurchaseOutcome::Rejected(rejection) => rejection.to_string(),
        }
    }
}

/// Append-only audit record of one pass through the purchase gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseAttempt {
    pub id: Uuid,
    pub item_id: u64,
    pub item_name: String,
    pub price: i64,
    pub timestamp: DateTime<Utc>,
    pub outcome: PurchaseOutcome,
    /// Human-readable reason, derived from `outcome`.
    pub reason: String,
    pub profit: Option<i64>,
    pub roi: Option<f64>,
}

impl PurchaseAttempt {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

impl fmt::Display for PurchaseAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] @ {}: {}",
            self.item_name,
            self.item_id,
            format_silver(self.price),
            self.reason,
        )
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Compact silver amount: `2.17B`, `450M`, `50K`, or the plain number.
pub fn format_silver(amount: i64) -> String {
    let abs = amount.unsigned_abs();
    let sign = if amount < 0 { "-" } else { "" };
    if abs >= 1_000_000_000 {
        format!("{sign}{:.2}B", abs as f64 / 1_000_000_000.0)
    } else if abs >= 1_000_000 {
        format!("{sign}{:.0}M", abs as f64 / 1_000_000.0)
    } else if abs >= 1_000 {
        format!("{sign}{:.0}K", abs as f64 / 1_000.0)
    } else {
        format!("{sign}{abs}")
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failures talking to the marketplace.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarketError {
    /// 401/403. Credentials are invalid; never retried.
    #[error("Authentication failed (HTTP {status}): credentials invalid")]
    Authentication { status: u16 },

    /// Timeout or connection failure. Retried a bounded number of times.
    #[error("Transient network error: {0}")]
    Transient(String),

    /// A response that could not be understood.
    #[error("Malformed response: {0}")]
    Validation(String),

    /// Any other non-success status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
}

impl MarketError {
    pub fn is_auth(&self) -> bool {
        matches!(self, MarketError::Authentication { .. })
    }

    /// Worth retrying: timeouts, connection failures and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            MarketError::Transient(_) => true,
            MarketError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
