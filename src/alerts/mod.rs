//! Opportunity alerts.
//!
//! The sniper hands every profitable assessment to an `AlertDispatcher`.
//! Delivery is fire-and-forget: a dispatcher logs its own failures and never
//! blocks the purchase path.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

use crate::types::{format_silver, Listing, ValueAssessment};

/// Urgency tier for an opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertPriority {
    Normal,
    High,
    Critical,
}

impl AlertPriority {
    /// Critical above 50% ROI or 5B profit, high above 30% or 2B.
    pub fn for_assessment(assessment: &ValueAssessment) -> Self {
        let (roi, profit) = (assessment.roi, assessment.profit);
        if roi > 0.5 || profit > 5_000_000_000 {
            AlertPriority::Critical
        } else if roi > 0.3 || profit > 2_000_000_000 {
            AlertPriority::High
        } else {
            AlertPriority::Normal
        }
    }
}

impl fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertPriority::Normal => write!(f, "NORMAL"),
            AlertPriority::High => write!(f, "HIGH"),
            AlertPriority::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn deliver(&self, assessment: &ValueAssessment, listing: &Listing);
}

/// Writes alerts to the tracing log.
pub struct LogAlerter {
    enabled: bool,
}

impl LogAlerter {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

/// One-line summary used by `LogAlerter`.
pub fn format_alert(assessment: &ValueAssessment, listing: &Listing) -> String {
    format!(
        "[{}] {} @ {} → value {}, profit {} ({:.1}% ROI, {})",
        AlertPriority::for_assessment(assessment),
        listing.display_name,
        format_silver(listing.price_per_unit),
        format_silver(assessment.extraction_value),
        format_silver(assessment.profit),
        assessment.roi * 100.0,
        assessment.outfit_type,
    )
}

#[async_trait]
impl AlertDispatcher for LogAlerter {
    async fn deliver(&self, assessment: &ValueAssessment, listing: &Listing) {
        if !self.enabled {
            return;
        }
        let priority = AlertPriority::for_assessment(assessment);
        let message = format_alert(assessment, listing);
        match priority {
            AlertPriority::Critical => warn!(
                priority = %priority,
                item_key = listing.item_key,
                category = %listing.category,
                "{message}"
            ),
            _ => info!(
                priority = %priority,
                item_key = listing.item_key,
                category = %listing.category,
                "{message}"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
