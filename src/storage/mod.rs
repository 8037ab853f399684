//! Persistence layer.
//!
//! Writes the session report (detector metrics, poller statistics, purchase
//! statistics and the full purchase audit trail) to a JSON file at shutdown.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::engine::detector::DetectorMetrics;
use crate::engine::gate::PurchaseStats;
use crate::engine::poller::PollerStats;
use crate::types::PurchaseAttempt;

/// Default report file path.
pub const DEFAULT_REPORT_FILE: &str = "pearl_sniper_report.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub generated_at: DateTime<Utc>,
    pub detector: DetectorMetrics,
    pub poller: PollerStats,
    pub purchases: PurchaseStats,
    pub history: Vec<PurchaseAttempt>,
}

/// Save the session report as pretty JSON.
pub fn save_report(report: &SessionReport, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_REPORT_FILE);
    let json = serde_json::to_string_pretty(report)
        .context("Failed to serialise session report")?;

    std::fs::write(path, &json)
        .with_context(|| format!("Failed to write report to {path}"))?;

    debug!(path, attempts = report.history.len(), "Report saved");
    Ok(())
}

/// Load a previously written report.
/// Returns None if the file doesn't exist.
pub fn load_report(path: Option<&str>) -> Result<Option<SessionReport>> {
    let path = path.unwrap_or(DEFAULT_REPORT_FILE);

    if !Path::new(path).exists() {
        info!(path, "No report found");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read report from {path}"))?;

    let report: SessionReport = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse report from {path}"))?;

    Ok(Some(report))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
