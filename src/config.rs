//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! section and field has a default, so a partial (or empty) file is valid.
//! Session secrets are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::gate::GateConfig;
use crate::engine::poller::{default_prime_time, HourRange, PollerConfig, PrimeWindow};
use crate::market::{Region, RetryPolicy, SessionCredentials};
use crate::storage::DEFAULT_REPORT_FILE;
use crate::strategy::valuation::ValuationConfig;
use crate::types::Category;

/// Env var overriding the config file path.
pub const CONFIG_PATH_ENV: &str = "PEARL_SNIPER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Upper bound for any poll interval.
pub const MAX_INTERVAL_SECS: f64 = 3600.0;
/// Upper bound for windows, TTLs and the purchase cooldown (one week).
pub const MAX_WINDOW_SECS: i64 = 7 * 24 * 3600;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub market: MarketConfig,
    pub session: SessionConfig,
    pub polling: PollingConfig,
    pub valuation: ValuationSection,
    pub purchase: PurchaseSection,
    pub alerts: AlertsConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarketConfig {
    pub region: Region,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Overrides the pearl-shop category list when set.
    pub categories: Option<Vec<Category>>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            region: Region::default(),
            request_timeout_secs: 5,
            max_retries: 2,
            retry_backoff_ms: 200,
            categories: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_env: String,
    pub token_env: String,
    pub user_agent: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_env: "PEARL_SNIPER_COOKIE".into(),
            token_env: "PEARL_SNIPER_REQUEST_TOKEN".into(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub base_interval_secs: f64,
    pub peak_interval_secs: f64,
    pub activity_interval_secs: f64,
    pub activity_window_secs: i64,
    pub peak_hours_enabled: bool,
    pub peak_hours: HourRange,
    pub prime_time_enabled: bool,
    pub prime_time: Vec<PrimeWindow>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            base_interval_secs: 2.0,
            peak_interval_secs: 1.0,
            activity_interval_secs: 1.5,
            activity_window_secs: 300,
            peak_hours_enabled: true,
            peak_hours: HourRange::new(18, 22),
            prime_time_enabled: true,
            prime_time: default_prime_time(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ValuationSection {
    pub min_profit: i64,
    pub min_roi: f64,
    pub price_ttl_secs: i64,
    pub fallback_price_a: i64,
    pub fallback_price_b: i64,
}

impl Default for ValuationSection {
    fn default() -> Self {
        Self {
            min_profit: 100_000_000,
            min_roi: 0.05,
            price_ttl_secs: 300,
            fallback_price_a: 3_000_000,
            fallback_price_b: 18_000_000,
        }
    }
}

/// Purchasing is opt-in: disabled and dry-run unless the file says otherwise.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PurchaseSection {
    pub enabled: bool,
    pub max_price: i64,
    /// Falls back to `valuation.min_profit`.
    pub min_profit: Option<i64>,
    /// Falls back to `valuation.min_roi`.
    pub min_roi: Option<f64>,
    pub max_purchases_per_hour: u32,
    pub cooldown_secs: f64,
    pub dry_run: bool,
    pub require_confirmation: bool,
}

impl Default for PurchaseSection {
    fn default() -> Self {
        Self {
            enabled: false,
            max_price: 5_000_000_000,
            min_profit: None,
            min_roi: None,
            max_purchases_per_hour: 10,
            cooldown_secs: 2.0,
            dry_run: true,
            require_confirmation: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AlertsConfig {
    pub enabled: bool,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReportConfig {
    pub path: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_REPORT_FILE.into(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Config path from `PEARL_SNIPER_CONFIG`, else `config.toml`.
    pub fn path_from_env() -> String {
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    fn validate(&self) -> Result<()> {
        let p = &self.polling;
        for (name, secs) in [
            ("base_interval_secs", p.base_interval_secs),
            ("peak_interval_secs", p.peak_interval_secs),
            ("activity_interval_secs", p.activity_interval_secs),
        ] {
            if !secs.is_finite() || secs <= 0.0 {
                bail!("polling.{name} must be positive, got {secs}");
            }
            if secs > MAX_INTERVAL_SECS {
                bail!("polling.{name} must be at most {MAX_INTERVAL_SECS}s, got {secs}");
            }
        }
        for (name, secs) in [
            ("polling.activity_window_secs", p.activity_window_secs),
            ("valuation.price_ttl_secs", self.valuation.price_ttl_secs),
        ] {
            if !(0..=MAX_WINDOW_SECS).contains(&secs) {
                bail!("{name} must be between 0 and {MAX_WINDOW_SECS}, got {secs}");
            }
        }
        let hours = std::iter::once((p.peak_hours.start_hour, p.peak_hours.end_hour))
            .chain(p.prime_time.iter().map(|w| (w.start_hour, w.end_hour)));
        for (start, end) in hours {
            if start > 23 || end > 24 {
                bail!("hour range {start}-{end} is outside 0-24");
            }
        }
        let cooldown = self.purchase.cooldown_secs;
        if !cooldown.is_finite() || cooldown < 0.0 || cooldown > MAX_WINDOW_SECS as f64 {
            bail!("purchase.cooldown_secs must be between 0 and {MAX_WINDOW_SECS}, got {cooldown}");
        }
        if self.market.request_timeout_secs == 0 {
            bail!("market.request_timeout_secs must be positive");
        }
        if self.market.request_timeout_secs > MAX_WINDOW_SECS as u64 {
            bail!("market.request_timeout_secs must be at most {MAX_WINDOW_SECS}");
        }
        Ok(())
    }

    /// Settings that are valid but likely unintended.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        let timeout = self.market.request_timeout_secs as f64;
        if timeout >= self.polling.base_interval_secs {
            out.push(format!(
                "market.request_timeout_secs ({timeout}s) is not below \
                 polling.base_interval_secs ({}s): a slow category can stretch a tick \
                 past the poll interval",
                self.polling.base_interval_secs
            ));
        }
        out
    }

    // -- Conversions into component configs --------------------------------

    pub fn categories(&self) -> Vec<Category> {
        self.market
            .categories
            .clone()
            .unwrap_or_else(Category::pearl_shop)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.market.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.market.max_retries,
            base_backoff: Duration::from_millis(self.market.retry_backoff_ms),
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        let p = &self.polling;
        PollerConfig {
            base_interval: Duration::from_secs_f64(p.base_interval_secs),
            peak_interval: Duration::from_secs_f64(p.peak_interval_secs),
            activity_interval: Duration::from_secs_f64(p.activity_interval_secs),
            activity_window: chrono::Duration::seconds(p.activity_window_secs),
            peak_hours: p.peak_hours_enabled.then_some(p.peak_hours),
            prime_time: if p.prime_time_enabled {
                p.prime_time.clone()
            } else {
                Vec::new()
            },
        }
    }

    pub fn valuation_config(&self) -> ValuationConfig {
        ValuationConfig {
            min_profit: self.valuation.min_profit,
            min_roi: self.valuation.min_roi,
            price_ttl: chrono::Duration::seconds(self.valuation.price_ttl_secs),
        }
    }

    pub fn gate_config(&self) -> GateConfig {
        let p = &self.purchase;
        GateConfig {
            enabled: p.enabled,
            max_price: p.max_price,
            min_profit: Some(p.min_profit.unwrap_or(self.valuation.min_profit)),
            min_roi: Some(p.min_roi.unwrap_or(self.valuation.min_roi)),
            max_purchases_per_hour: p.max_purchases_per_hour,
            cooldown: chrono::Duration::milliseconds((p.cooldown_secs * 1000.0).round() as i64),
            dry_run: p.dry_run,
            require_confirmation: p.require_confirmation,
        }
    }

    /// Read session secrets from the configured env vars.
    pub fn credentials(&self) -> Result<SessionCredentials> {
        let cookie = Self::resolve_env(&self.session.cookie_env)?;
        let token = Self::resolve_env(&self.session.token_env)?;
        let creds = SessionCredentials::new(cookie, token, self.session.user_agent.clone());
        if creds.is_empty() {
            bail!(
                "Session credentials are empty; set {} and {}",
                self.session.cookie_env,
                self.session.token_env
            );
        }
        Ok(creds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    #[test]
    fn test_empty_file_uses_defaults() {
        let cfg = AppConfig::parse("").unwrap();
        assert_eq!(cfg.market.region, Region::Eu);
        assert_eq!(cfg.market.request_timeout_secs, 5);
        assert_eq!(cfg.categories().len(), 8);
        assert_eq!(cfg.polling.peak_hours, HourRange::new(18, 22));
        assert!(!cfg.purchase.enabled);
        assert!(cfg.purchase.dry_run);
        assert_eq!(cfg.report.path, DEFAULT_REPORT_FILE);
    }

    #[test]
    fn test_partial_sections() {
        let cfg = AppConfig::parse(
            r#"
            [market]
            region = "na"

            [purchase]
            enabled = true
            dry_run = false
            max_price = 3000000000
            cooldown_secs = 0.5

            [polling]
            peak_hours_enabled = false
            prime_time = [{ weekday = "Thu", start_hour = 22, end_hour = 2 }]
            "#,
        )
        .unwrap();

        assert_eq!(cfg.market.region, Region::Na);
        assert_eq!(cfg.market.max_retries, 2);

        let gate = cfg.gate_config();
        assert!(gate.enabled);
        assert!(!gate.dry_run);
        assert_eq!(gate.max_price, 3_000_000_000);
        assert_eq!(gate.cooldown, chrono::Duration::milliseconds(500));
        // thresholds inherited from [valuation]
        assert_eq!(gate.min_profit, Some(100_000_000));
        assert_eq!(gate.min_roi, Some(0.05));

        let poller = cfg.poller_config();
        assert!(poller.peak_hours.is_none());
        assert_eq!(poller.prime_time, vec![PrimeWindow::new(Weekday::Thu, 22, 2)]);
        assert_eq!(poller.base_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_prime_time_disabled() {
        let cfg = AppConfig::parse("[polling]\nprime_time_enabled = false").unwrap();
        assert!(cfg.poller_config().prime_time.is_empty());
        assert_eq!(cfg.poller_config().peak_hours, Some(HourRange::new(18, 22)));
    }

    #[test]
    fn test_custom_categories() {
        let cfg = AppConfig::parse(
            r#"
            [[market.categories]]
            main_category = 55
            sub_category = 7
            display_name = "Mounts"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.categories(), vec![Category::new(55, 7, "Mounts")]);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(AppConfig::parse("[polling]\nbase_interval_secs = 0").is_err());
        assert!(AppConfig::parse("[polling]\npeak_hours = { start_hour = 25, end_hour = 2 }").is_err());
        assert!(AppConfig::parse("[purchase]\ncooldown_secs = -1.0").is_err());
        assert!(AppConfig::parse("[market]\nregion = \"mars\"").is_err());
    }

    #[test]
    fn test_validation_rejects_out_of_range_durations() {
        assert!(AppConfig::parse("[polling]\nactivity_window_secs = 9223372036854775807").is_err());
        assert!(AppConfig::parse("[polling]\nactivity_window_secs = -1").is_err());
        assert!(AppConfig::parse("[valuation]\nprice_ttl_secs = 9223372036854775807").is_err());
        assert!(AppConfig::parse("[valuation]\nprice_ttl_secs = -5").is_err());
        assert!(AppConfig::parse("[polling]\nbase_interval_secs = 1e30").is_err());
        assert!(AppConfig::parse("[polling]\npeak_interval_secs = 3601.0").is_err());
        assert!(AppConfig::parse("[purchase]\ncooldown_secs = 1e300").is_err());
        assert!(AppConfig::parse("[market]\nrequest_timeout_secs = 18446744073709551615").is_err());
    }

    #[test]
    fn test_bounds_are_inclusive_and_convert() {
        let cfg = AppConfig::parse(
            r#"
            [polling]
            base_interval_secs = 3600.0
            activity_window_secs = 604800

            [valuation]
            price_ttl_secs = 0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.poller_config().base_interval, Duration::from_secs(3600));
        assert_eq!(cfg.poller_config().activity_window, chrono::Duration::weeks(1));
        assert_eq!(cfg.valuation_config().price_ttl, chrono::Duration::zero());
    }

    #[test]
    fn test_timeout_not_below_interval_warns() {
        // shipped defaults: 5s timeout against a 2s base interval
        let warnings = AppConfig::default().warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("request_timeout_secs"));

        let cfg = AppConfig::parse("[market]\nrequest_timeout_secs = 1").unwrap();
        assert!(cfg.warnings().is_empty());
    }

    #[test]
    fn test_conversions() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.retry_policy().max_retries, 2);
        assert_eq!(cfg.retry_policy().base_backoff, Duration::from_millis(200));
        assert_eq!(cfg.request_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.valuation_config().price_ttl, chrono::Duration::seconds(300));
        assert_eq!(cfg.gate_config().cooldown, chrono::Duration::seconds(2));
    }

    #[test]
    fn test_credentials_missing_env() {
        let cfg = AppConfig {
            session: SessionConfig {
                cookie_env: "PEARL_SNIPER_TEST_UNSET_COOKIE_VAR".into(),
                token_env: "PEARL_SNIPER_TEST_UNSET_TOKEN_VAR".into(),
                ..SessionConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(cfg.credentials().is_err());
    }

    #[test]
    fn test_load_shipped_config() {
        // The sample config at the crate root must stay parseable.
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml");
        let cfg = AppConfig::load(path).unwrap();
        assert_eq!(cfg.categories().len(), 8);
        assert!(cfg.purchase.dry_run);
    }
}
