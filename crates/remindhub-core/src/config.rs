use chrono::FixedOffset;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{HubError, Result};

pub const DEFAULT_GRACE_WINDOW_SECS: i64 = 60;
pub const DEFAULT_MAX_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_DELIVERY_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_STALE_CLAIM_SECS: u64 = 300; // Firing rows older than this are re-queued on start
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_RETRY_BASE_SECS: u64 = 30;
pub const DEFAULT_RETRY_MAX_SECS: u64 = 3600;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Top-level config (remindhub.toml + REMINDHUB_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Policy values for turning text into instants.
///
/// The default hours follow the behaviour users already know from the task
/// inbox: "today" means end of the working day, "tomorrow" and bare weekdays
/// mean the start of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Resolved instants earlier than `reference - grace` are rejected as past.
    #[serde(default = "default_grace_window_secs")]
    pub grace_window_secs: i64,
    /// UTC offset used when the caller does not supply one, e.g. "+02:00".
    #[serde(default = "default_utc_offset")]
    pub default_utc_offset: String,
    #[serde(default = "default_today_hour")]
    pub today_hour: u32,
    #[serde(default = "default_tonight_hour")]
    pub tonight_hour: u32,
    #[serde(default = "default_morning_hour")]
    pub tomorrow_hour: u32,
    /// Hour used for weekdays, calendar dates and day/week/month rules without a time.
    #[serde(default = "default_morning_hour")]
    pub date_hour: u32,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            grace_window_secs: default_grace_window_secs(),
            default_utc_offset: default_utc_offset(),
            today_hour: default_today_hour(),
            tonight_hour: default_tonight_hour(),
            tomorrow_hour: default_morning_hour(),
            date_hour: default_morning_hour(),
        }
    }
}

impl ParserConfig {
    pub fn default_offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.default_utc_offset)
    }
}

/// Dispatch loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on how long the loop sleeps when nothing is due sooner.
    #[serde(default = "default_max_poll_interval_secs")]
    pub max_poll_interval_secs: u64,
    /// A delivery attempt that runs longer than this counts as a retryable failure.
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
    #[serde(default = "default_stale_claim_secs")]
    pub stale_claim_secs: u64,
    /// Maximum reminders claimed per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_poll_interval_secs: default_max_poll_interval_secs(),
            delivery_timeout_secs: default_delivery_timeout_secs(),
            stale_claim_secs: default_stale_claim_secs(),
            batch_size: default_batch_size(),
        }
    }
}

/// Exponential backoff for retryable delivery failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_base_secs")]
    pub base_delay_secs: u64,
    #[serde(default = "default_retry_max_secs")]
    pub max_delay_secs: u64,
    /// Total delivery attempts per occurrence before the reminder is Failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: default_retry_base_secs(),
            max_delay_secs: default_retry_max_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.remindhub/remindhub.db", home)
}
fn default_grace_window_secs() -> i64 {
    DEFAULT_GRACE_WINDOW_SECS
}
fn default_utc_offset() -> String {
    "+00:00".to_string()
}
fn default_today_hour() -> u32 {
    17
}
fn default_tonight_hour() -> u32 {
    20
}
fn default_morning_hour() -> u32 {
    9
}
fn default_max_poll_interval_secs() -> u64 {
    DEFAULT_MAX_POLL_INTERVAL_SECS
}
fn default_delivery_timeout_secs() -> u64 {
    DEFAULT_DELIVERY_TIMEOUT_SECS
}
fn default_stale_claim_secs() -> u64 {
    DEFAULT_STALE_CLAIM_SECS
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_retry_base_secs() -> u64 {
    DEFAULT_RETRY_BASE_SECS
}
fn default_retry_max_secs() -> u64 {
    DEFAULT_RETRY_MAX_SECS
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl HubConfig {
    /// Load config from a TOML file with REMINDHUB_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.remindhub/remindhub.toml
    ///
    /// Nested keys use a double underscore: `REMINDHUB_RETRY__MAX_ATTEMPTS=5`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("REMINDHUB_").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: HubConfig = figment
            .extract()
            .map_err(|e| HubError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.parser.default_offset()?;
        for (name, hour) in [
            ("today_hour", self.parser.today_hour),
            ("tonight_hour", self.parser.tonight_hour),
            ("tomorrow_hour", self.parser.tomorrow_hour),
            ("date_hour", self.parser.date_hour),
        ] {
            if hour > 23 {
                return Err(HubError::Config(format!("parser.{name} = {hour} is not an hour")));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(HubError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.scheduler.max_poll_interval_secs == 0 {
            return Err(HubError::Config(
                "scheduler.max_poll_interval_secs must be at least 1".into(),
            ));
        }
        // A shorter cutoff would re-queue claims whose delivery is still running.
        if self.scheduler.stale_claim_secs <= self.scheduler.delivery_timeout_secs {
            return Err(HubError::Config(format!(
                "scheduler.stale_claim_secs ({}) must exceed scheduler.delivery_timeout_secs ({})",
                self.scheduler.stale_claim_secs, self.scheduler.delivery_timeout_secs
            )));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.remindhub/remindhub.toml", home)
}

/// Parse "+HH:MM", "-HH:MM", "+HHMM", "Z" or "UTC" into a [`FixedOffset`].
pub fn parse_utc_offset(s: &str) -> Result<FixedOffset> {
    let s = s.trim();
    let invalid = || HubError::InvalidOffset(s.to_string());
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }
    s.parse::<FixedOffset>().map_err(|_| invalid())
}
