//! Typed configuration from environment variables and an optional TOML
//! file.
//!
//! Loads once at startup, fails fast on malformed values.
//! The database URL is wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Smallest accepted scheduler tick interval.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct Config {
    /// Postgres URL. `None` runs against the in-process store.
    pub database_url: Option<SecretString>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let mut scheduler = SchedulerConfig::default();
        scheduler.apply_env()?;
        scheduler.validate()?;
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok().map(SecretString::from),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            scheduler,
        })
    }

    /// Like [`Config::from_env`], but scheduler settings start from a TOML
    /// file and environment variables override them.
    pub fn from_env_and_file(path: &Path) -> Result<Self> {
        let mut config = Self::from_env()?;
        let mut scheduler = SchedulerConfig::load(path)?;
        scheduler.apply_env()?;
        scheduler.validate()?;
        config.scheduler = scheduler;
        Ok(config)
    }
}

/// Direction in which the pull path ranks pending tasks by `priority_rank`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankOrder {
    /// Smallest rank first: RUSH before LOW.
    #[default]
    Ascending,
    /// Largest rank first: LOW before RUSH.
    Descending,
}

impl std::str::FromStr for RankOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ascending" | "asc" => Ok(RankOrder::Ascending),
            "descending" | "desc" => Ok(RankOrder::Descending),
            _ => Err(Error::Config(format!("unknown pull order: {s}"))),
        }
    }
}

/// Scheduling policy.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// A busy worker silent for longer than this is declared failed.
    pub liveness_timeout: Duration,
    /// Automatic retries per failure episode.
    pub retry_budget: u32,
    pub pull_order: RankOrder,
    /// Let the dispatcher hand pending work to idle ready workers instead of
    /// waiting for them to pull.
    pub assign_idle_workers: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            liveness_timeout: Duration::from_secs(30 * 60),
            retry_budget: 1,
            pull_order: RankOrder::Ascending,
            assign_idle_workers: false,
        }
    }
}

/// On-disk shape of the `[scheduler]` table. Durations are in seconds.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SchedulerFile {
    tick_interval_secs: Option<u64>,
    liveness_timeout_secs: Option<u64>,
    retry_budget: Option<u32>,
    pull_order: Option<RankOrder>,
    assign_idle_workers: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    scheduler: SchedulerFile,
}

impl SchedulerConfig {
    /// Parse a TOML document with an optional `[scheduler]` table.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| Error::Config(format!("bad config: {e}")))?;
        let s = file.scheduler;
        let defaults = Self::default();
        let config = Self {
            tick_interval: s
                .tick_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.tick_interval),
            liveness_timeout: s
                .liveness_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.liveness_timeout),
            retry_budget: s.retry_budget.unwrap_or(defaults.retry_budget),
            pull_order: s.pull_order.unwrap_or(defaults.pull_order),
            assign_idle_workers: s
                .assign_idle_workers
                .unwrap_or(defaults.assign_idle_workers),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Override fields from `RENDERQ_*` environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(secs) = parsed_var::<u64>("RENDERQ_TICK_INTERVAL_SECS")? {
            self.tick_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parsed_var::<u64>("RENDERQ_LIVENESS_TIMEOUT_SECS")? {
            self.liveness_timeout = Duration::from_secs(secs);
        }
        if let Some(budget) = parsed_var::<u32>("RENDERQ_RETRY_BUDGET")? {
            self.retry_budget = budget;
        }
        if let Ok(order) = std::env::var("RENDERQ_PULL_ORDER") {
            self.pull_order = order.parse()?;
        }
        if let Some(flag) = parsed_var::<bool>("RENDERQ_ASSIGN_IDLE_WORKERS")? {
            self.assign_idle_workers = flag;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval < MIN_TICK_INTERVAL {
            return Err(Error::Config(format!(
                "tick interval {:?} is below the {:?} floor",
                self.tick_interval, MIN_TICK_INTERVAL
            )));
        }
        if self.liveness_timeout.is_zero() {
            return Err(Error::Config("liveness timeout must be positive".to_string()));
        }
        Ok(())
    }
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid {name}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}
