//! Configuration file handling.
//!
//! Settings live in `leafgrade.toml`. Every field has a default, so a missing
//! file or a partial one is fine.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "leafgrade.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub grades: GradesConfig,

    #[serde(default)]
    pub analytics: AnalyticsPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection string. `DATABASE_URL` takes precedence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            acquire_timeout_seconds: default_acquire_timeout(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout() -> u64 {
    10
}

/// The known-grade enumeration, in display order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradesConfig {
    #[serde(default = "default_grades")]
    pub known: Vec<String>,

    #[serde(default = "default_palette")]
    pub palette: Vec<String>,
}

impl Default for GradesConfig {
    fn default() -> Self {
        Self {
            known: default_grades(),
            palette: default_palette(),
        }
    }
}

fn default_grades() -> Vec<String> {
    ["ChengShu", "JiaShu", "QianShu", "ShangShu"]
        .into_iter()
        .map(String::from)
        .collect()
}

pub fn default_palette() -> Vec<String> {
    ["#10b981", "#f59e0b", "#ef4444", "#6b7280"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// What to do with records whose grade is not in the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedGrades {
    /// Counted in totals and averages, left out of per-grade figures.
    #[default]
    Count,
    /// Dropped before anything is computed.
    Exclude,
}

/// Which calendar a record's month is read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonthBucketing {
    #[default]
    Utc,
    /// The offset the timestamp was recorded with.
    RecordOffset,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsPolicy {
    #[serde(default)]
    pub unmatched_grades: UnmatchedGrades,

    #[serde(default)]
    pub month_bucketing: MonthBucketing,

    /// Most recent months kept in the quality trend.
    #[serde(default = "default_trend_months")]
    pub trend_months: usize,

    /// Length of each comparison window for the period deltas.
    #[serde(default = "default_window_days")]
    pub window_days: i64,
}

impl Default for AnalyticsPolicy {
    fn default() -> Self {
        Self {
            unmatched_grades: UnmatchedGrades::default(),
            month_bucketing: MonthBucketing::default(),
            trend_months: default_trend_months(),
            window_days: default_window_days(),
        }
    }
}

const MAX_WINDOW_DAYS: i64 = 36_500;
const MAX_TREND_MONTHS: usize = 1_200;

fn default_trend_months() -> usize {
    6
}

fn default_window_days() -> i64 {
    30
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let analytics = &self.analytics;
        if !(1..=MAX_WINDOW_DAYS).contains(&analytics.window_days) {
            bail!(
                "analytics.window_days must be between 1 and {MAX_WINDOW_DAYS}, got {}",
                analytics.window_days
            );
        }
        if !(1..=MAX_TREND_MONTHS).contains(&analytics.trend_months) {
            bail!(
                "analytics.trend_months must be between 1 and {MAX_TREND_MONTHS}, got {}",
                analytics.trend_months
            );
        }
        Ok(())
    }

    /// Loads `path` when given, otherwise `leafgrade.toml` in the working
    /// directory if it exists, otherwise defaults.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            Self::load(default_path)
        } else {
            Ok(Self::default())
        }
    }

    /// `DATABASE_URL` wins over the file.
    pub fn database_url(&self) -> Option<String> {
        std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.database.url.clone())
    }

    pub fn default_toml() -> Result<String> {
        toml::to_string_pretty(&Config::default()).context("failed to render default config")
    }
}
