use std::collections::HashMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PROVIDER_URL: &str = "https://v3.football.api-sports.io";
/// Free API-Football plans allow 10 calls per rolling minute.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 10;
pub const DEFAULT_LOG_RETENTION_DAYS: u32 = 30;

/// Top-level config (matchday.toml + MATCHDAY_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchdayConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    /// Per-job overrides keyed by job id, e.g. `[jobs.fixtures]`.
    #[serde(default)]
    pub jobs: HashMap<String, JobOverride>,
}

/// External data provider (API-Football v3 compatible).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_url")]
    pub base_url: String,
    /// Sent as `x-apisports-key`. Jobs fail with a configuration error when unset.
    pub api_key: Option<String>,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
    /// Pause between dependent calls inside one handler.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    /// Upper bound on pages fetched per paged query.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_url(),
            api_key: None,
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            timeout_secs: default_request_timeout(),
            pacing_ms: default_pacing_ms(),
            max_pages: default_max_pages(),
        }
    }
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

/// What to pull from the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_season")]
    pub season: u16,
    /// League ids driving league/team/fixture/standing/player/injury/odds queries.
    #[serde(default)]
    pub leagues: Vec<u32>,
    /// Country names used for venue queries.
    #[serde(default)]
    pub countries: Vec<String>,
    /// Team ids used for coach and transfer queries.
    #[serde(default)]
    pub teams: Vec<u32>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            season: default_season(),
            leagues: Vec::new(),
            countries: Vec::new(),
            teams: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Arm job timers as soon as `serve` starts.
    #[serde(default = "bool_true")]
    pub autostart: bool,
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            autostart: true,
            log_retention_days: DEFAULT_LOG_RETENTION_DAYS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token for the admin API. `None` leaves the API open.
    pub token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// High-priority job failures are POSTed here as JSON when set.
    pub webhook_url: Option<String>,
}

/// Static overrides applied to a job before it is registered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOverride {
    pub schedule: Option<String>,
    pub enabled: Option<bool>,
    pub max_retries: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_provider_url() -> String {
    DEFAULT_PROVIDER_URL.to_string()
}
fn default_requests_per_minute() -> u32 {
    DEFAULT_REQUESTS_PER_MINUTE
}
fn default_request_timeout() -> u64 {
    30
}
fn default_pacing_ms() -> u64 {
    250
}
fn default_max_pages() -> u32 {
    20
}
fn default_season() -> u16 {
    2024
}
fn default_log_retention_days() -> u32 {
    DEFAULT_LOG_RETENTION_DAYS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.matchday/matchday.db", home)
}

impl MatchdayConfig {
    /// Load config from a TOML file with MATCHDAY_* env var overrides.
    ///
    /// Nested keys use a double underscore: `MATCHDAY_PROVIDER__API_KEY`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        tracing::debug!(path = %path, "loading config");

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("MATCHDAY_").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> crate::error::Result<Self> {
        let config: MatchdayConfig = figment
            .extract()
            .map_err(|e| crate::error::MatchdayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::error::Result<()> {
        if self.provider.requests_per_minute == 0 {
            return Err(crate::error::MatchdayError::Config(
                "provider.requests_per_minute must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.matchday/matchday.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let config = MatchdayConfig::from_figment(
            Figment::new().merge(Toml::file("/nonexistent/matchday.toml")),
        )
        .unwrap();
        assert_eq!(config.provider.base_url, DEFAULT_PROVIDER_URL);
        assert_eq!(config.provider.requests_per_minute, 10);
        assert!(config.provider.api_key.is_none());
        assert!(config.scheduler.autostart);
        assert!(config.jobs.is_empty());
    }

    #[test]
    fn toml_sections_and_job_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[provider]
api_key = "secret"
requests_per_minute = 30

[sync]
season = 2023
leagues = [39, 140]
teams = [33]

[jobs.fixtures]
schedule = "*/5 * * * *"
max_retries = 1
"#
        )
        .unwrap();

        let config = MatchdayConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.provider.api_key.as_deref(), Some("secret"));
        assert_eq!(config.provider.requests_per_minute, 30);
        assert_eq!(config.sync.season, 2023);
        assert_eq!(config.sync.leagues, vec![39, 140]);

        let fixtures = &config.jobs["fixtures"];
        assert_eq!(fixtures.schedule.as_deref(), Some("*/5 * * * *"));
        assert_eq!(fixtures.max_retries, Some(1));
        assert_eq!(fixtures.enabled, None);
    }

    #[test]
    fn zero_rate_cap_is_rejected() {
        let err = MatchdayConfig::from_figment(
            Figment::new().merge(Toml::string("[provider]\nrequests_per_minute = 0")),
        )
        .unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
