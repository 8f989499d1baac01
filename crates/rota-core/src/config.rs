use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default engine tick cadence.
pub const DEFAULT_TICK_MS: u64 = 1_000;
/// A registration older than this when first seen by the engine is
/// reported as missed instead of executed.
pub const DEFAULT_MISFIRE_GRACE_SECS: u64 = 600;

/// Top-level config (rota.toml + ROTA_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotaConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Default for RotaConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            calendar: CalendarConfig::default(),
            engine: EngineConfig::default(),
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

/// Business-calendar settings.
///
/// `hours` holds 7 `["HH:MM", "HH:MM"]` pairs, index 0 = Monday … 6 = Sunday.
/// A day whose start equals its end is fully closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// RFC3339 reference instant that business seconds are counted from.
    #[serde(default = "default_epoch")]
    pub epoch: String,
    /// Fixed UTC offset, in minutes, that all calendar math runs in.
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_hours")]
    pub hours: Vec<[String; 2]>,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            epoch: default_epoch(),
            utc_offset_minutes: default_utc_offset_minutes(),
            hours: default_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_misfire_grace_secs")]
    pub misfire_grace_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            misfire_grace_secs: default_misfire_grace_secs(),
        }
    }
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.rota/rota.db", home)
}

fn default_epoch() -> String {
    "2025-10-01T00:00:00+02:00".to_string()
}

fn default_utc_offset_minutes() -> i32 {
    120
}

/// Mon–Thu 08:00–20:00, Fri 09:00–13:00, Sat closed, Sun 08:00–20:00.
fn default_hours() -> Vec<[String; 2]> {
    vec![
        ["08:00".into(), "20:00".into()],
        ["08:00".into(), "20:00".into()],
        ["08:00".into(), "20:00".into()],
        ["08:00".into(), "20:00".into()],
        ["09:00".into(), "13:00".into()],
        ["00:00".into(), "00:00".into()],
        ["08:00".into(), "20:00".into()],
    ]
}

fn default_tick_ms() -> u64 {
    DEFAULT_TICK_MS
}

fn default_misfire_grace_secs() -> u64 {
    DEFAULT_MISFIRE_GRACE_SECS
}

impl RotaConfig {
    /// Load config from a TOML file with ROTA_* env var overrides.
    ///
    /// Falls back to `~/.rota/rota.toml` when no explicit path is given;
    /// a missing file yields the built-in defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: RotaConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("ROTA_").split("_"))
            .extract()
            .map_err(|e| crate::error::RotaError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.rota/rota.toml", home)
}
