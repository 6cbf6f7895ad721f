use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::coordinator::RefreshPolicy;
use crate::error::ConfigError;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_CONFIG_PATH: &str = "team-schedule.toml";
pub const ENV_PREFIX: &str = "TEAM_SCHEDULE_";

/// Top-level config (team-schedule.toml + TEAM_SCHEDULE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Roster shown as grid columns, in order.
    pub employees: Vec<String>,
    pub refresh: RefreshPolicy,
    /// Default window size in weeks.
    pub weeks: u8,
    pub server: ServerConfig,
    pub store: StoreConfig,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            employees: default_employees(),
            refresh: RefreshPolicy::default(),
            weeks: 1,
            server: ServerConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Browser views kept alive at once; the least recently used is dropped.
    pub max_views: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            max_views: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
    Firestore,
}

/// Which slot store to use and how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Document file for the `file` backend.
    pub path: Option<String>,
    pub project_id: Option<String>,
    pub database: String,
    pub collection: String,
    pub api_key: Option<String>,
    /// OAuth bearer token; sent as `Authorization: Bearer`.
    pub auth_token: Option<String>,
    /// Override for the REST endpoint (emulators).
    pub base_url: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: None,
            project_id: None,
            database: "(default)".to_string(),
            collection: "slots".to_string(),
            api_key: None,
            auth_token: None,
            base_url: None,
        }
    }
}

fn default_employees() -> Vec<String> {
    ["JOSH", "JOE", "ALEX", "FRANCES"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl ScheduleConfig {
    /// Load config from a TOML file with TEAM_SCHEDULE_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g. `TEAM_SCHEDULE_STORE__BACKEND=file`.
    /// A missing file is not an error; an unreadable or mistyped one is.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let path = config_path.unwrap_or(DEFAULT_CONFIG_PATH);

        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))
    }
}
