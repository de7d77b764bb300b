//! Service settings
//!
//! Layered as profile defaults, then an optional TOML file, then
//! `CLIMATE__*` environment variables (e.g. `CLIMATE__SERVER__BIND_ADDR`).
//! `CLIMATE_PROFILE=dev` starts from [`Settings::development`] instead of
//! the production defaults.

use crate::rate_limit::RateLimitConfig;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Config file used when `CLIMATE_CONFIG` is unset
pub const DEFAULT_CONFIG_PATH: &str = "config/climate";

/// Origin of the dashboard dev server
pub const DEV_ORIGIN: &str = "http://localhost:4200";

/// Environment variable naming the settings profile
pub const PROFILE_ENV: &str = "CLIMATE_PROFILE";

/// `database.url` value selecting the in-memory store
pub const MEMORY_DATABASE: &str = "memory";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub cors: CorsSettings,
    pub seed: SeedSettings,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingSettings,
    pub metrics: MetricsSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite URL, or `memory`
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://climate.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsSettings {
    /// Single origin allowed cross-origin access; none disables CORS
    pub allowed_origin: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SeedSettings {
    /// Insert the demo readings when the store is empty
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// trace, debug, info, warn or error
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Install the Prometheus recorder and serve `/metrics`
    pub enabled: bool,
}

impl Settings {
    /// Load from `CLIMATE_CONFIG` (or [`DEFAULT_CONFIG_PATH`]) and the
    /// environment, on top of the `CLIMATE_PROFILE` defaults
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var("CLIMATE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let profile = std::env::var(PROFILE_ENV).ok();
        Self::layered(Self::for_profile(profile.as_deref())?, &path)
    }

    /// Load from a config file (extension optional, file optional) and the environment
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        Self::layered(Self::default(), path)
    }

    /// Defaults for a named profile: `prod` (or none) and `dev`
    pub fn for_profile(profile: Option<&str>) -> Result<Self, ConfigError> {
        match profile.map(str::trim) {
            None | Some("") | Some("prod") => Ok(Self::default()),
            Some("dev") => Ok(Self::development()),
            Some(other) => Err(ConfigError::Message(format!(
                "unknown {} {:?}, expected dev or prod",
                PROFILE_ENV, other
            ))),
        }
    }

    fn layered(base: Settings, path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Config::try_from(&base)?)
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("CLIMATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// In-memory store, seeded, open to the dashboard dev server
    pub fn development() -> Self {
        Self {
            database: DatabaseSettings {
                url: MEMORY_DATABASE.to_string(),
                max_connections: 1,
            },
            cors: CorsSettings {
                allowed_origin: Some(DEV_ORIGIN.to_string()),
            },
            seed: SeedSettings { enabled: true },
            ..Default::default()
        }
    }
}
