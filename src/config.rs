use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

use crate::ws::CollabSettings;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// HS256 secret of session tokens. Without it every connection is anonymous.
    pub auth_jwt_secret: Option<String>,

    /// Database URL
    pub db_url: Option<String>,

    #[serde(default = "default_flush_interval_ms")]
    pub collab_flush_interval_ms: u64,

    #[serde(default = "default_revision_interval_ms")]
    pub collab_revision_interval_ms: u64,

    #[serde(default = "default_reaper_interval_ms")]
    pub collab_reaper_interval_ms: u64,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            dotenvy::dotenv().ok();
        }

        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_development(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "dev" || env == "development"
    }

    /// Allowed CORS origins; empty means any
    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn collab_settings(&self) -> CollabSettings {
        CollabSettings {
            flush_interval: Duration::from_millis(self.collab_flush_interval_ms.max(1)),
            revision_interval: Duration::from_millis(self.collab_revision_interval_ms.max(1)),
            reaper_interval: Duration::from_millis(self.collab_reaper_interval_ms.max(1)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            cors_origins: None,
            log_level: default_log_level(),
            service_name: default_service_name(),
            auth_jwt_secret: None,
            db_url: None,
            collab_flush_interval_ms: default_flush_interval_ms(),
            collab_revision_interval_ms: default_revision_interval_ms(),
            collab_reaper_interval_ms: default_reaper_interval_ms(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "colabri-note".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_flush_interval_ms() -> u64 {
    1_000
}

fn default_revision_interval_ms() -> u64 {
    300_000
}

fn default_reaper_interval_ms() -> u64 {
    60_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_values_override_defaults() {
        let vars = vec![
            ("PORT".to_string(), "8080".to_string()),
            ("DB_URL".to_string(), "postgres://localhost/notes".to_string()),
            ("COLLAB_FLUSH_INTERVAL_MS".to_string(), "250".to_string()),
            ("CORS_ORIGINS".to_string(), "https://a.example, https://b.example".to_string()),
        ];
        let config: Config = envy::from_iter(vars).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.db_url.as_deref(), Some("postgres://localhost/notes"));
        assert_eq!(config.collab_settings().flush_interval, Duration::from_millis(250));
        assert_eq!(config.collab_settings().revision_interval, Duration::from_secs(300));
        assert_eq!(config.cors_origin_list(), vec!["https://a.example", "https://b.example"]);
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server_address(), "0.0.0.0:3000");
        assert!(config.is_development());
        assert!(config.cors_origin_list().is_empty());
        assert_eq!(config.collab_settings().reaper_interval, Duration::from_secs(60));
    }
}
