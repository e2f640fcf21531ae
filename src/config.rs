//! Configuration for the taskboard server and the watch client.
//!
//! Settings are read from `taskboard.toml` and support layered configuration
//! (file → environment → CLI). A `.env` file in the working directory is
//! loaded before the environment layer is applied.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! db_path = ".taskboard/taskboard.db"
//! dev_mode = false
//! broker_capacity = 256
//!
//! [client]
//! server_url = "http://127.0.0.1:3141"
//! reconnect_delay_ms = 2000
//!
//! [logging]
//! format = "pretty"
//! ```
//!
//! # Environment overrides
//!
//! | Variable                | Field                 |
//! |-------------------------|-----------------------|
//! | `TASKBOARD_HOST`        | `server.host`         |
//! | `TASKBOARD_PORT`        | `server.port`         |
//! | `TASKBOARD_DB_PATH`     | `server.db_path`      |
//! | `TASKBOARD_SERVER_URL`  | `client.server_url`   |
//! | `TASKBOARD_LOG_FORMAT`  | `logging.format`      |

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::server::ServerConfig;
use crate::server::broker::DEFAULT_CAPACITY;

pub const DEFAULT_CONFIG_FILE: &str = "taskboard.toml";

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("Unknown log format '{}' (expected pretty or json)", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
    /// Events buffered per subscriber before it is considered lagged.
    pub broker_capacity: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            host: defaults.host,
            port: defaults.port,
            db_path: defaults.db_path,
            dev_mode: defaults.dev_mode,
            broker_capacity: DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    pub server_url: String,
    pub reconnect_delay_ms: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3141".to_string(),
            reconnect_delay_ms: 2000,
        }
    }
}

impl ClientSection {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub format: LogFormat,
}

/// Parsed `taskboard.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskboardConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl TaskboardConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse taskboard.toml")
    }

    /// Load from `path`, or from `taskboard.toml` in the working directory.
    /// A missing default file yields the defaults; a missing explicit file
    /// is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// File layer, then `.env`, then the process environment.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::load_or_default(path)?;
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(e).context("Failed to load .env");
            }
        }
        config.apply_env(std::env::vars())?;
        Ok(config)
    }

    /// Apply `TASKBOARD_*` overrides from the given variables. Unrelated
    /// variables are ignored.
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let value = value.as_ref();
            match key.as_ref() {
                "TASKBOARD_HOST" => self.server.host = value.to_string(),
                "TASKBOARD_PORT" => {
                    self.server.port = value
                        .parse()
                        .with_context(|| format!("Invalid TASKBOARD_PORT '{}'", value))?;
                }
                "TASKBOARD_DB_PATH" => self.server.db_path = PathBuf::from(value),
                "TASKBOARD_SERVER_URL" => self.client.server_url = value.to_string(),
                "TASKBOARD_LOG_FORMAT" => self.logging.format = value.parse()?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Server settings for `start_server`, before CLI overrides.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.server.host.clone(),
            port: self.server.port,
            db_path: self.server.db_path.clone(),
            dev_mode: self.server.dev_mode,
            broker_capacity: self.server.broker_capacity,
            init_demo: false,
        }
    }

    /// Human-readable problems with the configuration. Empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.server.host.trim().is_empty() {
            problems.push("server.host must not be empty".to_string());
        }
        if self.server.broker_capacity == 0 {
            problems.push("server.broker_capacity must be at least 1".to_string());
        }
        if !(self.client.server_url.starts_with("http://")
            || self.client.server_url.starts_with("https://"))
        {
            problems.push(format!(
                "client.server_url must be an http(s) URL, got '{}'",
                self.client.server_url
            ));
        }
        problems
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize taskboard.toml")
    }
}
