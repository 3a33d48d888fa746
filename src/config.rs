// src/config.rs

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

pub const APP_NAME: &str = "APP_NAME";
pub const APP_VERSION: &str = "APP_VERSION";
pub const APP_LIFETIME_MS: &str = "APP_LIFETIME_MS";
pub const REPORT_POLL_INTERVAL_MS: &str = "REPORT_POLL_INTERVAL_MS";
pub const CLIENT_INTERVAL_MS: &str = "CLIENT_INTERVAL_MS";
pub const CLIENT_TIMEOUT_MS: &str = "CLIENT_TIMEOUT_MS";
pub const METRIC_SERVER_ADDRESS: &str = "METRIC_SERVER_ADDRESS";
pub const CLIENT_TRANSPORT: &str = "CLIENT_TRANSPORT";
pub const CLIENT_USER_AGENT_NAME: &str = "CLIENT_USER_AGENT_NAME";
pub const CLIENT_MAX_IN_FLIGHT: &str = "CLIENT_MAX_IN_FLIGHT";

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, io::Error),
    Parse(String),
    Missing(&'static str),
    Invalid { key: &'static str, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(path, err) => write!(f, "unable to read {}: {}", path.display(), err),
            ConfigError::Parse(reason) => write!(f, "malformed config file: {}", reason),
            ConfigError::Missing(key) => write!(f, "{} is required", key),
            ConfigError::Invalid { key, reason } => write!(f, "invalid {}: {}", key, reason),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Http,
    Grpc,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(TransportKind::Http),
            "grpc" => Ok(TransportKind::Grpc),
            other => Err(format!("unknown transport '{}', expected http or grpc", other)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub version: String,
    /// Hard deadline for the whole run; 0 runs until interrupted.
    pub lifetime_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReporterConfig {
    pub poll_interval_ms: u64, // Default: 2 seconds
}

impl Default for ReporterConfig {
    fn default() -> Self {
        ReporterConfig {
            poll_interval_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub transport: TransportKind,
    pub address: String,
    pub interval_ms: u64,      // Default: 10 seconds
    pub timeout_ms: u64,       // Default: 5 seconds
    pub user_agent_name: String,
    pub max_in_flight: usize,  // Default: 4 * num_cpus::get()
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            transport: TransportKind::Http,
            address: "http://localhost:8080".to_string(),
            interval_ms: 10_000,
            timeout_ms: 5_000,
            user_agent_name: "runstat-agent".to_string(),
            max_in_flight: 4 * num_cpus::get(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub app: AppConfig,
    pub reporter: ReporterConfig,
    pub client: ClientConfig,
}

impl AgentConfig {
    /// Defaults, then the TOML file at `path` (if present), then `.env`, then
    /// the process environment.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = match fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("no config file at {}, using defaults", path.display());
                AgentConfig::default()
            }
            Err(err) => return Err(ConfigError::Io(path.to_path_buf(), err)),
        };

        match dotenvy::dotenv() {
            Ok(env_path) => debug!("loaded {}", env_path.display()),
            Err(err) if err.not_found() => {}
            Err(err) => return Err(ConfigError::Parse(format!(".env: {}", err))),
        }

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Overrides fields from `lookup`; empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(name) = get(APP_NAME) {
            self.app.name = name;
        }
        if let Some(version) = get(APP_VERSION) {
            self.app.version = version;
        }
        if let Some(value) = get(APP_LIFETIME_MS) {
            self.app.lifetime_ms = parse_number(APP_LIFETIME_MS, &value)?;
        }
        if let Some(value) = get(REPORT_POLL_INTERVAL_MS) {
            self.reporter.poll_interval_ms = parse_number(REPORT_POLL_INTERVAL_MS, &value)?;
        }
        if let Some(value) = get(CLIENT_INTERVAL_MS) {
            self.client.interval_ms = parse_number(CLIENT_INTERVAL_MS, &value)?;
        }
        if let Some(value) = get(CLIENT_TIMEOUT_MS) {
            self.client.timeout_ms = parse_number(CLIENT_TIMEOUT_MS, &value)?;
        }
        if let Some(address) = get(METRIC_SERVER_ADDRESS) {
            self.client.address = address;
        }
        if let Some(value) = get(CLIENT_TRANSPORT) {
            self.client.transport = value.parse().map_err(|reason| ConfigError::Invalid {
                key: CLIENT_TRANSPORT,
                reason,
            })?;
        }
        if let Some(name) = get(CLIENT_USER_AGENT_NAME) {
            self.client.user_agent_name = name;
        }
        if let Some(value) = get(CLIENT_MAX_IN_FLIGHT) {
            self.client.max_in_flight = parse_number(CLIENT_MAX_IN_FLIGHT, &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app.name.trim().is_empty() {
            return Err(ConfigError::Missing(APP_NAME));
        }
        if self.app.version.trim().is_empty() {
            return Err(ConfigError::Missing(APP_VERSION));
        }
        if self.client.address.trim().is_empty() {
            return Err(ConfigError::Missing(METRIC_SERVER_ADDRESS));
        }
        non_zero(REPORT_POLL_INTERVAL_MS, self.reporter.poll_interval_ms)?;
        non_zero(CLIENT_INTERVAL_MS, self.client.interval_ms)?;
        non_zero(CLIENT_TIMEOUT_MS, self.client.timeout_ms)?;
        non_zero(CLIENT_MAX_IN_FLIGHT, self.client.max_in_flight as u64)?;
        if self.client.max_in_flight > Semaphore::MAX_PERMITS {
            return Err(ConfigError::Invalid {
                key: CLIENT_MAX_IN_FLIGHT,
                reason: format!("must not exceed {}", Semaphore::MAX_PERMITS),
            });
        }
        Ok(())
    }

    pub fn lifetime(&self) -> Option<Duration> {
        match self.app.lifetime_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.reporter.poll_interval_ms)
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.client.interval_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.client.timeout_ms)
    }

    /// `User-Agent` header value: `{user_agent_name}/{app version}`.
    pub fn user_agent(&self) -> String {
        format!("{}/{}", self.client.user_agent_name, self.app.version)
    }
}

fn parse_number<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
        key,
        reason: format!("'{}': {}", value, err),
    })
}

fn non_zero(key: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}
