//! Telemetry/registration agent.
//!
//! Runs as its own process (`skyview-agent`) and shares nothing with the
//! streaming pipeline. It registers once against the fleet backend, retrying
//! until accepted, then posts simulated telemetry on a fixed interval.

pub mod client;
pub mod telemetry;

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

use ::config::{File, FileFormat, Value};
use thiserror::Error;

pub use client::AgentClient;
pub use telemetry::{SystemInfo, TelemetrySample, TelemetrySimulator};

pub const AGENT_VERSION: &str = "1.0.0";
pub const DEFAULT_TELEMETRY_INTERVAL: Duration = Duration::from_secs(5);
pub const REGISTER_RETRY_INTERVAL: Duration = Duration::from_secs(10);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const REQUIRED_KEYS: [&str; 5] = [
    "DRONEX_URL",
    "DRONE_ID",
    "DRONE_TOKEN",
    "MODE",
    "TELEMETRY_INTERVAL",
];

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("config file not found: {0}")]
    ConfigNotFound(String),

    #[error("invalid agent config: {0}")]
    Config(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
}

impl From<::config::ConfigError> for AgentError {
    fn from(err: ::config::ConfigError) -> Self {
        AgentError::Config(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    Simulation,
    Mavlink,
}

impl AgentMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentMode::Simulation => "SIMULATION",
            AgentMode::Mavlink => "MAVLINK",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Backend base URL without trailing slash
    pub url: String,
    pub drone_id: String,
    pub token: String,
    pub mode: AgentMode,
    pub telemetry_interval: Duration,
}

impl AgentConfig {
    /// Load a `.json`, `.yaml`/`.yml` or `.toml` file. Files without an
    /// extension are read as JSON.
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        if !path.exists() {
            return Err(AgentError::ConfigNotFound(path.display().to_string()));
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let format = match ext.as_str() {
            "json" | "" => FileFormat::Json,
            "yaml" | "yml" => FileFormat::Yaml,
            "toml" => FileFormat::Toml,
            _ => {
                return Err(AgentError::Config(
                    "config must be .json, .yaml or .toml".into(),
                ))
            }
        };

        let values: HashMap<String, Value> = ::config::Config::builder()
            .add_source(File::from(path).format(format))
            .build()?
            .try_deserialize()?;

        Self::from_values(values)
    }

    /// Validate raw key/value pairs. Key lookup is case-insensitive.
    pub fn from_values(values: HashMap<String, Value>) -> Result<Self, AgentError> {
        let values: HashMap<String, Value> = values
            .into_iter()
            .map(|(k, v)| (k.to_ascii_uppercase(), v))
            .collect();

        let missing: BTreeSet<&str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| !values.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            let missing: Vec<&str> = missing.into_iter().collect();
            return Err(AgentError::Config(format!(
                "missing config keys: {}",
                missing.join(", ")
            )));
        }

        let string = |key: &str| -> Result<String, AgentError> {
            values[key]
                .clone()
                .into_string()
                .map_err(|e| AgentError::Config(format!("{key}: {e}")))
        };

        let url = string("DRONEX_URL")?.trim_end_matches('/').to_string();
        if !url.starts_with("https://") {
            return Err(AgentError::Config("DRONEX_URL must start with https://".into()));
        }

        let mode = match string("MODE")?.to_ascii_uppercase().as_str() {
            "SIMULATION" => AgentMode::Simulation,
            "MAVLINK" => AgentMode::Mavlink,
            _ => return Err(AgentError::Config("MODE must be SIMULATION or MAVLINK".into())),
        };

        let interval = values["TELEMETRY_INTERVAL"]
            .clone()
            .into_int()
            .map_err(|e| AgentError::Config(format!("TELEMETRY_INTERVAL: {e}")))?;
        if interval <= 0 {
            return Err(AgentError::Config("TELEMETRY_INTERVAL must be > 0".into()));
        }

        Ok(Self {
            url,
            drone_id: string("DRONE_ID")?,
            token: string("DRONE_TOKEN")?,
            mode,
            telemetry_interval: Duration::from_secs(interval as u64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_json_config() {
        let file = write_config(
            ".json",
            r#"{
                "DRONEX_URL": "https://fleet.example.com///",
                "DRONE_ID": "drone-7",
                "DRONE_TOKEN": "secret",
                "MODE": "simulation",
                "TELEMETRY_INTERVAL": 3
            }"#,
        );

        let config = AgentConfig::load(file.path()).unwrap();
        assert_eq!(config.url, "https://fleet.example.com");
        assert_eq!(config.drone_id, "drone-7");
        assert_eq!(config.token, "secret");
        assert_eq!(config.mode, AgentMode::Simulation);
        assert_eq!(config.telemetry_interval, Duration::from_secs(3));
    }

    #[test]
    fn loads_yaml_config() {
        let file = write_config(
            ".yaml",
            "DRONEX_URL: https://fleet.example.com\nDRONE_ID: d1\nDRONE_TOKEN: t\nMODE: MAVLINK\nTELEMETRY_INTERVAL: 10\n",
        );
        let config = AgentConfig::load(file.path()).unwrap();
        assert_eq!(config.mode, AgentMode::Mavlink);
        assert_eq!(config.telemetry_interval, Duration::from_secs(10));
    }

    #[test]
    fn reports_missing_keys_sorted() {
        let file = write_config(".json", r#"{"DRONE_ID": "d1", "MODE": "SIMULATION"}"#);
        let err = AgentConfig::load(file.path()).unwrap_err().to_string();
        assert!(
            err.contains("DRONEX_URL, DRONE_TOKEN, TELEMETRY_INTERVAL"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn rejects_plain_http_and_bad_values() {
        let base = |url: &str, mode: &str, interval: i64| {
            HashMap::from([
                ("DRONEX_URL".to_string(), Value::from(url)),
                ("DRONE_ID".to_string(), Value::from("d1")),
                ("DRONE_TOKEN".to_string(), Value::from("t")),
                ("MODE".to_string(), Value::from(mode)),
                ("TELEMETRY_INTERVAL".to_string(), Value::from(interval)),
            ])
        };

        assert!(AgentConfig::from_values(base("http://insecure", "SIMULATION", 5)).is_err());
        assert!(AgentConfig::from_values(base("https://ok", "ROVER", 5)).is_err());
        assert!(AgentConfig::from_values(base("https://ok", "SIMULATION", 0)).is_err());
        assert!(AgentConfig::from_values(base("https://ok", "SIMULATION", 5)).is_ok());
    }

    #[test]
    fn missing_file_is_reported() {
        let err = AgentConfig::load(Path::new("/nonexistent/agent.json")).unwrap_err();
        assert!(matches!(err, AgentError::ConfigNotFound(_)));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let file = write_config(".ini", "DRONE_ID=d1");
        assert!(matches!(
            AgentConfig::load(file.path()),
            Err(AgentError::Config(_))
        ));
    }
}
