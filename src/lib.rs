pub mod agent;
pub mod capture;
pub mod error;
pub mod pipeline;
pub mod server;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use error::{Error, Result};

/// Environment prefix for nested overrides, e.g. `SKYVIEW_CAPTURE__QUALITY=90`
pub const ENV_PREFIX: &str = "SKYVIEW";

/// Process configuration, read once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Delay between polls while the frame slot is still empty
    pub empty_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub device_index: usize,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub quality: u8,
    pub pin_core: Option<usize>, // CPU pinning for the producer thread
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            empty_backoff_ms: 50,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 640,
            height: 480,
            fps: 10.0,
            quality: capture::encoder::DEFAULT_QUALITY,
            pin_core: None,
        }
    }
}

impl Config {
    /// Layer defaults, an optional config file and `SKYVIEW_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            ::config::Config::builder().add_source(::config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        let config: Config = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let capture = &self.capture;
        if !(capture.fps.is_finite() && capture.fps > 0.0) {
            return Err(Error::Config(format!("fps must be > 0, got {}", capture.fps)));
        }
        if capture.width == 0 || capture.height == 0 {
            return Err(Error::Config(format!(
                "resolution must be non-zero, got {}x{}",
                capture.width, capture.height
            )));
        }
        if !(1..=100).contains(&capture.quality) {
            return Err(Error::Config(format!(
                "jpeg quality must be within 1..=100, got {}",
                capture.quality
            )));
        }
        if self.server.empty_backoff_ms == 0 {
            return Err(Error::Config("empty_backoff_ms must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.capture.device_index, 0);
        assert_eq!(config.capture.fps, 10.0);
    }

    #[test]
    fn loads_partial_toml_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[capture]\nfps = 25.0\nheight = 720\n\n[server]\nport = 9000").unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.capture.fps, 25.0);
        assert_eq!(config.capture.height, 720);
        assert_eq!(config.capture.width, 640);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn env_overrides_nested_keys() {
        // Only keys no other test in this module asserts on
        std::env::set_var("SKYVIEW_CAPTURE__QUALITY", "42");
        std::env::set_var("SKYVIEW_SERVER__EMPTY_BACKOFF_MS", "75");
        let loaded = Config::load(None);
        std::env::remove_var("SKYVIEW_CAPTURE__QUALITY");
        std::env::remove_var("SKYVIEW_SERVER__EMPTY_BACKOFF_MS");

        let config = loaded.unwrap();
        assert_eq!(config.capture.quality, 42);
        assert_eq!(config.server.empty_backoff_ms, 75);
        assert_eq!(config.capture.fps, 10.0);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let path = Path::new("/nonexistent/skyview.toml");
        assert!(matches!(Config::load(Some(path)), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = Config::default();
        config.capture.fps = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.capture.quality = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.capture.height = 0;
        assert!(config.validate().is_err());
    }
}
