use thiserror::Error;

/// Failures inside the capture/publish pipeline.
///
/// None of the capture variants are fatal once the producer is running:
/// open and read failures latch the producer into synthetic mode, and encode
/// failures drop a single cycle.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open capture device {index}: {reason}")]
    DeviceOpen { index: usize, reason: String },

    #[error("failed to read frame from capture device: {0}")]
    DeviceRead(String),

    #[error("failed to encode frame: {0}")]
    Encode(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
