use thiserror::Error;

use pulse_core::ConfigError;

#[derive(Debug, Error)]
pub enum GovernorConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(#[from] ConfigError),
}
