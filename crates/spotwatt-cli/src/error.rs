use spotwatt_core::{AreaDirectoryError, ConfigurationError, PriceError, SettingsError};
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Price(#[from] PriceError),

    #[error(transparent)]
    AreaDirectory(#[from] AreaDirectoryError),

    #[error("command error: {0}")]
    Command(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Configuration(_) | Self::Settings(_) | Self::Command(_) => 2,
            Self::Price(error) => match error {
                PriceError::Configuration(_)
                | PriceError::Validation(_)
                | PriceError::InvalidRange { .. } => 2,
                _ => 3,
            },
            Self::AreaDirectory(_) => 3,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}
