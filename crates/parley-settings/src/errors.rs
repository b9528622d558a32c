//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not JSON, or a value has the wrong type once merged.
    #[error("malformed settings in {}: {source}", path.display())]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
    /// The compiled defaults could not be turned into a JSON layer.
    #[error("default settings are not serializable: {0}")]
    Defaults(#[from] serde_json::Error),
    /// A value parsed but leaves a subsystem unable to run.
    #[error("{field} {requirement}")]
    InvalidValue {
        /// camelCase path of the offending key.
        field: &'static str,
        /// What the value must satisfy.
        requirement: &'static str,
    },
}

impl SettingsError {
    pub(crate) fn invalid(field: &'static str, requirement: &'static str) -> Self {
        Self::InvalidValue { field, requirement }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
