//! History store errors.

use thiserror::Error;

/// A history append or read failed.
///
/// History is a best-effort cache: callers log these and carry on with live
/// delivery.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or refused the operation.
    #[error("history backend unavailable: {0}")]
    Unavailable(String),
    /// The score counter for a key cannot advance any further.
    #[error("score overflow on key {0}")]
    ScoreOverflow(String),
}
