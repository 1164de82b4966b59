//! The `error` module defines the top-level error type of the `topicrelay`
//! application.
//!
//! Each subsystem owns its own error enum; `RelayError` wraps them so that the
//! binary entry point can propagate any of them with `?`.

use thiserror::Error;

use crate::broker::BrokerError;
use crate::persistence::StorageError;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("authentication error: {0}")]
    Auth(String),
}
