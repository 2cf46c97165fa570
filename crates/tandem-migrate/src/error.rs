//! Migration error types

use thiserror::Error;

/// Result type for migration operations
pub type Result<T> = std::result::Result<T, MigrateError>;

/// Errors produced by the migration engine
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Store-layer failure
    #[error(transparent)]
    Store(#[from] tandem_store::Error),

    /// Queue-layer failure
    #[error(transparent)]
    Queue(#[from] tandem_queue::QueueError),

    /// An event payload could not be encoded or decoded
    #[error("codec error: {message}")]
    Codec {
        /// What went wrong
        message: String,
    },

    /// An operation exceeded its deadline
    #[error("timed out: {message}")]
    Timeout {
        /// The operation that overran
        message: String,
    },

    /// Invalid configuration
    #[error("configuration error: {message}")]
    Configuration {
        /// What is invalid
        message: String,
    },
}

impl MigrateError {
    /// Create a codec error
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
