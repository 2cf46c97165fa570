//! Queue error types

use thiserror::Error;

/// Result type for queue operations
pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors produced by producers and consumers
#[derive(Error, Debug)]
pub enum QueueError {
    /// A message could not be published
    #[error("publish failed: {message}")]
    Publish {
        /// What went wrong
        message: String,
    },

    /// A message could not be consumed
    #[error("consume failed: {message}")]
    Consume {
        /// What went wrong
        message: String,
    },

    /// The topic does not exist
    #[error("unknown topic: {topic}")]
    UnknownTopic {
        /// The missing topic
        topic: String,
    },

    /// The queue has been shut down
    #[error("queue closed")]
    Closed,
}

impl QueueError {
    /// Create a publish error
    pub fn publish(message: impl Into<String>) -> Self {
        Self::Publish {
            message: message.into(),
        }
    }

    /// Create a consume error
    pub fn consume(message: impl Into<String>) -> Self {
        Self::Consume {
            message: message.into(),
        }
    }

    /// Create an unknown-topic error
    pub fn unknown_topic(topic: impl Into<String>) -> Self {
        Self::UnknownTopic {
            topic: topic.into(),
        }
    }
}
