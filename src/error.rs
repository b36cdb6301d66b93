//! Error types and result handling for pipeline-producer.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use pipeline_producer::{Error, Result};
//!
//! fn send_batch() -> Result<()> {
//!     // Simulating a broker rejection
//!     Err(Error::Publish { message: "broker unavailable".to_string() })
//! }
//!
//! match send_batch() {
//!     Ok(()) => println!("Published"),
//!     Err(Error::Publish { message }) => eprintln!("Publish failed: {}", message),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use thiserror::Error;

/// The main error type for pipeline-producer operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, typically from an invalid file or environment variable.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The serialization strategy could not be started (e.g. worker threads
    /// could not be spawned). Surfaced by `open()`.
    #[error("Initialization error: {message}")]
    Initialization {
        /// Description of what failed to start
        message: String,
    },

    /// A single message could not be encoded.
    ///
    /// Sibling messages are unaffected; the failure is reported by the next
    /// `wake()` or `flush()` when the pooled strategy is used.
    #[error("Serialization error for message {sequence}: {message}")]
    Serialization {
        /// Sequence number assigned to the message at `publish()`
        sequence: u64,
        /// Description of the encoding failure
        message: String,
    },

    /// The broker rejected or failed a batch. Nothing in the batch is
    /// considered published and position data is left untouched.
    #[error("Publish error: {message}")]
    Publish {
        /// Description of the broker failure
        message: String,
    },

    /// Operation attempted on a producer that has been closed.
    #[error("Producer is closed")]
    Closed,

    /// The message cannot be accepted (e.g. empty topic).
    #[error("Invalid message: {message}")]
    InvalidMessage {
        /// Description of what was invalid
        message: String,
    },

    /// Replayed messages do not line up with the broker's offsets.
    #[error("Recovery error: {message}")]
    Recovery {
        /// Description of the mismatch
        message: String,
    },

    /// Kafka client or producer error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// JSON error when encoding payloads or reading checkpoints.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error, typically from checkpoint file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Reports any failure coming out of a broker send as [`Error::Publish`].
    pub(crate) fn into_publish(self) -> Self {
        match self {
            Error::Publish { .. } => self,
            other => Error::Publish {
                message: other.to_string(),
            },
        }
    }
}

/// A convenient Result type alias for pipeline-producer operations.
///
/// This is equivalent to `std::result::Result<T, pipeline_producer::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
