/*!
 * Error types for discovery operations.
 */
use std::time::Duration;

use thiserror::Error;

use bridgescan_core::error::Error as CoreError;
use bridgescan_core::types::Id;

/// Error type for discovery operations
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// A participant did not signal completion within the configured bound
    #[error("Participant {participant} timed out on endpoint {endpoint} after {timeout:?}")]
    ParticipantTimeout {
        /// The participant that was running
        participant: Id,
        /// The endpoint it was probing
        endpoint: Id,
        /// The bound that elapsed
        timeout: Duration,
    },

    /// A participant reported a failure from its discovery routine
    #[error("Participant {participant} failed on endpoint {endpoint}: {message}")]
    Participant {
        /// The participant that failed
        participant: Id,
        /// The endpoint it was probing
        endpoint: Id,
        /// The failure reported by the participant
        message: String,
    },

    /// A participant's discovery routine panicked
    #[error("Participant {participant} panicked on endpoint {endpoint}")]
    ParticipantPanicked {
        /// The participant that panicked
        participant: Id,
        /// The endpoint it was probing
        endpoint: Id,
    },

    /// Communication with the endpoint failed
    #[error("Communication error: {0}")]
    Communication(String),

    /// A thing or thing-type UID did not have the expected shape
    #[error("Invalid UID: {0}")]
    InvalidUid(String),

    /// The endpoint is not registered
    #[error("Endpoint {0} is not registered")]
    EndpointNotFound(Id),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

/// Result type for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

impl DiscoveryError {
    /// Create a new communication error
    pub fn communication<S: AsRef<str>>(msg: S) -> Self {
        DiscoveryError::Communication(msg.as_ref().to_string())
    }

    /// Create a new invalid UID error
    pub fn invalid_uid<S: AsRef<str>>(msg: S) -> Self {
        DiscoveryError::InvalidUid(msg.as_ref().to_string())
    }
}
