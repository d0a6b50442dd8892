//! Error types for queue operations.
//!
//! Only admission can fail with an error; the allocation path signals "no
//! container on this heartbeat" by returning the zero resource instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors raised by the leaf queue.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SchedulerError {
    /// The queue has reached its application-count cap.
    #[error("Queue {queue} already has {running} applications, cannot accept submission")]
    QueueFull {
        /// Dotted path of the rejecting queue.
        queue: String,
        /// Applications currently admitted.
        running: usize,
    },

    /// A single user has reached the per-user application cap.
    #[error("Queue {queue} already has {running} applications from user {user}, cannot accept submission")]
    UserQueueFull {
        /// Dotted path of the rejecting queue.
        queue: String,
        /// The submitting user.
        user: String,
        /// Applications currently admitted for that user.
        running: u32,
    },

    /// A queue was constructed from out-of-range settings.
    #[error("Invalid queue configuration for {queue}: {reason}")]
    InvalidConfig {
        /// Dotted path of the misconfigured queue.
        queue: String,
        /// What was out of range.
        reason: String,
    },
}
