//! Error types for the environment abstraction.

use thiserror::Error;

/// Errors that can occur while talking to the bus.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Publish failed (buffer full, broker rejected the message, etc.)
    #[error("Bus error: {0}")]
    BusError(String),

    /// The topic or subscription has been closed
    #[error("Bus closed: {0}")]
    BusClosed(String),

    /// The operation was cancelled before completing
    #[error("Cancelled")]
    Cancelled,
}

impl EnvError {
    /// Creates a bus error.
    pub fn bus(msg: impl Into<String>) -> Self {
        Self::BusError(msg.into())
    }

    /// Creates a closed-topic error.
    pub fn closed(topic: impl std::fmt::Display) -> Self {
        Self::BusClosed(topic.to_string())
    }

    /// Returns true if retrying the operation could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BusError(_))
    }
}
