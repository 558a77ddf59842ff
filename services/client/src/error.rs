//! services/client/src/error.rs
//!
//! Defines the error types for the personalization client.

use crate::config::ConfigError;
use crate::engine::session::PersonalizationStep;
use personalization_core::ports::PortError;

/// Failures of a personalization session operation.
///
/// Every variant is also stored in the session's error slot and emitted as an
/// analytics error event before it is returned.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// Represents an error that propagated up from the remote API port.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    #[error("No active personalization session")]
    NoActiveSession,

    #[error("Session id mismatch: active session is {active}, got {requested}")]
    SessionMismatch { active: String, requested: String },

    #[error("The deck has no remaining cards")]
    DeckExhausted,

    #[error("Personalization is not enabled for this itinerary")]
    Disabled,

    /// The operation does not apply to the step the flow is in.
    #[error("Operation requires the {expected:?} step, flow is at {actual:?}")]
    InvalidStep {
        expected: PersonalizationStep,
        actual: PersonalizationStep,
    },

    /// The server answered but reported `success: false`.
    #[error("Request rejected by server: {0}")]
    Rejected(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// The primary error type for the `client` binary.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents a standard Input/Output error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}
