//! Error taxonomy for the signaling and session layers.
//!
//! Only conditions the caller can act on get a variant. A session code
//! that does not exist is NOT an error: `SessionManager::join_session`
//! reports it as `Ok(false)`. An individual ICE candidate failing to
//! apply is logged and skipped, never surfaced here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalError {
    /// User input was not exactly 6 ASCII digits. Raised before any
    /// store access happens.
    #[error("session code must be exactly 6 digits")]
    InvalidCodeFormat,

    /// Every generated code collided with an existing session.
    #[error("could not allocate an unused session code after {0} attempts")]
    SessionCreationExhausted(u32),

    /// The signaling store failed a read or write. Negotiation must be
    /// abandoned and retried from a fresh session.
    #[error("signaling store failure: {0}")]
    SignalingFailure(String),

    /// A bounded negotiation wait (offer, answer, channel open) expired.
    #[error("negotiation timed out waiting for {0}")]
    NegotiationTimeout(&'static str),
}

impl SignalError {
    /// Wrap an arbitrary store/transport error as a `SignalingFailure`.
    pub fn store<E: std::fmt::Display>(err: E) -> Self {
        Self::SignalingFailure(err.to_string())
    }
}
