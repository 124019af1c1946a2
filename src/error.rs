//! # Error Handling
//!
//! Error types for the chat core.
//!
//! The variants deliberately keep three failure families apart, because the
//! UI treats them differently:
//!
//! - **Transport** failures (`TransportUnavailable`, `NotConnected`) map to
//!   a "check your connection" condition and never carry server text.
//! - **Session** failures (`AuthenticationRequired`, `SessionExpired`) feed
//!   the sign-in flow and are excluded from generic error alerting.
//! - **Server** failures carry the backend's own status and error body.

use thiserror::Error;

/// Result type alias for chat core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the chat core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Socket Errors
    // ========================================================================
    /// The chat socket is not open; nothing was transmitted.
    #[error("Not connected to chat. Check your connection and try again.")]
    NotConnected,

    /// The socket could not be established (failed before reporting open).
    #[error("Failed to connect to chat: {0}")]
    ConnectionFailed(String),

    // ========================================================================
    // REST Errors
    // ========================================================================
    /// The HTTP request failed before reaching the server.
    #[error("Network request failed. Check your internet connection.")]
    TransportUnavailable,

    /// No credential is available; the request was never issued.
    #[error("No signed-in session. Sign in to use chat.")]
    AuthenticationRequired,

    /// The server rejected the session (HTTP 401); sign-in is required again.
    #[error("Session expired. Please sign in again.")]
    SessionExpired,

    /// The server answered with a non-success status and an error body.
    #[error("Chat server error ({status}): {message}")]
    Server {
        /// HTTP status code returned by the server
        status: u16,
        /// Error detail from the response body (raw text if unparseable)
        message: String,
    },

    // ========================================================================
    // Serialization Errors
    // ========================================================================
    /// An outbound frame could not be serialized.
    #[error("Failed to serialize frame: {0}")]
    Serialization(String),

    /// A server response could not be decoded.
    #[error("Failed to decode server response: {0}")]
    Deserialization(String),
}

impl Error {
    /// Whether this error should be shown as a generic alert.
    ///
    /// Session errors are handled by the sign-in flow and ambient
    /// conditions are logged only, so callers skip alerting for them.
    pub fn is_alertable(&self) -> bool {
        !matches!(self, Self::SessionExpired | Self::AuthenticationRequired)
    }
}
