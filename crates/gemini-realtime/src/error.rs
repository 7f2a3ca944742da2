use std::sync::Arc;
use tokio_tungstenite::tungstenite;

/// Errors surfaced to callers of [`crate::LiveClient`].
///
/// The type is `Clone` so that every caller awaiting the same in-flight
/// connection attempt receives the same result.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to open the live connection: {0}")]
    Connection(#[source] Arc<tungstenite::Error>),
    #[error("Failed to send the session setup: {0}")]
    Handshake(#[source] Arc<tungstenite::Error>),
    #[error("Failed to encode outbound message: {0}")]
    Encode(#[source] Arc<serde_json::Error>),
    #[error("Connection attempt was abandoned by an intentional disconnect")]
    Aborted,
    #[error("Connection closed (code {code}): {reason}")]
    TransportClosed { code: u16, reason: String },
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Encode(Arc::new(e))
    }
}

/// Reasons an inbound frame is dropped instead of dispatched.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Received a non-binary frame")]
    NonBinary,
    #[error("Frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Frame matched no known message shape")]
    Unmatched,
}
