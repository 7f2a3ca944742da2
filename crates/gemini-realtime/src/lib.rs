//! A client for the Gemini Live bidirectional streaming API.
//!
//! [`LiveClient`] owns the duplex connection: it sends the session setup on
//! every (re)connect, multiplexes realtime media, text turns and tool responses
//! onto the channel, and turns inbound frames into typed [`Event`]s published on
//! an [`EventBus`]. After an abnormal closure it reconnects with bounded
//! exponential backoff; server-side turn state is not resumed.

pub mod client;
pub mod config;
mod dispatch;
pub mod error;
pub mod events;
pub mod protocol;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{ConnectionState, LiveClient};
pub use config::{GEMINI_LIVE_URL, ReconnectPolicy, ResponseModality, SessionConfig};
pub use error::{ClientError, ProtocolError};
pub use events::{Event, EventBus, EventKind, ListenerId, Subscription};
pub use protocol::{ClientMessage, ToolResult};
pub use transport::{Channel, Connector, TungsteniteConnector};
