//! The duplex channel underneath a [`crate::LiveClient`].

use async_trait::async_trait;
use futures_util::{Sink, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::{connect_async, tungstenite};

pub use tungstenite::Message;

/// Write half of an open channel.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send>>;
/// Read half of an open channel.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, tungstenite::Error>> + Send>>;

/// An open duplex channel, split into its halves.
pub struct Channel {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens duplex channels to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, endpoint: &str) -> Result<Channel, tungstenite::Error>;
}

/// Opens WebSocket channels with tokio-tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn open(&self, endpoint: &str) -> Result<Channel, tungstenite::Error> {
        let (ws_stream, _) = connect_async(endpoint).await?;
        let (sink, stream) = ws_stream.split();
        Ok(Channel {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
