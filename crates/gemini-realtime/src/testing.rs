//! In-memory connector for exercising the client without a network.

use crate::transport::{Channel, Connector, Message};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt, channel::mpsc};
use serde_json::Value;
use std::{
    collections::VecDeque,
    io,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio_tungstenite::tungstenite::{
    self,
    protocol::{CloseFrame, frame::coding::CloseCode},
};

/// Lets spawned tasks run and any short timers elapse.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// The far end of one fake channel.
pub(crate) struct FakeServer {
    received: mpsc::UnboundedReceiver<Message>,
    frames: mpsc::UnboundedSender<Result<Message, tungstenite::Error>>,
}

impl FakeServer {
    pub(crate) async fn next_message(&mut self) -> Option<Message> {
        self.received.next().await
    }

    /// The next message written by the client, parsed as JSON.
    pub(crate) async fn next_json(&mut self) -> Value {
        match self.next_message().await {
            Some(Message::Binary(bytes)) => serde_json::from_slice(&bytes).unwrap(),
            other => panic!("expected a binary frame, got {other:?}"),
        }
    }

    pub(crate) fn send_json(&self, value: Value) {
        let bytes = serde_json::to_vec(&value).unwrap();
        self.frames
            .unbounded_send(Ok(Message::Binary(bytes.into())))
            .unwrap();
    }

    pub(crate) fn send_text(&self, text: &str) {
        self.frames
            .unbounded_send(Ok(Message::Text(text.to_string().into())))
            .unwrap();
    }

    pub(crate) fn close(&self, code: u16, reason: &'static str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        };
        self.frames
            .unbounded_send(Ok(Message::Close(Some(frame))))
            .unwrap();
    }
}

/// Hands out in-memory channels and counts open attempts.
#[derive(Default)]
pub(crate) struct FakeConnector {
    opens: AtomicUsize,
    failing: AtomicBool,
    servers: Mutex<VecDeque<FakeServer>>,
}

impl FakeConnector {
    pub(crate) fn failing() -> Self {
        let connector = Self::default();
        connector.set_failing(true);
        connector
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// The server side of the oldest channel not yet taken.
    pub(crate) fn take_server(&self) -> FakeServer {
        self.servers
            .lock()
            .unwrap()
            .pop_front()
            .expect("no open channel")
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, _endpoint: &str) -> Result<Channel, tungstenite::Error> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.failing.load(Ordering::SeqCst) {
            return Err(tungstenite::Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        let (client_tx, received) = mpsc::unbounded();
        let (frames, client_rx) = mpsc::unbounded();
        self.servers
            .lock()
            .unwrap()
            .push_back(FakeServer { received, frames });
        Ok(Channel {
            sink: Box::pin(client_tx.sink_map_err(|_| tungstenite::Error::ConnectionClosed)),
            stream: Box::pin(client_rx),
        })
    }
}
