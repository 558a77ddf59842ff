//! services/client/src/adapters/ws_transport.rs
//!
//! This module contains the WebSocket transport for the realtime channel.
//! It implements the `RealtimeConnector` port from the `core` crate using
//! `tokio-tungstenite`.

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use personalization_core::ports::{
    FrameSink, PortError, PortResult, RealtimeConnection, RealtimeConnector,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// Opens plain or TLS WebSocket connections.
#[derive(Clone, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

/// The write half of an open WebSocket.
struct WsSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> PortResult<()> {
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|e| PortError::Network(e.to_string()))
    }

    async fn close(&mut self) -> PortResult<()> {
        self.inner
            .close()
            .await
            .map_err(|e| PortError::Network(e.to_string()))
    }
}

//=========================================================================================
// `RealtimeConnector` Trait Implementation
//=========================================================================================

#[async_trait]
impl RealtimeConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> PortResult<RealtimeConnection> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| PortError::Network(e.to_string()))?;
        debug!(status = response.status().as_u16(), "WebSocket handshake complete.");

        let (sink, stream) = stream.split();
        // Only text frames carry envelopes; control and binary frames are skipped.
        let frames = stream.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(_) => None,
                Err(e) => Some(Err(PortError::Network(e.to_string()))),
            }
        });

        Ok(RealtimeConnection {
            sink: Box::new(WsSink { inner: sink }),
            frames: Box::pin(frames),
        })
    }
}
