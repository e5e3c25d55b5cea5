//! Transport adapter: whole-frame duplex connection to the gateway.
//!
//! The gateway core only needs to write text frames, read whole frames, and send a control-frame
//! keepalive. The WebSocket implementation negotiates the `janus-protocol` subprotocol.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Subprotocol the gateway must accept during the handshake.
pub const SUBPROTOCOL: &str = "janus-protocol";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("gateway did not accept subprotocol '{0}'")]
    Subprotocol(&'static str),
    #[error("keepalive not written within {0:?}")]
    Deadline(Duration),
    #[error("connection closed")]
    Closed,
}

fn ws_err(e: tokio_tungstenite::tungstenite::Error) -> TransportError {
    TransportError::WebSocket(Box::new(e))
}

/// Write half. Callers serialize access; one frame is written at a time.
#[async_trait]
pub trait FrameWriter: Send {
    /// Write one text frame.
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;
    /// Send a transport-level keepalive (control frame).
    async fn keepalive(&mut self) -> Result<(), TransportError>;
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half, owned by the dispatch task.
#[async_trait]
pub trait FrameReader: Send {
    /// Next whole inbound frame; `Ok(None)` once the peer closed the connection.
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsWriter {
    sink: SplitSink<WsStream, WsMessage>,
}

pub struct WsReader {
    stream: SplitStream<WsStream>,
}

/// Open a WebSocket to `url`, requiring the gateway to accept [`SUBPROTOCOL`].
pub async fn connect(url: &str) -> Result<(WsReader, WsWriter), TransportError> {
    let mut request = url.into_client_request().map_err(ws_err)?;
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));
    let (ws, response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(ws_err)?;
    let accepted = response
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok());
    if accepted != Some(SUBPROTOCOL) {
        return Err(TransportError::Subprotocol(SUBPROTOCOL));
    }
    log::debug!("websocket connected to {} ({})", url, SUBPROTOCOL);
    let (sink, stream) = ws.split();
    Ok((WsReader { stream }, WsWriter { sink }))
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.sink.send(WsMessage::Text(frame)).await.map_err(ws_err)
    }

    async fn keepalive(&mut self) -> Result<(), TransportError> {
        self.sink.send(WsMessage::Ping(Vec::new())).await.map_err(ws_err)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink.close().await.map_err(ws_err)
    }
}

#[async_trait]
impl FrameReader for WsReader {
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        while let Some(msg) = self.stream.next().await {
            match msg.map_err(ws_err)? {
                WsMessage::Text(text) => return Ok(Some(text.into_bytes())),
                WsMessage::Binary(bytes) => return Ok(Some(bytes)),
                WsMessage::Close(_) => return Ok(None),
                _ => continue,
            }
        }
        Ok(None)
    }
}
