//! Errors returned by gateway, session, and handle operations.

use crate::gateway::protocol::{ErrorMsg, FrameError};
use crate::gateway::transport::TransportError;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The transport handshake did not complete.
    #[error("connect failed: {0}")]
    Connect(#[source] TransportError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// The request could not be serialized; nothing was sent.
    #[error("failed to encode '{verb}' request: {source}")]
    Encode {
        verb: &'static str,
        #[source]
        source: serde_json::Error,
    },
    /// Background report of a request frame that could not be written.
    #[error("failed to write '{verb}' request: {reason}")]
    Write { verb: &'static str, reason: String },
    #[error("bad inbound frame: {0}")]
    Frame(#[from] FrameError),
    /// The gateway answered with an `error` reply.
    #[error("gateway error {code}: {reason}")]
    Remote { code: i32, reason: String },
    /// The reply type is not valid for the request that was sent.
    #[error("unexpected response received: '{verb}' request")]
    Unexpected { verb: &'static str },
    #[error("no reply to '{verb}' request within {timeout:?}")]
    Timeout {
        verb: &'static str,
        timeout: Duration,
    },
    /// The connection (or the owning gateway/session) is gone.
    #[error("gateway connection closed")]
    Closed,
}

impl From<ErrorMsg> for GatewayError {
    fn from(msg: ErrorMsg) -> Self {
        GatewayError::Remote {
            code: msg.error.code,
            reason: msg.error.reason,
        }
    }
}
