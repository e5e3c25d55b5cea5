//! Gateway: WebSocket client for the Janus signaling protocol.
//!
//! One connection multiplexes every request. Replies are matched to their caller by transaction
//! id; pushes are routed by (session_id, handle_id) to the owning handle's event queue.

mod client;
mod pending;
pub mod protocol;
pub mod transport;

pub use client::{Gateway, GatewayOptions};
pub(crate) use client::{lock, GatewayInner};
pub(crate) use pending::ReplyPhase;
