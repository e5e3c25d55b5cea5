//! Janus core library: gateway connection, sessions, plugin handles, and configuration,
//! used by the `janus` command-line client.

pub mod config;
pub mod error;
pub mod gateway;
pub mod handle;
pub mod session;

pub use error::GatewayError;
pub use gateway::{Gateway, GatewayOptions};
pub use handle::Handle;
pub use session::Session;
