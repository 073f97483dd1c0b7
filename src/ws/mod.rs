//! Resilient WebSocket client.
//!
//! # Architecture
//!
//! - [`Client`]: owns one logical connection, builds its URL, and publishes
//!   lifecycle and data events through an [`EventEmitter`](crate::emitter::EventEmitter)
//! - `machine`: the pure connection state machine the client drives; transport
//!   events and timer expirations are fed to it in order by a driver task
//! - [`Transport`]: pluggable connection capability, implemented by
//!   [`TungsteniteTransport`] for real sockets and [`SimulatedTransport`] for mock mode
//!
//! # Example
//!
//! ```rust, no_run
//! use resilient_socket::ws::{Client, Config, ConnectionConfig, Environment};
//!
//! # async fn example() -> resilient_socket::Result<()> {
//! let client = Client::new(Config::default(), Environment::default())?;
//! client.connect(
//!     ConnectionConfig::builder()
//!         .resource_id("abc123")
//!         .endpoint("ticket-status")
//!         .socket_base_url("https://api.example.com")
//!         .build(),
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub(crate) mod machine;
pub mod traits;
pub mod transport;
pub mod url;

pub use client::Client;
pub use config::{Config, ConnectionConfig, Environment, ReconnectConfig};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use event::{
    CloseDetails, ConnectionStatus, Diagnostic, ErrorDetails, EventKind, Message, SocketEvent,
};
pub use traits::*;
pub use transport::{SimulatedTransport, TungsteniteTransport};
