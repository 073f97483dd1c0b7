//! Follows a ticket's status over a simulated connection.
//!
//! No network is needed: the client runs in mock mode and a scripted transport
//! plays back a few status updates, including a repeat that the client suppresses.
//! Set `SOCKET_USE_MOCK=0` and `SOCKET_BASE_URL` to point it at a real server.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info cargo run --example ticket_status --features tracing
//! ```

use std::sync::Arc;
use std::time::Duration;

use resilient_socket::ws::{
    Client, Config, ConnectionConfig, Environment, EventKind, Message, SimulatedTransport,
    SocketEvent, TungsteniteTransport,
};
use serde_json::json;
use tokio::time::sleep;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::default();
    let script = SimulatedTransport::new(config.mock_open_delay)
        .with_message(
            Duration::from_millis(300),
            json!({ "type": "ticket_status", "status": "reserved" }),
        )
        .with_message(
            Duration::from_millis(300),
            json!({ "type": "ticket_status", "status": "reserved" }),
        )
        .with_message(
            Duration::from_millis(300),
            json!({ "type": "ticket_status", "status": "paid", "seat": "A1" }),
        );

    let mut environment = Environment::from_env()?;
    if std::env::var_os(resilient_socket::ws::config::USE_MOCK_VAR).is_none() {
        environment = environment.with_use_mock(true);
    }
    let client = Client::with_transports(config, environment, TungsteniteTransport, script)?;

    client.on(
        EventKind::StatusChange,
        Arc::new(|event: &SocketEvent| {
            if let SocketEvent::StatusChange(status) = event {
                info!(event = "status_change", %status);
            }
        }),
    );
    client.on(
        EventKind::Message,
        Arc::new(|event: &SocketEvent| {
            if let SocketEvent::Message(payload) = event {
                info!(event = "message", %payload);
            }
        }),
    );
    client.on(
        EventKind::Error,
        Arc::new(|event: &SocketEvent| warn!(event = "error", ?event)),
    );
    client.once(
        EventKind::Open,
        Arc::new(|_: &SocketEvent| info!(event = "open", "Connected")),
    );

    client.connect(
        ConnectionConfig::builder()
            .resource_id("abc123")
            .endpoint("ticket-status")
            .build(),
    )?;
    info!(url = ?client.url(), "Connecting");

    sleep(Duration::from_secs(2)).await;
    let sent = client.send(&Message::new("ack").with("ticket", json!("abc123")));
    info!(sent, "Acknowledged");

    client.disconnect();
    info!(status = %client.status(), "Done");

    Ok(())
}
