//! Transport implementations: real sockets via `tokio-tungstenite`, and a
//! simulated connection for mock mode.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message, Utf8Bytes};

use super::error::WsError;
use super::event::{CloseDetails, ErrorDetails};
use super::traits::{Connection, Transport, TransportSink};
use crate::Result;

/// Close code reported when the server sent a close frame without a payload.
const NO_STATUS_RECEIVED: u16 = 1005;

enum Outbound {
    Text(String),
    Close,
}

/// Real WebSocket transport.
#[non_exhaustive]
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteTransport;

impl Transport for TungsteniteTransport {
    fn open(&self, url: &str, sink: TransportSink) -> Result<Box<dyn Connection>> {
        let request = url
            .into_client_request()
            .map_err(|e| WsError::InvalidUrl(format!("{url}: {e}")))?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            run_socket(request, outbound_rx, sink).await;
        });

        Ok(Box::new(TungsteniteConnection { outbound_tx }))
    }
}

struct TungsteniteConnection {
    outbound_tx: mpsc::UnboundedSender<Outbound>,
}

impl Connection for TungsteniteConnection {
    fn send(&self, text: String) -> Result<()> {
        self.outbound_tx
            .send(Outbound::Text(text))
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    fn close(&self) {
        // The socket task also stops once this sender is dropped.
        _ = self.outbound_tx.send(Outbound::Close);
    }
}

async fn run_socket(
    request: Request,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    sink: TransportSink,
) {
    let ws_stream = tokio::select! {
        result = connect_async(request) => match result {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                let error = WsError::Connection(e);
                #[cfg(feature = "tracing")]
                tracing::warn!(%error, "Unable to connect");
                sink.error(ErrorDetails::from(&error));
                return;
            }
        },
        // Nothing is sent before open, so anything here is a close request.
        _ = outbound_rx.recv() => return,
    };

    sink.opened();
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(%text, "Received WebSocket text message");
                        sink.message(text.as_str());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let details = frame.map_or_else(
                            || CloseDetails::clean(NO_STATUS_RECEIVED, ""),
                            |f| CloseDetails::clean(u16::from(f.code), f.reason.as_str()),
                        );
                        // Flush the queued close reply.
                        _ = write.close().await;
                        sink.closed(details);
                        return;
                    }
                    Some(Ok(_)) => {
                        // Binary frames carry no JSON; ping/pong is handled by tungstenite.
                    }
                    None
                    | Some(Err(
                        tungstenite::Error::ConnectionClosed
                        | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake),
                    )) => {
                        sink.closed(CloseDetails::abnormal("connection reset without closing handshake"));
                        return;
                    }
                    Some(Err(e)) => {
                        let error = WsError::Connection(e);
                        #[cfg(feature = "tracing")]
                        tracing::warn!(%error, "WebSocket read failed");
                        sink.error(ErrorDetails::from(&error));
                        return;
                    }
                }
            }

            command = outbound_rx.recv() => {
                match command {
                    Some(Outbound::Text(text)) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            sink.error(ErrorDetails::from(&WsError::Connection(e)));
                            return;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: Utf8Bytes::from_static(""),
                        };
                        _ = write.send(Message::Close(Some(frame))).await;
                        return;
                    }
                }
            }
        }
    }
}

/// Mock-mode transport: no socket is opened. The connection reports itself open
/// after `open_delay`, then replays any scripted messages.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use resilient_socket::ws::transport::SimulatedTransport;
/// use serde_json::json;
///
/// let transport = SimulatedTransport::new(Duration::from_millis(800))
///     .with_message(Duration::from_secs(2), json!({ "type": "ticket_status", "status": "paid" }));
/// ```
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    open_delay: Duration,
    script: Arc<Vec<(Duration, Value)>>,
}

impl SimulatedTransport {
    #[must_use]
    pub fn new(open_delay: Duration) -> Self {
        Self {
            open_delay,
            script: Arc::new(Vec::new()),
        }
    }

    /// Deliver `payload` `after` the previous scripted step (or the open).
    #[must_use]
    pub fn with_message(mut self, after: Duration, payload: Value) -> Self {
        Arc::make_mut(&mut self.script).push((after, payload));
        self
    }
}

impl Transport for SimulatedTransport {
    fn open(&self, url: &str, sink: TransportSink) -> Result<Box<dyn Connection>> {
        #[cfg(feature = "tracing")]
        tracing::debug!(%url, delay = ?self.open_delay, "Opening simulated connection");
        #[cfg(not(feature = "tracing"))]
        let _ = url;

        let open_delay = self.open_delay;
        let script = Arc::clone(&self.script);
        let task = tokio::spawn(async move {
            sleep(open_delay).await;
            sink.opened();
            for (after, payload) in script.iter() {
                sleep(*after).await;
                sink.message(payload.to_string());
            }
        });

        Ok(Box::new(SimulatedConnection {
            task,
            closed: AtomicBool::new(false),
        }))
    }
}

struct SimulatedConnection {
    task: JoinHandle<()>,
    closed: AtomicBool,
}

impl Connection for SimulatedConnection {
    fn send(&self, text: String) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WsError::ConnectionClosed.into());
        }
        #[cfg(feature = "tracing")]
        tracing::trace!(%text, "Simulated connection accepted frame");
        #[cfg(not(feature = "tracing"))]
        let _ = text;
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.task.abort();
    }
}

impl Drop for SimulatedConnection {
    fn drop(&mut self) {
        self.task.abort();
    }
}
