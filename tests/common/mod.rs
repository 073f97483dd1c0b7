#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Each integration test binary uses a different subset of these helpers"
)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use resilient_socket::Result;
use resilient_socket::emitter::Listener;
use resilient_socket::ws::{
    Client, Connection, ConnectionStatus, EventKind, SocketEvent, Transport, TransportSink,
    WsError,
};
use tokio::time::Instant;

/// What happened to one connection opened through [`FakeTransport`].
#[derive(Debug)]
pub struct Opened {
    pub url: String,
    pub at: Instant,
    pub sink: TransportSink,
    pub sent: Arc<Mutex<Vec<String>>>,
    pub closed: Arc<Mutex<bool>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Open and wait for the test to drive the sink
    Manual,
    /// Report an unclean close as soon as the connection starts
    DropImmediately,
    /// Refuse to start
    Refuse,
}

/// Records every open; the test drives each connection through its sink.
#[derive(Debug, Clone)]
pub struct FakeTransport {
    opened: Arc<Mutex<Vec<Opened>>>,
    behavior: Behavior,
}

impl FakeTransport {
    #[must_use]
    pub fn new(behavior: Behavior) -> Self {
        Self {
            opened: Arc::new(Mutex::new(Vec::new())),
            behavior,
        }
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    #[must_use]
    pub fn sink(&self, index: usize) -> TransportSink {
        self.opened.lock().unwrap()[index].sink.clone()
    }

    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .map(|o| o.url.clone())
            .collect()
    }

    #[must_use]
    pub fn open_times(&self) -> Vec<Instant> {
        self.opened.lock().unwrap().iter().map(|o| o.at).collect()
    }

    #[must_use]
    pub fn sent(&self, index: usize) -> Vec<String> {
        self.opened.lock().unwrap()[index].sent.lock().unwrap().clone()
    }

    #[must_use]
    pub fn was_closed(&self, index: usize) -> bool {
        *self.opened.lock().unwrap()[index].closed.lock().unwrap()
    }
}

struct FakeConnection {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<bool>>,
}

impl Connection for FakeConnection {
    fn send(&self, text: String) -> Result<()> {
        if *self.closed.lock().unwrap() {
            return Err(WsError::ConnectionClosed.into());
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }
}

impl Transport for FakeTransport {
    fn open(&self, url: &str, sink: TransportSink) -> Result<Box<dyn Connection>> {
        if self.behavior == Behavior::Refuse {
            return Err(WsError::InvalidUrl(url.to_owned()).into());
        }
        if self.behavior == Behavior::DropImmediately {
            sink.closed(resilient_socket::ws::CloseDetails::abnormal("refused"));
        }

        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(Mutex::new(false));
        self.opened.lock().unwrap().push(Opened {
            url: url.to_owned(),
            at: Instant::now(),
            sink,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        });

        Ok(Box::new(FakeConnection { sent, closed }))
    }
}

/// Collects every event of the kinds it is attached to, in delivery order.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<SocketEvent>>>,
}

impl Recorder {
    #[must_use]
    pub fn listener(&self) -> Listener<SocketEvent> {
        let events = Arc::clone(&self.events);
        Arc::new(move |event: &SocketEvent| events.lock().unwrap().push(event.clone()))
    }

    /// Attach to every event kind on `client`.
    pub fn attach(&self, client: &Client) {
        for kind in [
            EventKind::Open,
            EventKind::Message,
            EventKind::Close,
            EventKind::Error,
            EventKind::StatusChange,
            EventKind::Diagnostic,
        ] {
            client.on(kind, self.listener());
        }
    }

    #[must_use]
    pub fn events(&self) -> Vec<SocketEvent> {
        self.events.lock().unwrap().clone()
    }

    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        use resilient_socket::Event as _;

        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind() == kind)
            .count()
    }

    #[must_use]
    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                SocketEvent::StatusChange(status) => Some(*status),
                _ => None,
            })
            .collect()
    }
}

/// Let the driver task drain its queue without moving the paused clock meaningfully.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
