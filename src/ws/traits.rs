//! Core traits for pluggable socket transports.

use tokio::sync::mpsc;

use super::event::{CloseDetails, ErrorDetails};
use super::machine::Input;
use crate::Result;

/// Identifies one transport opened by a client. Events carrying a superseded
/// generation are ignored.
pub type Generation = u64;

/// Something a transport observed on its connection.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    /// One inbound text frame
    Message(String),
    Closed(CloseDetails),
    Error(ErrorDetails),
}

/// Handle a transport uses to report back to the client that opened it.
///
/// Reporting never blocks and never re-enters the client: events are queued and
/// applied in order by the client's driver task.
#[derive(Debug, Clone)]
pub struct TransportSink {
    generation: Generation,
    mailbox: mpsc::UnboundedSender<Input>,
}

impl TransportSink {
    pub(crate) fn new(generation: Generation, mailbox: mpsc::UnboundedSender<Input>) -> Self {
        Self {
            generation,
            mailbox,
        }
    }

    /// Report `event`. Returns `false` once the client is gone.
    pub fn report(&self, event: TransportEvent) -> bool {
        self.mailbox
            .send(Input::Transport {
                generation: self.generation,
                event,
            })
            .is_ok()
    }

    pub fn opened(&self) -> bool {
        self.report(TransportEvent::Opened)
    }

    pub fn message<S: Into<String>>(&self, text: S) -> bool {
        self.report(TransportEvent::Message(text.into()))
    }

    pub fn closed(&self, details: CloseDetails) -> bool {
        self.report(TransportEvent::Closed(details))
    }

    pub fn error(&self, details: ErrorDetails) -> bool {
        self.report(TransportEvent::Error(details))
    }
}

/// Opens connections to a socket URL.
///
/// Two implementations ship with the crate: [`TungsteniteTransport`](super::transport::TungsteniteTransport)
/// for real sockets and [`SimulatedTransport`](super::transport::SimulatedTransport)
/// for mock mode.
pub trait Transport: Send + Sync + 'static {
    /// Begin opening `url`. Must return without waiting for the handshake; progress
    /// is reported through `sink`. An `Err` means the connection could not even be
    /// started (e.g. the URL is unusable).
    fn open(&self, url: &str, sink: TransportSink) -> Result<Box<dyn Connection>>;
}

/// A live connection owned by the client.
pub trait Connection: Send + Sync {
    /// Hand one serialized frame to the connection.
    fn send(&self, text: String) -> Result<()>;

    /// Tear the connection down. No further events are expected to matter after
    /// this, so implementations need not report the close.
    fn close(&self);
}
