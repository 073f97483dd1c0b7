use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::config::{Config, ConnectionConfig, Environment};
use super::event::{ConnectionStatus, EventKind, SocketEvent};
use super::machine::{Effect, Input, Machine, Target};
use super::traits::{Connection, Transport, TransportSink};
use super::transport::{SimulatedTransport, TungsteniteTransport};
use super::url::{UrlParts, build_websocket_url, resolve_against_page};
use crate::Result;
use crate::emitter::{EventEmitter, Listener};
use crate::error::{Error, Kind};

/// A single logical socket connection that reconnects itself with capped
/// exponential backoff and publishes its lifecycle through an [`EventEmitter`].
///
/// Cloning is cheap; clones share the same connection.
///
/// # Example
///
/// ```rust, no_run
/// use std::sync::Arc;
///
/// use resilient_socket::ws::{
///     Client, Config, ConnectionConfig, Environment, EventKind, Message, SocketEvent,
/// };
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::new(Config::default(), Environment::from_env()?)?;
///
///     client.on(
///         EventKind::Message,
///         Arc::new(|event: &SocketEvent| {
///             if let SocketEvent::Message(payload) = event {
///                 println!("update: {payload}");
///             }
///         }),
///     );
///
///     client.connect(
///         ConnectionConfig::builder()
///             .resource_id("abc123")
///             .endpoint("ticket-status")
///             .build(),
///     )?;
///
///     client.send(&Message::new("ping"));
///     client.disconnect();
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    environment: Environment,
    emitter: EventEmitter<SocketEvent>,
    core: Mutex<Core>,
    /// Used for real connections
    transport: Arc<dyn Transport>,
    /// Used when mock mode is in effect
    simulated: Arc<dyn Transport>,
    /// Queue feeding asynchronous inputs (transport events, timers) to the driver task
    mailbox: mpsc::UnboundedSender<Input>,
    /// Events awaiting delivery, in the order the machine produced them
    outbox: Mutex<Outbox>,
    runtime: Handle,
}

#[derive(Default)]
struct Outbox {
    queue: VecDeque<SocketEvent>,
    /// Set while some caller is delivering the queue; everyone else only enqueues
    draining: bool,
}

/// Clears [`Outbox::draining`] if a listener unwinds out of delivery.
struct DrainGuard<'a> {
    inner: &'a ClientInner,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.inner.lock_outbox().draining = false;
    }
}

/// Everything guarded by the client lock: the machine and the resources it governs.
struct Core {
    machine: Machine,
    connection: Option<Box<dyn Connection>>,
    reconnect_timer: Option<JoinHandle<()>>,
}

impl Drop for Core {
    fn drop(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.lock_core();
        f.debug_struct("Client")
            .field("status", &core.machine.status())
            .field("reconnect_attempts", &core.machine.reconnect_attempts())
            .field("target", &core.machine.target())
            .field("environment", &self.inner.environment)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client that opens real sockets with `tokio-tungstenite`.
    ///
    /// Must be called from within a tokio runtime: the client spawns a driver task
    /// on it that applies transport events and timer expirations.
    pub fn new(config: Config, environment: Environment) -> Result<Self> {
        Self::with_transport(config, environment, TungsteniteTransport)
    }

    /// Create a client over a custom real-mode transport.
    pub fn with_transport<T: Transport>(
        config: Config,
        environment: Environment,
        transport: T,
    ) -> Result<Self> {
        let simulated = SimulatedTransport::new(config.mock_open_delay);
        Self::with_transports(config, environment, transport, simulated)
    }

    /// Create a client with explicit transports for real and mock mode.
    pub fn with_transports<T: Transport, S: Transport>(
        config: Config,
        environment: Environment,
        transport: T,
        simulated: S,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| Error::with_source(Kind::Internal, e))?;
        let (mailbox, mut inbox) = mpsc::unbounded_channel();

        let inner = Arc::new(ClientInner {
            emitter: EventEmitter::new(config.duplicate_window, config.duplicate_capacity),
            core: Mutex::new(Core {
                machine: Machine::new(config.reconnect, config.diagnostics),
                connection: None,
                reconnect_timer: None,
            }),
            environment,
            transport: Arc::new(transport),
            simulated: Arc::new(simulated),
            mailbox,
            outbox: Mutex::new(Outbox::default()),
            runtime: runtime.clone(),
        });

        let weak = Arc::downgrade(&inner);
        runtime.spawn(async move {
            while let Some(input) = inbox.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.dispatch(input);
            }
        });

        Ok(Self { inner })
    }

    /// Connect to the stream described by `config`, replacing any current
    /// connection or pending reconnect.
    ///
    /// # Errors
    ///
    /// Returns a [`Kind::Validation`] error when `resource_id` or `endpoint` is
    /// empty. The client is left untouched in that case.
    pub fn connect(&self, config: ConnectionConfig) -> Result<()> {
        let environment = &self.inner.environment;
        let base = config
            .socket_base_url
            .as_deref()
            .or(environment.socket_base_url.as_deref());
        let url = build_websocket_url(
            &UrlParts::new(&config.resource_id, &config.endpoint, base),
            environment,
        )?;
        let mock = config.use_mock.unwrap_or(environment.use_mock);

        #[cfg(feature = "tracing")]
        tracing::debug!(%url, mock, "Connecting");

        self.inner.dispatch(Input::Connect(Target {
            url,
            mock,
            max_reconnect_attempts: config.max_reconnect_attempts,
        }));
        Ok(())
    }

    /// Close the connection and cancel any pending reconnect. Safe to call at any time.
    pub fn disconnect(&self) {
        self.inner.dispatch(Input::Disconnect);
    }

    /// Serialize `message` and hand it to the open transport.
    ///
    /// Returns `false` when the connection is not open or the message could not be
    /// serialized or handed over. Delivery is best-effort; nothing is queued.
    pub fn send<M: Serialize + ?Sized>(&self, message: &M) -> bool {
        let core = self.inner.lock_core();
        if !core.machine.status().is_open() {
            return false;
        }
        let Some(connection) = core.connection.as_ref() else {
            return false;
        };

        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Failed to serialize outbound message");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                return false;
            }
        };

        connection.send(text).is_ok()
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock_core().machine.status()
    }

    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock_core().machine.reconnect_attempts()
    }

    #[must_use]
    pub fn has_pending_reconnect(&self) -> bool {
        self.inner.lock_core().machine.has_pending_reconnect()
    }

    /// URL built by the most recent successful `connect`.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        self.inner
            .lock_core()
            .machine
            .target()
            .map(|target| target.url.clone())
    }

    /// The emitter this client publishes on.
    ///
    /// [`on`](Self::on), [`once`](Self::once) and [`off`](Self::off) cover the
    /// usual subscriptions. Use this for the rest of the emitter: counting or
    /// dropping a channel's listeners when a view goes away, or forgetting
    /// remembered duplicates after a deliberate resubscribe.
    #[must_use]
    pub fn events(&self) -> &EventEmitter<SocketEvent> {
        &self.inner.emitter
    }

    pub fn on(&self, kind: EventKind, listener: Listener<SocketEvent>) {
        self.inner.emitter.on(kind, listener);
    }

    pub fn once(&self, kind: EventKind, listener: Listener<SocketEvent>) {
        self.inner.emitter.once(kind, listener);
    }

    pub fn off(&self, kind: EventKind, listener: &Listener<SocketEvent>) {
        self.inner.emitter.off(kind, listener);
    }
}

impl ClientInner {
    // Core is only mutated through `dispatch`, which never runs listeners under
    // the lock, so recovering from poison cannot observe a half-applied input.
    fn lock_core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `input` through the machine, apply the resulting effects, then publish
    /// the events they produced once the lock is released.
    ///
    /// Events are queued while the core lock is held, so the outbox order is the
    /// machine's order no matter which thread dispatched.
    fn dispatch(&self, input: Input) {
        {
            let _runtime = self.runtime.enter();
            let mut core = self.lock_core();
            let mut pending: VecDeque<Effect> = core.machine.handle(input).into();

            while let Some(effect) = pending.pop_front() {
                match effect {
                    Effect::Emit(event) => self.lock_outbox().queue.push_back(event),
                    Effect::CancelTimer => {
                        if let Some(timer) = core.reconnect_timer.take() {
                            timer.abort();
                        }
                    }
                    Effect::CloseTransport => {
                        if let Some(connection) = core.connection.take() {
                            connection.close();
                        }
                    }
                    Effect::OpenTransport {
                        generation,
                        url,
                        mock,
                    } => {
                        let sink = TransportSink::new(generation, self.mailbox.clone());
                        let opened = if mock {
                            self.simulated.open(&url, sink)
                        } else {
                            let url = resolve_against_page(&url, &self.environment);
                            self.transport.open(&url, sink)
                        };

                        match opened {
                            Ok(connection) => core.connection = Some(connection),
                            Err(e) => pending.extend(core.machine.handle(Input::TransportFailed {
                                generation,
                                error: e.to_string(),
                            })),
                        }
                    }
                    Effect::ScheduleReconnect { timer, delay } => {
                        let mailbox = self.mailbox.clone();
                        core.reconnect_timer = Some(tokio::spawn(async move {
                            sleep(delay).await;
                            _ = mailbox.send(Input::ReconnectDue { timer });
                        }));
                    }
                }
            }
        }

        self.deliver();
    }

    /// Hand queued events to listeners, one at a time, outside every lock.
    ///
    /// Only one caller delivers at a time. A dispatch from another thread, or from
    /// a listener re-entering the client, just enqueues and returns; the caller
    /// already delivering picks its events up in order.
    fn deliver(&self) {
        {
            let mut outbox = self.lock_outbox();
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }
        let guard = DrainGuard { inner: self };

        loop {
            let mut outbox = self.lock_outbox();
            let Some(event) = outbox.queue.pop_front() else {
                // Checked and cleared under one lock so no enqueued event is stranded.
                outbox.draining = false;
                drop(outbox);
                mem::forget(guard);
                return;
            };
            drop(outbox);

            self.emitter.emit(&event);
        }
    }
}
