//! Connection state machine.
//!
//! [`Machine::handle`] consumes one [`Input`] and returns the [`Effect`]s the
//! client must carry out, in order. The machine itself never touches sockets,
//! timers or listeners, so every transition can be driven directly in tests.
//!
//! Effects that release a resource (`CancelTimer`, `CloseTransport`) are always
//! returned ahead of the effects that acquire its replacement.

use std::time::Duration;

use serde_json::Value;

use super::config::ReconnectConfig;
use super::event::{ConnectionStatus, Diagnostic, SocketEvent};
use super::traits::{Generation, TransportEvent};

pub(crate) type TimerId = u64;

/// Where to connect, fixed for the lifetime of one `connect` call and every
/// reconnect it triggers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    pub(crate) url: String,
    pub(crate) mock: bool,
    pub(crate) max_reconnect_attempts: u32,
}

#[derive(Debug)]
pub(crate) enum Input {
    /// Explicit `connect` from the caller
    Connect(Target),
    Disconnect,
    Transport {
        generation: Generation,
        event: TransportEvent,
    },
    /// `Transport::open` refused to start
    TransportFailed {
        generation: Generation,
        error: String,
    },
    ReconnectDue {
        timer: TimerId,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Effect {
    CancelTimer,
    CloseTransport,
    OpenTransport {
        generation: Generation,
        url: String,
        mock: bool,
    },
    ScheduleReconnect {
        timer: TimerId,
        delay: Duration,
    },
    Emit(SocketEvent),
}

#[derive(Debug)]
pub(crate) struct Machine {
    status: ConnectionStatus,
    reconnect_attempts: u32,
    target: Option<Target>,
    /// Generation of the current transport; bumped whenever one is replaced or torn down
    generation: Generation,
    transport_live: bool,
    pending_timer: Option<TimerId>,
    next_timer: TimerId,
    reconnect: ReconnectConfig,
    diagnostics: bool,
}

impl Machine {
    pub(crate) fn new(reconnect: ReconnectConfig, diagnostics: bool) -> Self {
        Self {
            status: ConnectionStatus::Closed,
            reconnect_attempts: 0,
            target: None,
            generation: 0,
            transport_live: false,
            pending_timer: None,
            next_timer: 0,
            reconnect,
            diagnostics,
        }
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub(crate) fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub(crate) fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    pub(crate) fn has_pending_reconnect(&self) -> bool {
        self.pending_timer.is_some()
    }

    pub(crate) fn handle(&mut self, input: Input) -> Vec<Effect> {
        let mut effects = Vec::new();

        match input {
            Input::Connect(target) => {
                self.reconnect_attempts = 0;
                self.start(target, &mut effects);
            }
            Input::Disconnect => {
                self.cancel_timer(&mut effects);
                self.tear_down(&mut effects);
                self.set_status(ConnectionStatus::Closed, &mut effects);
                effects.push(Effect::Emit(SocketEvent::Close(None)));
            }
            Input::Transport { generation, event } => {
                if self.is_current(generation) {
                    self.on_transport(event, &mut effects);
                }
            }
            Input::TransportFailed { generation, error } => {
                if self.is_current(generation) {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%error, "Failed to open transport");
                    #[cfg(not(feature = "tracing"))]
                    let _ = error;
                    self.transport_live = false;
                    self.set_status(ConnectionStatus::Error, &mut effects);
                    self.attempt_reconnect(&mut effects);
                }
            }
            Input::ReconnectDue { timer } => {
                if self.pending_timer == Some(timer) {
                    self.pending_timer = None;
                    if let Some(target) = self.target.clone() {
                        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
                        #[cfg(feature = "tracing")]
                        tracing::debug!(attempt = self.reconnect_attempts, url = %target.url, "Reconnecting");
                        self.start(target, &mut effects);
                    }
                }
            }
        }

        effects
    }

    fn is_current(&self, generation: Generation) -> bool {
        self.transport_live && generation == self.generation
    }

    fn on_transport(&mut self, event: TransportEvent, effects: &mut Vec<Effect>) {
        match event {
            TransportEvent::Opened => {
                self.reconnect_attempts = 0;
                self.set_status(ConnectionStatus::Open, effects);
                effects.push(Effect::Emit(SocketEvent::Open));
            }
            TransportEvent::Message(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(payload) => effects.push(Effect::Emit(SocketEvent::Message(payload))),
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%raw, error = %e, "Dropping malformed WebSocket message");
                    if self.diagnostics {
                        effects.push(Effect::Emit(SocketEvent::Diagnostic(
                            Diagnostic::MalformedMessage {
                                raw,
                                error: e.to_string(),
                            },
                        )));
                    }
                }
            },
            TransportEvent::Closed(details) => {
                self.transport_live = false;
                self.set_status(ConnectionStatus::Closed, effects);
                let clean = details.clean;
                #[cfg(feature = "tracing")]
                if !clean {
                    tracing::warn!(%details, "WebSocket closed uncleanly");
                }
                effects.push(Effect::Emit(SocketEvent::Close(Some(details))));
                if !clean {
                    self.attempt_reconnect(effects);
                }
            }
            TransportEvent::Error(details) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%details, "WebSocket transport error");
                self.set_status(ConnectionStatus::Error, effects);
                effects.push(Effect::Emit(SocketEvent::Error(Some(details))));
                self.attempt_reconnect(effects);
            }
        }
    }

    /// Stand up a fresh transport for `target`, releasing whatever is held first.
    fn start(&mut self, target: Target, effects: &mut Vec<Effect>) {
        self.cancel_timer(effects);
        self.tear_down(effects);
        self.set_status(ConnectionStatus::Connecting, effects);

        self.transport_live = true;
        effects.push(Effect::OpenTransport {
            generation: self.generation,
            url: target.url.clone(),
            mock: target.mock,
        });
        self.target = Some(target);
    }

    fn tear_down(&mut self, effects: &mut Vec<Effect>) {
        if self.transport_live {
            self.transport_live = false;
            effects.push(Effect::CloseTransport);
        }
        self.generation = self.generation.wrapping_add(1);
    }

    fn cancel_timer(&mut self, effects: &mut Vec<Effect>) {
        if self.pending_timer.take().is_some() {
            effects.push(Effect::CancelTimer);
        }
    }

    fn attempt_reconnect(&mut self, effects: &mut Vec<Effect>) {
        let Some(max) = self.target.as_ref().map(|t| t.max_reconnect_attempts) else {
            return;
        };

        if self.reconnect_attempts >= max {
            #[cfg(feature = "tracing")]
            tracing::warn!(attempts = self.reconnect_attempts, "Reconnect attempts exhausted");
            if self.diagnostics {
                effects.push(Effect::Emit(SocketEvent::Diagnostic(
                    Diagnostic::ReconnectExhausted {
                        attempts: self.reconnect_attempts,
                    },
                )));
            }
            return;
        }

        self.cancel_timer(effects);
        let delay = self.reconnect.delay_for(self.reconnect_attempts);
        self.next_timer = self.next_timer.wrapping_add(1);
        self.pending_timer = Some(self.next_timer);

        #[cfg(feature = "tracing")]
        tracing::debug!(?delay, attempt = self.reconnect_attempts + 1, "Scheduling reconnect");
        effects.push(Effect::ScheduleReconnect {
            timer: self.next_timer,
            delay,
        });
    }

    /// The only place `status` changes; notifies only on an actual change.
    pub(crate) fn set_status(&mut self, status: ConnectionStatus, effects: &mut Vec<Effect>) {
        if self.status != status {
            self.status = status;
            effects.push(Effect::Emit(SocketEvent::StatusChange(status)));
        }
    }
}
