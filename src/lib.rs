#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod emitter;
pub mod error;
pub mod ws;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

pub use emitter::{Event, EventEmitter, Listener};
pub use ws::{
    Client, Config, ConnectionConfig, ConnectionStatus, Environment, EventKind, Message,
    SocketEvent,
};
