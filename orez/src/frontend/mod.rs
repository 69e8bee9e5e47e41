//! Client-facing half of the proxy: listener, per-connection state machine,
//! query rewrite and the replication handler.

pub mod client;
pub mod comms;
pub mod listener;
pub mod replication;
pub mod rewrite;

pub use client::Client;
pub use comms::{comms, Comms};
pub use listener::Listener;

use thiserror::Error;

use crate::backend::changelog;
use crate::backend::engine::EngineError;
use crate::net;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Net(#[from] net::Error),

    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("{0}")]
    Changelog(#[from] changelog::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The peer disconnected; not an error worth reporting.
    pub fn disconnect(&self) -> bool {
        match self {
            Error::Net(err) => err.disconnect(),
            _ => false,
        }
    }
}
