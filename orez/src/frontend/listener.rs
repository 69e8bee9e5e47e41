//! Connection listener. Accepts clients and hands each to its own task.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::select;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::backend::Instances;

use super::comms::comms;
use super::{Client, Error};

#[derive(Clone)]
pub struct Listener {
    addr: String,
    shutdown: Arc<Notify>,
}

impl Listener {
    pub fn new(addr: impl ToString) -> Self {
        Self {
            addr: addr.to_string(),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Accept connections until told to shut down.
    pub async fn listen(&self, instances: Arc<Instances>) -> Result<(), Error> {
        let listener = TcpListener::bind(&self.addr).await?;
        info!("listening on {}", self.addr);

        loop {
            select! {
                connection = listener.accept() => {
                    let (stream, addr) = connection?;
                    let instances = instances.clone();

                    comms().tracker().spawn(async move {
                        match Client::spawn(stream, instances).await {
                            Ok(()) => (),
                            Err(err) if err.disconnect() => {
                                debug!("client {} disconnected: {}", addr, err);
                            }
                            // A bad client never takes anything else down.
                            Err(err) => error!("client {} error: {}", addr, err),
                        }
                    });
                }

                _ = self.shutdown.notified() => {
                    break;
                }
            }
        }

        debug!("listener stopped");
        Ok(())
    }

    /// Stop accepting. Existing connections drain through the task tracker.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}
