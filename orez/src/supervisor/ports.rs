//! Port allocation.

use tokio::net::TcpListener;
use tracing::debug;

use super::Error;

const MAX_ATTEMPTS: u16 = 20;

/// Probe `requested` for availability; if taken, walk upward one port at a
/// time. The chosen port is recorded back into the config by the caller.
pub async fn allocate(requested: u16) -> Result<u16, Error> {
    for offset in 0..MAX_ATTEMPTS {
        let port = requested + offset;

        if TcpListener::bind(("127.0.0.1", port)).await.is_ok() {
            if offset > 0 {
                debug!("port {} taken, using {}", requested, port);
            }
            return Ok(port);
        }
    }

    Err(Error::PortsExhausted(requested))
}
