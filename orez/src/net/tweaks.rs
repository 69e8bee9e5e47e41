use std::io::Result;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;

/// Options applied to every accepted connection: keep-alive on, Nagle off.
/// No read or write timeouts; replication connections sit idle for a while.
pub fn tweak(socket: &TcpStream) -> Result<()> {
    socket.set_nodelay(true)?;

    let sock_ref = SockRef::from(socket);
    sock_ref.set_keepalive(true)?;
    sock_ref.set_tcp_keepalive(&TcpKeepalive::new())?;

    Ok(())
}
