//! TCP listener construction.
//!
//! `tokio::net::TcpListener::bind` does not expose `SO_REUSEADDR`, so the
//! socket is built with `socket2`, configured, and then handed to tokio.

use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;

/// Pending-connection backlog passed to `listen(2)`.
const LISTEN_BACKLOG: i32 = 1024;

/// Binds a non-blocking listener on `addr` with address reuse enabled.
///
/// Address reuse lets the server restart immediately while sockets from the
/// previous run are still in `TIME_WAIT`.
///
/// # Errors
///
/// Returns the I/O error from socket creation, `bind`, or `listen` (for
/// example the port is taken, or binding port 443 without privileges).
pub fn bind_reusable(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    TcpListener::from_std(socket.into())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_port_reports_local_addr() {
        // Arrange
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();

        // Act
        let listener = bind_reusable(addr).unwrap();

        // Assert
        let local = listener.local_addr().unwrap();
        assert!(local.ip().is_loopback());
        assert_ne!(local.port(), 0);
    }

    #[tokio::test]
    async fn test_listener_accepts_tcp_connection() {
        let listener = bind_reusable("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();

        let (accepted, connected) =
            tokio::join!(listener.accept(), tokio::net::TcpStream::connect(addr));

        assert!(accepted.is_ok());
        assert!(connected.is_ok());
    }

    #[tokio::test]
    async fn test_rebinding_after_drop_succeeds() {
        let first = bind_reusable("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = first.local_addr().unwrap();
        drop(first);

        assert!(bind_reusable(addr).is_ok());
    }
}
