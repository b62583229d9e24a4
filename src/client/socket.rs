//! Socket factory (component B): creates a stream socket for a resolved
//! address, applies the fixed set of socket options, and leaves it in
//! blocking mode for the worker threads to `connect`/`read`/`write` on.

use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::warn;

use crate::error::MemcError;

pub const SO_BUF_SIZE: usize = 8192;
pub const SO_LINGER_SECS: u64 = 7;

/// Creates a stream socket in the address family of `addr`, or an unbound
/// `PF_UNSPEC` socket when no address is known yet (the later `connect()`
/// call picks the family).
pub fn create_socket(addr: Option<&SocketAddr>) -> Result<Socket, MemcError> {
    let domain = match addr {
        Some(SocketAddr::V4(_)) => Domain::IPV4,
        Some(SocketAddr::V6(_)) => Domain::IPV6,
        None => Domain::from(libc::PF_UNSPEC),
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| MemcError::Socket(e.to_string()))?;

    apply_socket_options(&socket);

    socket
        .set_nonblocking(false)
        .map_err(|e| MemcError::Socket(e.to_string()))?;

    Ok(socket)
}

/// Binds `socket` to a client-side source address, when one was configured
/// via `-i`/`-p`. A bind failure is surfaced rather than swallowed, since a
/// caller who asked for a specific source address needs to know the
/// reconnect attempt never even got to `connect()`.
pub fn bind_to(socket: &Socket, bind_addr: Option<&SocketAddr>) -> Result<(), MemcError> {
    if let Some(addr) = bind_addr {
        socket.bind(&(*addr).into()).map_err(|e| MemcError::Socket(e.to_string()))?;
    }
    Ok(())
}

/// Applies `SO_RCVBUF`/`SO_SNDBUF`/`SO_LINGER`/`SO_REUSEADDR`/`SO_REUSEPORT`.
/// A per-option failure is logged and skipped rather than aborting socket
/// creation outright; a socket that is merely missing a tuning knob is
/// still usable.
fn apply_socket_options(socket: &Socket) {
    if let Err(e) = socket.set_recv_buffer_size(SO_BUF_SIZE) {
        warn!(error = %e, "SO_RCVBUF failed");
    }
    if let Err(e) = socket.set_send_buffer_size(SO_BUF_SIZE) {
        warn!(error = %e, "SO_SNDBUF failed");
    }
    if let Err(e) = socket.set_linger(Some(Duration::from_secs(SO_LINGER_SECS))) {
        warn!(error = %e, "SO_LINGER failed");
    }
    if let Err(e) = socket.set_reuse_address(true) {
        warn!(error = %e, "SO_REUSEADDR failed");
    }
    #[cfg(unix)]
    if let Err(e) = socket.set_reuse_port(true) {
        warn!(error = %e, "SO_REUSEPORT failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_unbound_socket_without_address() {
        let socket = create_socket(None);
        assert!(socket.is_ok());
    }

    #[test]
    fn creates_socket_for_v4_address() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let socket = create_socket(Some(&addr));
        assert!(socket.is_ok());
    }

    #[test]
    fn bind_to_is_a_no_op_without_a_configured_address() {
        let socket = create_socket(None).unwrap();
        assert!(bind_to(&socket, None).is_ok());
    }

    #[test]
    fn bind_to_binds_a_configured_loopback_address() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let socket = create_socket(Some(&addr)).unwrap();
        assert!(bind_to(&socket, Some(&addr)).is_ok());
    }
}
