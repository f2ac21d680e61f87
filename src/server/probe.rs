//! TCP readiness probe.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::trace;

/// Whether something at `addr` accepts a TCP connection within `timeout`.
pub async fn accepts_connections(addr: SocketAddr, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            trace!("Probe {} refused: {}", addr, e);
            false
        }
        Err(_) => {
            trace!("Probe {} timed out", addr);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpListener};

    #[tokio::test]
    async fn test_probe_open_and_closed_port() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(accepts_connections(addr, Duration::from_secs(1)).await);

        drop(listener);
        assert!(!accepts_connections(addr, Duration::from_secs(1)).await);
    }
}
