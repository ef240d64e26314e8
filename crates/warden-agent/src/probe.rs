use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use async_trait::async_trait;

/// Cheap liveness check run before the (slower, noisier) query handshake.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn reachable(&self, addr: SocketAddr, timeout: Duration) -> bool;
}

/// Source dedicated servers accept TCP on the game port (RCON), so a bare
/// connect tells us whether anything is listening at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProbe;

#[async_trait]
impl Probe for TcpProbe {
    async fn reachable(&self, addr: SocketAddr, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                tracing::debug!(%addr, error = %e, "probe: connect failed");
                false
            }
            Err(_) => {
                tracing::debug!(%addr, timeout_ms = timeout.as_millis() as u64, "probe: timed out");
                false
            }
        }
    }
}

/// First candidate (in order) that accepts a connection on `port`.
///
/// Candidates are tried one at a time; worst case is `timeout * candidates.len()`.
pub async fn first_reachable<P: Probe + ?Sized>(
    probe: &P,
    candidates: &[IpAddr],
    port: u16,
    timeout: Duration,
) -> Option<IpAddr> {
    for ip in candidates {
        if probe.reachable(SocketAddr::new(*ip, port), timeout).await {
            return Some(*ip);
        }
    }
    None
}
