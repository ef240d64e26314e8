use std::{net::SocketAddr, time::Duration};

use async_trait::async_trait;

/// Server-level telemetry returned by the query protocol.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TelemetrySnapshot {
    pub name: String,
    pub map: String,
    pub players: u32,
    pub max_players: u32,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PlayerEntry {
    pub name: String,
    pub score: i64,
    /// Seconds connected.
    pub duration: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("query to {addr} failed: {message}")]
    Protocol { addr: SocketAddr, message: String },
    #[error("query to {addr} timed out")]
    Timeout { addr: SocketAddr },
}

/// Client for the game's native status protocol.
///
/// `Ok(None)` means the server answered but had nothing usable to say.
#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn info(
        &self,
        addr: SocketAddr,
        timeout: Duration,
    ) -> Result<Option<TelemetrySnapshot>, QueryError>;

    async fn players(
        &self,
        addr: SocketAddr,
        timeout: Duration,
    ) -> Result<Option<Vec<PlayerEntry>>, QueryError>;
}

/// Source engine A2S queries via the `a2s` crate's tokio client.
///
/// Each call opens its own UDP socket inside the query future, so a timeout
/// or a dropped request closes it.
#[derive(Debug, Default, Clone, Copy)]
pub struct A2sQueryClient;

fn query_err(addr: SocketAddr, e: a2s::errors::Error) -> QueryError {
    match e {
        a2s::errors::Error::ErrTimeout => QueryError::Timeout { addr },
        other => QueryError::Protocol {
            addr,
            message: other.to_string(),
        },
    }
}

async fn bounded<T, Fut>(addr: SocketAddr, timeout: Duration, query: Fut) -> Result<T, QueryError>
where
    Fut: Future<Output = a2s::errors::Result<T>>,
{
    // Covers the challenge round-trip too; the crate's own 15s socket
    // deadline never comes into play.
    match tokio::time::timeout(timeout, query).await {
        Ok(res) => res.map_err(|e| query_err(addr, e)),
        Err(_) => Err(QueryError::Timeout { addr }),
    }
}

#[async_trait]
impl QueryClient for A2sQueryClient {
    async fn info(
        &self,
        addr: SocketAddr,
        timeout: Duration,
    ) -> Result<Option<TelemetrySnapshot>, QueryError> {
        let info = bounded(addr, timeout, async move {
            let client = a2s::A2SClient::new().await?;
            client.info(addr).await
        })
        .await?;
        Ok(Some(TelemetrySnapshot {
            name: info.name,
            map: info.map,
            players: u32::from(info.players),
            max_players: u32::from(info.max_players),
        }))
    }

    async fn players(
        &self,
        addr: SocketAddr,
        timeout: Duration,
    ) -> Result<Option<Vec<PlayerEntry>>, QueryError> {
        let players = bounded(addr, timeout, async move {
            let client = a2s::A2SClient::new().await?;
            client.players(addr).await
        })
        .await?;
        Ok(Some(
            players
                .into_iter()
                .map(|p| PlayerEntry {
                    name: p.name,
                    score: i64::from(p.score),
                    duration: f64::from(p.duration),
                })
                .collect(),
        ))
    }
}
