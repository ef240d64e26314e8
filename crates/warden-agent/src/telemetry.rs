use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use crate::{
    probe::{Probe, TcpProbe},
    query::{A2sQueryClient, PlayerEntry, QueryClient, QueryError, TelemetrySnapshot},
};

/// Why a single candidate did not produce an answer.
#[derive(Debug)]
pub enum CandidateFailure {
    Unreachable,
    Timeout,
    Protocol(String),
    Empty,
}

impl fmt::Display for CandidateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable => f.write_str("unreachable"),
            Self::Timeout => f.write_str("query timed out"),
            Self::Protocol(msg) => write!(f, "protocol failure: {msg}"),
            Self::Empty => f.write_str("no response"),
        }
    }
}

impl From<QueryError> for CandidateFailure {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::Timeout { .. } => Self::Timeout,
            QueryError::Protocol { message, .. } => Self::Protocol(message),
        }
    }
}

/// Live server info/players, tried against each candidate in order.
#[derive(Clone)]
pub struct TelemetryService {
    probe: Arc<dyn Probe>,
    client: Arc<dyn QueryClient>,
    probe_timeout: Duration,
    query_timeout: Duration,
}

impl TelemetryService {
    pub fn new(
        probe: Arc<dyn Probe>,
        client: Arc<dyn QueryClient>,
        probe_timeout: Duration,
        query_timeout: Duration,
    ) -> Self {
        Self {
            probe,
            client,
            probe_timeout,
            query_timeout,
        }
    }

    /// TCP probe + A2S over UDP.
    pub fn a2s(probe_timeout: Duration, query_timeout: Duration) -> Self {
        Self::new(
            Arc::new(TcpProbe),
            Arc::new(A2sQueryClient),
            probe_timeout,
            query_timeout,
        )
    }

    pub async fn info(&self, candidates: &[IpAddr], port: u16) -> Option<TelemetrySnapshot> {
        let client = self.client.clone();
        let timeout = self.query_timeout;
        let res = self
            .first_answer(candidates, port, "info", move |addr| {
                let client = client.clone();
                async move { client.info(addr, timeout).await }
            })
            .await;
        if res.is_none() {
            tracing::info!(port, ?candidates, "no candidate answered the info query");
        }
        res
    }

    pub async fn players(&self, candidates: &[IpAddr], port: u16) -> Vec<PlayerEntry> {
        self.try_players(candidates, port).await.unwrap_or_default()
    }

    /// Like [`TelemetryService::players`], but `None` when no candidate
    /// answered, so an empty server is distinguishable from an unreachable one.
    pub async fn try_players(&self, candidates: &[IpAddr], port: u16) -> Option<Vec<PlayerEntry>> {
        let client = self.client.clone();
        let timeout = self.query_timeout;
        self.first_answer(candidates, port, "players", move |addr| {
            let client = client.clone();
            async move { client.players(addr, timeout).await }
        })
        .await
    }

    async fn first_answer<T, F, Fut>(
        &self,
        candidates: &[IpAddr],
        port: u16,
        what: &'static str,
        query: F,
    ) -> Option<T>
    where
        F: Fn(SocketAddr) -> Fut,
        Fut: Future<Output = Result<Option<T>, QueryError>>,
    {
        for ip in candidates {
            let addr = SocketAddr::new(*ip, port);
            match self.attempt(addr, &query).await {
                Ok(v) => {
                    tracing::debug!(candidate = %addr, what, "query answered");
                    return Some(v);
                }
                Err(failure) => {
                    tracing::warn!(candidate = %addr, what, %failure, "candidate failed; trying next");
                }
            }
        }
        None
    }

    async fn attempt<T, F, Fut>(&self, addr: SocketAddr, query: &F) -> Result<T, CandidateFailure>
    where
        F: Fn(SocketAddr) -> Fut,
        Fut: Future<Output = Result<Option<T>, QueryError>>,
    {
        if !self.probe.reachable(addr, self.probe_timeout).await {
            return Err(CandidateFailure::Unreachable);
        }
        query(addr).await?.ok_or(CandidateFailure::Empty)
    }
}
