use std::{
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};

use crate::settings::Settings;

/// Builds the ordered list of addresses a game server might answer on:
/// loopback, the configured game address, then the host's public address.
#[derive(Debug, Clone)]
pub struct CandidateResolver {
    game_addr: Option<IpAddr>,
    public_addr: Option<IpAddr>,
    discovery_url: Option<String>,
    discovery_fallback: Option<IpAddr>,
    discovery_timeout: Duration,
}

impl CandidateResolver {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            game_addr: settings.game_addr,
            public_addr: settings.public_addr,
            discovery_url: settings.public_addr_url.clone(),
            discovery_fallback: settings.public_addr_fallback,
            discovery_timeout: settings.discovery_timeout,
        }
    }

    /// Candidates known without any network round trip: loopback, then the
    /// configured game address.
    pub fn local(&self) -> Vec<IpAddr> {
        dedup_in_order([Some(IpAddr::V4(Ipv4Addr::LOCALHOST)), self.game_addr])
    }

    /// The public address, unless it is one of `tried`.
    pub async fn public_beyond(&self, tried: &[IpAddr]) -> Option<IpAddr> {
        let public = match self.public_addr {
            Some(ip) => Some(ip),
            None => self.discover_public().await,
        };
        public.filter(|ip| !ip.is_unspecified() && !tried.contains(ip))
    }

    async fn discover_public(&self) -> Option<IpAddr> {
        let Some(url) = self.discovery_url.as_deref() else {
            return self.discovery_fallback;
        };

        match fetch_public_ip(url, self.discovery_timeout).await {
            Ok(ip) => Some(ip),
            Err(e) => {
                tracing::debug!(
                    url,
                    error = %e,
                    fallback = ?self.discovery_fallback,
                    "public address discovery failed"
                );
                self.discovery_fallback
            }
        }
    }
}

async fn fetch_public_ip(url: &str, timeout: Duration) -> anyhow::Result<IpAddr> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let body = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    let ip = body
        .trim()
        .parse::<IpAddr>()
        .map_err(|_| anyhow::anyhow!("discovery response is not an address: {:?}", body.trim()))?;
    Ok(ip)
}

fn dedup_in_order(items: impl IntoIterator<Item = Option<IpAddr>>) -> Vec<IpAddr> {
    let mut out: Vec<IpAddr> = Vec::new();
    for ip in items.into_iter().flatten() {
        if ip.is_unspecified() || out.contains(&ip) {
            continue;
        }
        out.push(ip);
    }
    out
}
