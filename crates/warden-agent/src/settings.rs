use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use anyhow::Context;

use crate::profile::{ServerProfile, parse_profiles};

pub const DEFAULT_GAME_PORT: u16 = 27015;
const DEFAULT_PROFILES: &str = "cssserver";
const DEFAULT_GAME_DIR: &str = "cstrike";
const DEFAULT_PUBLIC_ADDR_URL: &str = "https://api.ipify.org";

/// Process-wide configuration, read once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen_addr: SocketAddr,
    pub home_root: PathBuf,
    /// Privilege-switch launcher, normally `sudo`.
    pub launcher: String,
    pub profiles: Vec<ServerProfile>,

    pub game_addr: Option<IpAddr>,
    pub public_addr: Option<IpAddr>,
    pub public_addr_url: Option<String>,
    pub public_addr_fallback: Option<IpAddr>,

    pub control_timeout: Duration,
    pub status_timeout: Duration,
    pub probe_timeout: Duration,
    pub query_timeout: Duration,
    pub discovery_timeout: Duration,

    pub read_only: bool,
    pub log_dir: Option<PathBuf>,
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn truthy(v: Option<String>) -> bool {
    matches!(
        v.unwrap_or_default().trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn millis(v: Option<String>, default: u64, min: u64, max: u64) -> Duration {
    let ms = v
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(|ms| ms.clamp(min, max))
        .unwrap_or(default);
    Duration::from_millis(ms)
}

fn ip(name: &str, v: Option<String>) -> anyhow::Result<Option<IpAddr>> {
    non_blank(v)
        .map(|s| {
            s.parse::<IpAddr>()
                .with_context(|| format!("{name} is not an IP address: {s}"))
        })
        .transpose()
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let listen_addr = non_blank(get("WARDEN_LISTEN_ADDR"))
            .unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let listen_addr: SocketAddr = listen_addr
            .parse()
            .with_context(|| format!("invalid WARDEN_LISTEN_ADDR: {listen_addr}"))?;

        let home_root = PathBuf::from(
            non_blank(get("WARDEN_HOME_ROOT")).unwrap_or_else(|| "/home".to_string()),
        );
        if !home_root.is_absolute() {
            anyhow::bail!("WARDEN_HOME_ROOT must be absolute: {}", home_root.display());
        }

        let default_port = match non_blank(get("WARDEN_GAME_PORT")) {
            None => DEFAULT_GAME_PORT,
            Some(p) => p
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .with_context(|| format!("invalid WARDEN_GAME_PORT: {p}"))?,
        };
        let game_dir =
            non_blank(get("WARDEN_GAME_DIR")).unwrap_or_else(|| DEFAULT_GAME_DIR.to_string());
        let raw_profiles =
            non_blank(get("WARDEN_PROFILES")).unwrap_or_else(|| DEFAULT_PROFILES.to_string());
        let profiles = parse_profiles(&raw_profiles, default_port, &game_dir, &home_root)
            .context("invalid WARDEN_PROFILES")?;

        // Unset means the default discovery service; set-but-blank disables discovery.
        let public_addr_url = match get("WARDEN_PUBLIC_ADDR_URL") {
            None => Some(DEFAULT_PUBLIC_ADDR_URL.to_string()),
            Some(v) => non_blank(Some(v)),
        };

        Ok(Self {
            listen_addr,
            home_root,
            launcher: non_blank(get("WARDEN_SUDO")).unwrap_or_else(|| "sudo".to_string()),
            profiles,
            game_addr: ip("WARDEN_GAME_ADDR", get("WARDEN_GAME_ADDR"))?,
            public_addr: ip("WARDEN_PUBLIC_ADDR", get("WARDEN_PUBLIC_ADDR"))?,
            public_addr_url,
            public_addr_fallback: ip(
                "WARDEN_PUBLIC_ADDR_FALLBACK",
                get("WARDEN_PUBLIC_ADDR_FALLBACK"),
            )?,
            control_timeout: millis(get("WARDEN_CONTROL_TIMEOUT_MS"), 15_000, 1000, 600_000),
            status_timeout: millis(get("WARDEN_STATUS_TIMEOUT_MS"), 5000, 500, 120_000),
            probe_timeout: millis(get("WARDEN_PROBE_TIMEOUT_MS"), 500, 50, 10_000),
            query_timeout: millis(get("WARDEN_QUERY_TIMEOUT_MS"), 2000, 100, 30_000),
            discovery_timeout: millis(get("WARDEN_DISCOVERY_TIMEOUT_MS"), 1500, 100, 30_000),
            read_only: truthy(get("WARDEN_READ_ONLY")),
            log_dir: non_blank(get("WARDEN_LOG_DIR")).map(PathBuf::from),
        })
    }

    pub fn default_profile(&self) -> &ServerProfile {
        // parse_profiles never returns an empty list.
        &self.profiles[0]
    }

    pub fn profile(&self, name: &str) -> Option<&ServerProfile> {
        self.profiles.iter().find(|p| p.name() == name)
    }
}
