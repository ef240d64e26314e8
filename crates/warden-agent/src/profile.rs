use std::path::{Path, PathBuf};

use warden_process::{OsUser, OsUserError};

/// A managed game server installation.
///
/// The profile name doubles as the OS account and the install directory name
/// (LinuxGSM convention: user `cssserver` owns `/home/cssserver/cssserver`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerProfile {
    user: OsUser,
    port: u16,
    game_dir: String,
    install_dir: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("invalid profile name: {0}")]
    Name(#[from] OsUserError),
    #[error("invalid game directory: {0:?}")]
    GameDir(String),
    #[error("invalid port in profile entry: {0:?}")]
    Port(String),
    #[error("malformed profile entry: {0:?}")]
    Malformed(String),
    #[error("duplicate profile: {0}")]
    Duplicate(String),
    #[error("no profiles configured")]
    Empty,
}

fn valid_game_dir(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
}

impl ServerProfile {
    pub fn new(
        name: &str,
        port: u16,
        game_dir: &str,
        home_root: &Path,
    ) -> Result<Self, ProfileError> {
        let user = OsUser::new(name)?;
        if !valid_game_dir(game_dir) {
            return Err(ProfileError::GameDir(game_dir.to_string()));
        }
        let install_dir = home_root.join(user.as_str());
        Ok(Self {
            user,
            port,
            game_dir: game_dir.to_string(),
            install_dir,
        })
    }

    pub fn name(&self) -> &str {
        self.user.as_str()
    }

    pub fn os_user(&self) -> &OsUser {
        &self.user
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn game_dir(&self) -> &str {
        &self.game_dir
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    /// The LinuxGSM management script, e.g. `/home/cssserver/cssserver`.
    pub fn script_path(&self) -> PathBuf {
        self.install_dir.join(self.name())
    }

    /// Game content directory, e.g. `/home/cssserver/serverfiles/cstrike`.
    pub fn content_dir(&self) -> PathBuf {
        self.install_dir.join("serverfiles").join(&self.game_dir)
    }

    /// Per-instance LinuxGSM config directory.
    pub fn lgsm_config_dir(&self) -> PathBuf {
        self.install_dir
            .join("lgsm")
            .join("config-lgsm")
            .join(self.name())
    }
}

/// Parse `name[:port[:game_dir]]` entries separated by commas.
pub fn parse_profiles(
    raw: &str,
    default_port: u16,
    default_game_dir: &str,
    home_root: &Path,
) -> Result<Vec<ServerProfile>, ProfileError> {
    let mut out: Vec<ServerProfile> = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let mut parts = entry.split(':').map(str::trim);
        let name = parts.next().unwrap_or_default();
        let port = match parts.next() {
            None | Some("") => default_port,
            Some(p) => p
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| ProfileError::Port(entry.to_string()))?,
        };
        let game_dir = match parts.next() {
            None | Some("") => default_game_dir,
            Some(g) => g,
        };
        if parts.next().is_some() {
            return Err(ProfileError::Malformed(entry.to_string()));
        }

        let profile = ServerProfile::new(name, port, game_dir, home_root)?;
        if out.iter().any(|p| p.name() == profile.name()) {
            return Err(ProfileError::Duplicate(profile.name().to_string()));
        }
        out.push(profile);
    }

    if out.is_empty() {
        return Err(ProfileError::Empty);
    }
    Ok(out)
}
