use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use warden_process::{CommandSpec, OsUser};

use crate::{
    profile::ServerProfile,
    runner::{PrivilegedRunner, RunError},
};

/// Map rotation list; lives with the game content rather than LinuxGSM config.
pub const MAPCYCLE: &str = "mapcycle.txt";

pub const MAX_CONFIG_BYTES: usize = 1024 * 1024;

// $1 = target, $2 = template. Leaves an existing file alone.
const SEED_SCRIPT: &str =
    r#"[ -e "$1" ] && exit 0; if [ -f "$2" ]; then cp -- "$2" "$1"; else : > "$1"; fi"#;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ConfigFileDescriptor {
    /// Name as listed to the operator (allow-list casing).
    pub name: String,
    pub path: PathBuf,
    pub owner: OsUser,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("file not allowed: {0}")]
    NotAllowed(String),
    #[error("content too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
    #[error("failed to read {name}: {stderr}")]
    ReadFailed {
        name: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("failed to write {name}: {stderr}")]
    WriteFailed {
        name: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error(transparent)]
    Run(#[from] RunError),
}

/// Files an operator may edit for `profile`, in display order.
pub fn editable_files(profile: &ServerProfile) -> Vec<String> {
    vec![
        "_default.cfg".to_string(),
        "common.cfg".to_string(),
        format!("{}.cfg", profile.name()),
        MAPCYCLE.to_string(),
    ]
}

/// Map a requested name onto its allow-listed file. Pure; never touches disk.
pub fn resolve(profile: &ServerProfile, name: &str) -> Result<ConfigFileDescriptor, ConfigError> {
    if name.contains(['/', '\\', '\0']) || name.contains("..") {
        return Err(ConfigError::NotAllowed(name.to_string()));
    }
    let canonical = editable_files(profile)
        .into_iter()
        .find(|f| f.eq_ignore_ascii_case(name))
        .ok_or_else(|| ConfigError::NotAllowed(name.to_string()))?;

    let path = if canonical == MAPCYCLE {
        profile.content_dir().join(MAPCYCLE)
    } else {
        profile.lgsm_config_dir().join(&canonical)
    };

    Ok(ConfigFileDescriptor {
        name: canonical,
        path,
        owner: profile.os_user().clone(),
    })
}

fn mapcycle_template(profile: &ServerProfile) -> PathBuf {
    profile.content_dir().join("cfg").join("mapcycle_default.txt")
}

fn path_arg(p: &Path) -> String {
    p.display().to_string()
}

/// One async mutex per (profile, file) so concurrent edits land one at a time.
#[derive(Debug, Default, Clone)]
struct WriteLocks {
    inner: Arc<Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>>,
}

impl WriteLocks {
    fn get(&self, profile: &str, file: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.entry((profile.to_string(), file.to_string()))
            .or_default()
            .clone()
    }
}

/// Reads and writes allow-listed config files as the game server's account.
#[derive(Clone)]
pub struct ConfigFiles {
    runner: Arc<dyn PrivilegedRunner>,
    timeout: Duration,
    locks: WriteLocks,
}

impl ConfigFiles {
    pub fn new(runner: Arc<dyn PrivilegedRunner>, timeout: Duration) -> Self {
        Self {
            runner,
            timeout,
            locks: WriteLocks::default(),
        }
    }

    pub async fn read(
        &self,
        profile: &ServerProfile,
        user: &OsUser,
        name: &str,
    ) -> Result<String, ConfigError> {
        let file = resolve(profile, name)?;
        if file.name == MAPCYCLE {
            self.seed_mapcycle(profile, user, &file).await;
        }

        let spec = CommandSpec::new("cat", user.clone())
            .args(["--".to_string(), path_arg(&file.path)])
            .timeout(self.timeout);
        let res = self.runner.run(&spec).await?;
        if !res.success() {
            let stderr = res.stderr_text().unwrap_or_default();
            tracing::warn!(
                profile = profile.name(),
                file = %file.name,
                exit_code = ?res.exit_code,
                %stderr,
                "config read failed"
            );
            return Err(ConfigError::ReadFailed {
                name: file.name,
                exit_code: res.exit_code,
                stderr,
            });
        }
        // Raw stdout: this text goes back into the file on save.
        Ok(res.stdout)
    }

    pub async fn write(
        &self,
        profile: &ServerProfile,
        user: &OsUser,
        name: &str,
        content: &str,
    ) -> Result<(), ConfigError> {
        let file = resolve(profile, name)?;
        if content.len() > MAX_CONFIG_BYTES {
            return Err(ConfigError::TooLarge {
                size: content.len(),
                max: MAX_CONFIG_BYTES,
            });
        }

        let lock = self.locks.get(profile.name(), &file.name);
        let _guard = lock.lock().await;

        let spec = CommandSpec::new("tee", user.clone())
            .args(["--".to_string(), path_arg(&file.path)])
            .timeout(self.timeout);
        let res = self.runner.run_with_stdin(&spec, content).await?;
        if !res.success() {
            let stderr = res.stderr_text().unwrap_or_default();
            tracing::warn!(
                profile = profile.name(),
                file = %file.name,
                exit_code = ?res.exit_code,
                %stderr,
                "config write failed"
            );
            return Err(ConfigError::WriteFailed {
                name: file.name,
                exit_code: res.exit_code,
                stderr,
            });
        }

        tracing::info!(
            profile = profile.name(),
            file = %file.name,
            bytes = content.len(),
            "config written"
        );
        Ok(())
    }

    /// First read of the map rotation creates it from the game's default
    /// template, or empty when there is none. Runs as `user`, like the read.
    async fn seed_mapcycle(&self, profile: &ServerProfile, user: &OsUser, file: &ConfigFileDescriptor) {
        let spec = CommandSpec::new("sh", user.clone())
            .args([
                "-c".to_string(),
                SEED_SCRIPT.to_string(),
                "sh".to_string(),
                path_arg(&file.path),
                path_arg(&mapcycle_template(profile)),
            ])
            .timeout(self.timeout);

        match self.runner.run(&spec).await {
            Ok(res) if res.success() => {}
            Ok(res) => tracing::warn!(
                profile = profile.name(),
                exit_code = ?res.exit_code,
                stderr = %res.stderr_text().unwrap_or_default(),
                "mapcycle seeding failed"
            ),
            Err(e) => tracing::warn!(profile = profile.name(), error = %e, "mapcycle seeding failed"),
        }
    }
}
