use std::sync::Arc;

use warden_process::OsUser;

use crate::{
    candidates::CandidateResolver,
    config_files::{self, ConfigError, ConfigFiles},
    control::{ControlError, ServerControl},
    profile::ServerProfile,
    query::{PlayerEntry, TelemetrySnapshot},
    runner::{PrivilegedRunner, SudoRunner},
    settings::Settings,
    telemetry::TelemetryService,
};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("unknown server profile: {0}")]
    UnknownProfile(String),
    #[error("gateway is in read-only mode")]
    ReadOnly,
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Everything the HTTP layer can ask for, keyed by profile name.
#[derive(Clone)]
pub struct Gateway {
    settings: Arc<Settings>,
    control: ServerControl,
    telemetry: TelemetryService,
    configs: ConfigFiles,
    candidates: CandidateResolver,
}

impl Gateway {
    /// Production wiring: sudo, TCP probe, A2S.
    pub fn from_settings(settings: Settings) -> Self {
        let runner: Arc<dyn PrivilegedRunner> = Arc::new(SudoRunner::new(settings.launcher.clone()));
        let telemetry = TelemetryService::a2s(settings.probe_timeout, settings.query_timeout);
        Self::with_parts(settings, runner, telemetry)
    }

    pub fn with_parts(
        settings: Settings,
        runner: Arc<dyn PrivilegedRunner>,
        telemetry: TelemetryService,
    ) -> Self {
        let control = ServerControl::new(
            runner.clone(),
            settings.status_timeout,
            settings.control_timeout,
        );
        let configs = ConfigFiles::new(runner, settings.status_timeout);
        let candidates = CandidateResolver::from_settings(&settings);
        Self {
            settings: Arc::new(settings),
            control,
            telemetry,
            configs,
            candidates,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn profiles(&self) -> Vec<String> {
        self.settings
            .profiles
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    pub fn default_profile(&self) -> &ServerProfile {
        self.settings.default_profile()
    }

    pub fn profile(&self, name: &str) -> Result<&ServerProfile, GatewayError> {
        self.settings
            .profile(name)
            .ok_or_else(|| GatewayError::UnknownProfile(name.to_string()))
    }

    fn ensure_writable(&self) -> Result<(), GatewayError> {
        if self.settings.read_only {
            return Err(GatewayError::ReadOnly);
        }
        Ok(())
    }

    pub async fn is_server_started(&self, profile: &str) -> Result<bool, GatewayError> {
        let p = self.profile(profile)?;
        Ok(self.control.is_running(p).await)
    }

    pub async fn server_details(&self, profile: &str) -> Result<String, GatewayError> {
        let p = self.profile(profile)?;
        Ok(self.control.status_text(p).await?)
    }

    pub async fn run_command(&self, profile: &str, args: &str) -> Result<String, GatewayError> {
        let p = self.profile(profile)?;
        self.ensure_writable()?;
        Ok(self.control.run_subcommand(p, args).await?)
    }

    pub async fn server_info(
        &self,
        profile: &str,
    ) -> Result<Option<TelemetrySnapshot>, GatewayError> {
        let p = self.profile(profile)?;
        let local = self.candidates.local();
        if let Some(snapshot) = self.telemetry.info(&local, p.port()).await {
            return Ok(Some(snapshot));
        }
        // Public address discovery is an outbound request; only pay for it
        // when nothing local answered.
        Ok(match self.candidates.public_beyond(&local).await {
            Some(ip) => self.telemetry.info(&[ip], p.port()).await,
            None => None,
        })
    }

    pub async fn players(&self, profile: &str) -> Result<Vec<PlayerEntry>, GatewayError> {
        let p = self.profile(profile)?;
        let local = self.candidates.local();
        if let Some(players) = self.telemetry.try_players(&local, p.port()).await {
            return Ok(players);
        }
        Ok(match self.candidates.public_beyond(&local).await {
            Some(ip) => self.telemetry.players(&[ip], p.port()).await,
            None => Vec::new(),
        })
    }

    pub fn editable_files(&self, profile: &str) -> Result<Vec<String>, GatewayError> {
        Ok(config_files::editable_files(self.profile(profile)?))
    }

    pub async fn read_config(
        &self,
        profile: &str,
        user: &OsUser,
        file: &str,
    ) -> Result<String, GatewayError> {
        let p = self.profile(profile)?;
        Ok(self.configs.read(p, user, file).await?)
    }

    pub async fn write_config(
        &self,
        profile: &str,
        user: &OsUser,
        file: &str,
        content: &str,
    ) -> Result<(), GatewayError> {
        let p = self.profile(profile)?;
        self.ensure_writable()?;
        Ok(self.configs.write(p, user, file, content).await?)
    }
}
