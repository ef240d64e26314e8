use std::{sync::Arc, time::Duration};

use warden_process::CommandSpec;

use crate::{
    profile::ServerProfile,
    runner::{PrivilegedRunner, RunError},
};

const STATUS_SUBCOMMAND: &str = "details";
const STARTED_TOKEN: &str = "started";

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("no command given")]
    EmptyCommand,
    #[error("invalid argument: {0:?}")]
    InvalidArgument(String),
    #[error(transparent)]
    Run(#[from] RunError),
}

/// Drives the LinuxGSM management script for a profile.
#[derive(Clone)]
pub struct ServerControl {
    runner: Arc<dyn PrivilegedRunner>,
    status_timeout: Duration,
    command_timeout: Duration,
}

impl ServerControl {
    pub fn new(
        runner: Arc<dyn PrivilegedRunner>,
        status_timeout: Duration,
        command_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            status_timeout,
            command_timeout,
        }
    }

    fn script(&self, profile: &ServerProfile) -> CommandSpec {
        CommandSpec::new(
            profile.script_path().display().to_string(),
            profile.os_user().clone(),
        )
    }

    /// Output of `<script> details`, colors stripped.
    ///
    /// A non-zero exit still yields whatever the script printed; the script
    /// exits non-zero for some benign states.
    pub async fn status_text(&self, profile: &ServerProfile) -> Result<String, ControlError> {
        let spec = self
            .script(profile)
            .arg(STATUS_SUBCOMMAND)
            .timeout(self.status_timeout);
        let res = self.runner.run(&spec).await?;
        if !res.success() {
            tracing::warn!(
                profile = profile.name(),
                exit_code = ?res.exit_code,
                "status query exited non-zero"
            );
        }
        Ok(res.sanitized)
    }

    /// `true` only when the status text says STARTED. Errors read as stopped.
    pub async fn is_running(&self, profile: &ServerProfile) -> bool {
        match self.status_text(profile).await {
            Ok(text) => reports_started(&text),
            Err(e) => {
                tracing::warn!(profile = profile.name(), error = %e, "status query failed");
                false
            }
        }
    }

    /// Run an arbitrary script subcommand (`start`, `stop`, `restart`, ...).
    ///
    /// The returned text carries stderr too, so nothing the operator should
    /// see gets dropped.
    pub async fn run_subcommand(
        &self,
        profile: &ServerProfile,
        args: &str,
    ) -> Result<String, ControlError> {
        let argv = split_args(args)?;
        let spec = self
            .script(profile)
            .args(argv)
            .timeout(self.command_timeout);

        tracing::info!(profile = profile.name(), args, "running server command");
        let res = self.runner.run(&spec).await?;

        let mut out = res.sanitized.clone();
        if let Some(stderr) = res.stderr_text() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("[stderr] ");
            out.push_str(&stderr);
        }
        if !res.success() {
            tracing::warn!(
                profile = profile.name(),
                args,
                exit_code = ?res.exit_code,
                "server command exited non-zero"
            );
        }
        Ok(out)
    }
}

pub fn reports_started(status: &str) -> bool {
    status.to_ascii_lowercase().contains(STARTED_TOKEN)
}

fn split_args(args: &str) -> Result<Vec<String>, ControlError> {
    let argv: Vec<String> = args.split_whitespace().map(str::to_string).collect();
    if argv.is_empty() {
        return Err(ControlError::EmptyCommand);
    }
    if let Some(bad) = argv.iter().find(|a| a.chars().any(char::is_control)) {
        return Err(ControlError::InvalidArgument(bad.clone()));
    }
    Ok(argv)
}
