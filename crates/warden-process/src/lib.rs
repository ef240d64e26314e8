use std::{fmt, path::PathBuf, time::Duration};

pub mod sanitize;

pub use sanitize::strip_ansi;

/// POSIX account a privileged command runs as.
///
/// NOTE: This is never `root`. The gateway only ever switches into the game
/// server's own account, which is a narrower identity than the launcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct OsUser(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OsUserError {
    #[error("os user must be non-empty")]
    Empty,
    #[error("os user is too long: {0}")]
    TooLong(String),
    #[error("invalid os user: {0}")]
    Invalid(String),
    #[error("refusing to run commands as root")]
    Root,
}

const MAX_USER_LEN: usize = 32;

impl OsUser {
    pub fn new(name: impl Into<String>) -> Result<Self, OsUserError> {
        let name = name.into();
        if name.is_empty() {
            return Err(OsUserError::Empty);
        }
        if name.len() > MAX_USER_LEN {
            return Err(OsUserError::TooLong(name));
        }

        let mut chars = name.chars();
        let first_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
        if !first_ok || !rest_ok {
            return Err(OsUserError::Invalid(name));
        }
        if name == "root" {
            return Err(OsUserError::Root);
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OsUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One privileged invocation. Built fresh per call and consumed by a runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub run_as: OsUser,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(program: impl Into<String>, run_as: OsUser) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            run_as,
            cwd: None,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Human-readable command line for logs.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            return self.program.clone();
        }
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// Outcome of a single finished process.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CommandResult {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// `stdout` with terminal escape sequences removed.
    pub sanitized: String,
}

impl CommandResult {
    pub fn new(exit_code: Option<i32>, stdout: String, stderr: String) -> Self {
        let sanitized = strip_ansi(&stdout);
        Self {
            exit_code,
            stdout,
            stderr,
            sanitized,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Sanitized stderr, or `None` when the process wrote nothing meaningful there.
    pub fn stderr_text(&self) -> Option<String> {
        let s = strip_ansi(&self.stderr);
        let s = s.trim();
        if s.is_empty() {
            None
        } else {
            Some(s.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_user_accepts_service_accounts() {
        for name in ["cssserver", "Tf2server", "_svc", "css-1", "game.srv"] {
            assert_eq!(OsUser::new(name).unwrap().as_str(), name);
        }
    }

    #[test]
    fn os_user_rejects_root_and_garbage() {
        assert_eq!(OsUser::new("root"), Err(OsUserError::Root));
        assert_eq!(OsUser::new(""), Err(OsUserError::Empty));
        assert!(matches!(OsUser::new("1abc"), Err(OsUserError::Invalid(_))));
        assert!(matches!(OsUser::new("a b"), Err(OsUserError::Invalid(_))));
        assert!(matches!(OsUser::new("-u"), Err(OsUserError::Invalid(_))));
        assert!(matches!(
            OsUser::new("x".repeat(33)),
            Err(OsUserError::TooLong(_))
        ));
    }

    #[test]
    fn command_spec_builder_collects_args() {
        let user = OsUser::new("cssserver").unwrap();
        let spec = CommandSpec::new("/home/cssserver/cssserver", user)
            .arg("details")
            .args(["--verbose"])
            .timeout(Duration::from_secs(2));
        assert_eq!(spec.args, vec!["details", "--verbose"]);
        assert_eq!(spec.timeout, Duration::from_secs(2));
        assert_eq!(spec.display(), "/home/cssserver/cssserver details --verbose");
    }

    #[test]
    fn command_result_sanitizes_stdout() {
        let r = CommandResult::new(Some(0), "\x1b[32mSTARTED\x1b[0m\n".into(), String::new());
        assert!(r.success());
        assert_eq!(r.sanitized, "STARTED\n");
        assert_eq!(r.stderr_text(), None);

        let r = CommandResult::new(None, String::new(), "  \x1b[31mboom\x1b[0m \n".into());
        assert!(!r.success());
        assert_eq!(r.stderr_text().as_deref(), Some("boom"));
    }
}
