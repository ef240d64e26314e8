use std::{io, process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::{Child, Command},
};
use warden_process::{CommandResult, CommandSpec};

/// Per-stream capture cap. Output past this is drained and dropped.
pub const MAX_CAPTURE_BYTES: usize = 4 * 1024 * 1024;

const TRUNCATED_MARKER: &str = "\n…(truncated)";

// Time between SIGTERM and SIGKILL once a command has overrun its timeout.
const KILL_GRACE: Duration = Duration::from_millis(1000);

// How long output is still collected after the command itself has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(300);

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program}` timed out after {}ms", .after.as_millis())]
    Timeout { program: String, after: Duration },
    #[error("refusing to run `{program}` as `{user}`: that is the gateway's own account")]
    SameIdentity { program: String, user: String },
    #[error("i/o error while running `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Runs commands under another OS account.
#[async_trait]
pub trait PrivilegedRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandResult, RunError>;

    /// Like [`PrivilegedRunner::run`], but pipes `content` to the child's stdin
    /// and closes it so the child sees EOF.
    async fn run_with_stdin(
        &self,
        spec: &CommandSpec,
        content: &str,
    ) -> Result<CommandResult, RunError>;
}

/// `sudo -n -u <user> -- <program> <args...>`
#[derive(Debug, Clone)]
pub struct SudoRunner {
    launcher: String,
    launcher_args: Vec<String>,
    own_user: Option<String>,
}

impl SudoRunner {
    pub fn new(launcher: impl Into<String>) -> Self {
        Self {
            launcher: launcher.into(),
            // Never prompt: a password prompt would hang or eat piped stdin.
            launcher_args: vec!["-n".to_string()],
            own_user: current_username(),
        }
    }

    /// Replace the flags placed between the launcher and `-u <user>`.
    pub fn with_launcher_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.launcher_args = args.into_iter().map(Into::into).collect();
        self
    }

    #[cfg(test)]
    pub(crate) fn with_own_user(mut self, user: Option<&str>) -> Self {
        self.own_user = user.map(str::to_string);
        self
    }

    fn argv(&self, spec: &CommandSpec) -> Vec<String> {
        let mut argv = self.launcher_args.clone();
        argv.extend([
            "-u".to_string(),
            spec.run_as.as_str().to_string(),
            "--".to_string(),
            spec.program.clone(),
        ]);
        argv.extend(spec.args.iter().cloned());
        argv
    }

    async fn execute(
        &self,
        spec: &CommandSpec,
        input: Option<&str>,
    ) -> Result<CommandResult, RunError> {
        if self.own_user.as_deref() == Some(spec.run_as.as_str()) {
            return Err(RunError::SameIdentity {
                program: spec.program.clone(),
                user: spec.run_as.to_string(),
            });
        }

        let mut cmd = Command::new(&self.launcher);
        cmd.args(self.argv(spec))
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        {
            unsafe {
                cmd.pre_exec(|| {
                    // Own process group so a timeout can take down the whole tree.
                    if libc::setsid() == -1 {
                        return Err(io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        tracing::debug!(
            user = %spec.run_as,
            command = %spec.display(),
            timeout_ms = spec.timeout.as_millis() as u64,
            "exec privileged command"
        );

        let mut child = cmd.spawn().map_err(|source| RunError::Launch {
            program: spec.program.clone(),
            source,
        })?;
        let mut group = GroupGuard::new(child.id());

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let mut out_buf = Captured::default();
        let mut err_buf = Captured::default();

        let io = async {
            let feed = async {
                match (stdin, input) {
                    (Some(mut pipe), Some(content)) => {
                        let res = pipe.write_all(content.as_bytes()).await;
                        let _ = pipe.shutdown().await;
                        // Dropping the handle closes the pipe.
                        drop(pipe);
                        res
                    }
                    _ => Ok(()),
                }
            };
            let drains = async {
                tokio::join!(feed, drain(stdout, &mut out_buf), drain(stderr, &mut err_buf))
            };
            tokio::pin!(drains);

            let first = tokio::select! {
                res = &mut drains => First::Drained(res),
                status = child.wait() => First::Exited(status),
            };
            match first {
                First::Drained(res) => (Some(res), child.wait().await),
                // Exit decides completion. A background process started by the
                // command may keep the pipes open indefinitely.
                First::Exited(status) => {
                    let res = tokio::time::timeout(DRAIN_GRACE, &mut drains).await.ok();
                    (res, status)
                }
            }
        };

        let outcome = tokio::time::timeout(spec.timeout, io).await;
        let (drained, status) = match outcome {
            Ok(v) => v,
            Err(_) => {
                terminate(&mut child, &group).await;
                group.disarm();
                tracing::warn!(
                    user = %spec.run_as,
                    command = %spec.display(),
                    timeout_ms = spec.timeout.as_millis() as u64,
                    "privileged command timed out; killed"
                );
                return Err(RunError::Timeout {
                    program: spec.program.clone(),
                    after: spec.timeout,
                });
            }
        };
        group.disarm();

        let io_err = |source| RunError::Io {
            program: spec.program.clone(),
            source,
        };
        let status = status.map_err(io_err)?;
        match drained {
            Some((fed, out, err)) => {
                out.map_err(io_err)?;
                err.map_err(io_err)?;
                if let Err(e) = fed {
                    // The child may legitimately exit before reading everything;
                    // its exit status decides.
                    tracing::warn!(command = %spec.display(), error = %e, "failed to write stdin");
                }
            }
            None => tracing::debug!(
                command = %spec.display(),
                "output still held open after exit; returning what was captured"
            ),
        }
        let stdout = out_buf.into_text();
        let stderr = err_buf.into_text();

        let result = CommandResult::new(status.code(), stdout, stderr);
        if let Some(text) = result.stderr_text() {
            tracing::warn!(
                user = %spec.run_as,
                command = %spec.display(),
                exit_code = ?result.exit_code,
                stderr = %text,
                "privileged command wrote to stderr"
            );
        }
        Ok(result)
    }
}

#[async_trait]
impl PrivilegedRunner for SudoRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandResult, RunError> {
        self.execute(spec, None).await
    }

    async fn run_with_stdin(
        &self,
        spec: &CommandSpec,
        content: &str,
    ) -> Result<CommandResult, RunError> {
        self.execute(spec, Some(content)).await
    }
}

enum First<D, S> {
    Drained(D),
    Exited(S),
}

#[derive(Default)]
struct Captured {
    buf: Vec<u8>,
    truncated: bool,
}

impl Captured {
    fn into_text(self) -> String {
        let mut out = String::from_utf8_lossy(&self.buf).into_owned();
        if self.truncated {
            out.push_str(TRUNCATED_MARKER);
        }
        out
    }
}

/// Reads `pipe` to EOF into `sink`. What was read survives if the future is
/// dropped early.
async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>, sink: &mut Captured) -> io::Result<()> {
    let Some(mut pipe) = pipe else {
        return Ok(());
    };

    let mut chunk = [0u8; 8192];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        // Keep draining past the cap so the child never blocks on a full pipe.
        let room = MAX_CAPTURE_BYTES.saturating_sub(sink.buf.len());
        if n > room {
            sink.truncated = true;
        }
        sink.buf.extend_from_slice(&chunk[..n.min(room)]);
    }
}

async fn terminate(child: &mut Child, group: &GroupGuard) {
    group.signal(Signal::Term);
    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
        return;
    }
    group.signal(Signal::Kill);
    let _ = child.start_kill();
    let _ = child.wait().await;
}

#[derive(Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

/// Kills the child's process group if the run is abandoned before the child
/// was reaped (e.g. the caller's future was dropped).
struct GroupGuard {
    pgid: Option<i32>,
    armed: bool,
}

impl GroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|p| i32::try_from(p).ok()),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    #[cfg(unix)]
    fn signal(&self, sig: Signal) {
        let Some(pgid) = self.pgid else {
            return;
        };
        let sig = match sig {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        // Best effort: the group may already be gone.
        unsafe {
            libc::kill(-pgid, sig);
        }
    }

    #[cfg(not(unix))]
    fn signal(&self, _sig: Signal) {}
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if self.armed {
            self.signal(Signal::Kill);
        }
    }
}

#[cfg(unix)]
fn current_username() -> Option<String> {
    use std::ffi::CStr;

    let uid = unsafe { libc::geteuid() };
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();
    let mut buf = vec![0 as libc::c_char; 4096];
    let rc = unsafe { libc::getpwuid_r(uid, &mut pwd, buf.as_mut_ptr(), buf.len(), &mut result) };
    if rc != 0 || result.is_null() || pwd.pw_name.is_null() {
        return None;
    }
    let name = unsafe { CStr::from_ptr(pwd.pw_name) };
    Some(name.to_string_lossy().into_owned())
}

#[cfg(not(unix))]
fn current_username() -> Option<String> {
    None
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::Path;

    use super::SudoRunner;

    // Stands in for sudo: checks the `-u <user> --` shape, then runs the rest
    // as the current user.
    const FAKE_SUDO: &str = r#"
[ "$1" = "-u" ] || { echo "expected -u" >&2; exit 97; }
shift 2
[ "$1" = "--" ] || { echo "expected --" >&2; exit 98; }
shift
exec "$@"
"#;

    /// A runner whose launcher is `/bin/sh <fake sudo script>`.
    pub(crate) fn fake_sudo_runner(dir: &Path) -> SudoRunner {
        let script = dir.join("fake-sudo.sh");
        std::fs::write(&script, FAKE_SUDO).unwrap();
        SudoRunner::new("/bin/sh")
            .with_launcher_args([script.display().to_string()])
            .with_own_user(None)
    }
}
