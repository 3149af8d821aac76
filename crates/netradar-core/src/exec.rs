// ── Subprocess execution ──
//
// Every OS command the engine runs goes through here. Invariants:
// a hard deadline on every invocation, termination escalating from
// SIGTERM to SIGKILL after a 2s grace, and partial stdout retained on
// timeout (the mDNS dynamic-discovery parser depends on partial output
// being valid input).

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

use crate::error::CoreError;

const KILL_GRACE: Duration = Duration::from_secs(2);

/// Captured result of a subprocess run.
#[derive(Debug)]
pub(crate) struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process had to be killed.
    pub status: Option<ExitStatus>,
    pub timed_out: bool,
}

impl ExecOutput {
    pub(crate) fn success(&self) -> bool {
        self.status.is_some_and(|s| s.success())
    }
}

/// Run a command to completion (or deadline), capturing both streams.
///
/// On deadline the child receives SIGTERM, then SIGKILL 2s later if it
/// has not exited. Output captured before termination is returned.
pub(crate) async fn run(
    program: &str,
    args: &[&str],
    deadline: Duration,
) -> Result<ExecOutput, CoreError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| CoreError::command_io(program, &e))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_task = tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(mut pipe) = stdout {
            let _ = pipe.read_to_string(&mut buf).await;
        }
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(mut pipe) = stderr {
            let _ = pipe.read_to_string(&mut buf).await;
        }
        buf
    });

    let (status, timed_out) = match tokio::time::timeout(deadline, child.wait()).await {
        Ok(Ok(status)) => (Some(status), false),
        Ok(Err(e)) => return Err(CoreError::command_io(program, &e)),
        Err(_) => {
            terminate(&mut child).await;
            (None, true)
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    Ok(ExecOutput {
        stdout,
        stderr,
        status,
        timed_out,
    })
}

/// Run a command and return stdout, treating timeout or non-zero exit as
/// an error. For parsers that require complete output.
pub(crate) async fn run_ok(
    program: &str,
    args: &[&str],
    deadline: Duration,
) -> Result<String, CoreError> {
    let out = run(program, args, deadline).await?;
    if out.timed_out {
        return Err(CoreError::CommandTimeout {
            command: program.to_owned(),
            timeout_secs: deadline.as_secs(),
        });
    }
    if !out.success() {
        let code = out
            .status
            .and_then(|s| s.code())
            .map_or_else(|| "killed by signal".to_owned(), |c| format!("exit {c}"));
        return Err(CoreError::CommandFailed {
            command: program.to_owned(),
            reason: format!("{code}: {}", crate::truncate_reason(out.stderr.trim())),
        });
    }
    Ok(out.stdout)
}

/// Run a command for at most `window`, then stop it and return whatever
/// stdout was produced. Partial output is the expected outcome here.
pub(crate) async fn run_window(
    program: &str,
    args: &[&str],
    window: Duration,
) -> Result<String, CoreError> {
    let out = run(program, args, window).await?;
    Ok(out.stdout)
}

/// SIGTERM, wait up to the grace period, then SIGKILL.
pub(crate) async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        #[allow(clippy::cast_possible_wrap, clippy::as_conversions)]
        send_sigterm(pid as i32);
        if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
            return;
        }
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn send_sigterm(pid: i32) {
    // SAFETY: pid belongs to a child we spawned and still hold a handle to.
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
}
