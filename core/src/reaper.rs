use std::fmt;
use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::FutureExt;
use futures::future::Shared;
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Exit codes for processes that died by signal follow the shell
/// convention of 128 + signal number.
const EXIT_CODE_SIGNAL_BASE: i32 = 128;
const SIGKILL_CODE: i32 = 9;

/// Final account of a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The process exited on its own.
    Exited { code: i32 },
    /// The deadline fired while the process was still alive; it was killed.
    TimedOut,
    /// The handle was closed while the process was still alive; it was
    /// terminated, gracefully when possible.
    Terminated,
    /// Waiting on the process itself failed.
    WaitFailed(String),
}

/// Hands every spawned child to a supervisor task that enforces a hard
/// deadline, so no process can outlive it even when the caller that
/// spawned it is long gone.
#[derive(Clone, Debug)]
pub struct ProcessReaper {
    inner: Arc<ReaperInner>,
}

#[derive(Debug)]
struct ReaperInner {
    grace_period: Duration,
    supervised: AtomicUsize,
}

impl ProcessReaper {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            inner: Arc::new(ReaperInner {
                grace_period,
                supervised: AtomicUsize::new(0),
            }),
        }
    }

    /// Hand the child to a dedicated supervisor task. The task is the sole
    /// owner of the process from here on: it waits for exit, enforces
    /// `deadline`, and performs termination when the handle is closed.
    pub fn register(&self, child: Child, deadline: Duration) -> ProcessHandle {
        let pid = child.id();
        let token = CancellationToken::new();
        let (exit_tx, exit_rx) = oneshot::channel();

        self.inner.supervised.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let task_token = token.clone();
        tokio::spawn(async move {
            let outcome = supervise(child, deadline, task_token, inner.grace_period).await;
            inner.supervised.fetch_sub(1, Ordering::SeqCst);
            let _ = exit_tx.send(outcome);
        });

        ProcessHandle {
            pid,
            token,
            exit: exit_rx.shared(),
        }
    }

    /// Number of processes currently under supervision.
    pub fn supervised_count(&self) -> usize {
        self.inner.supervised.load(Ordering::SeqCst)
    }
}

/// Caller-side view of a supervised process. Cloneable; every clone
/// observes the same single outcome.
#[derive(Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    token: CancellationToken,
    exit: Shared<oneshot::Receiver<ExitOutcome>>,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    /// Process id as captured at registration, while the child was alive.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the supervisor's verdict.
    pub async fn wait(&self) -> ExitOutcome {
        match self.exit.clone().await {
            Ok(outcome) => outcome,
            Err(_) => ExitOutcome::WaitFailed("supervisor vanished".to_string()),
        }
    }

    /// Terminate the process and wait for the result. Idempotent: the first
    /// call requests termination; later calls, and calls after a natural
    /// exit, only observe the recorded outcome.
    pub async fn close(&self) -> ExitOutcome {
        self.token.cancel();
        self.wait().await
    }

    /// Synchronous half of [`close`](Self::close) for drop paths; the
    /// supervisor finishes termination in the background.
    pub fn request_close(&self) {
        self.token.cancel();
    }
}

async fn supervise(
    mut child: Child,
    deadline: Duration,
    token: CancellationToken,
    grace_period: Duration,
) -> ExitOutcome {
    tokio::select! {
        result = tokio::time::timeout(deadline, child.wait()) => match result {
            Ok(Ok(status)) => ExitOutcome::Exited { code: exit_code_of(status) },
            Ok(Err(err)) => {
                tracing::error!(pid = child.id(), "waiting on child failed: {err}");
                ExitOutcome::WaitFailed(err.to_string())
            }
            Err(_) => {
                tracing::warn!(
                    pid = child.id(),
                    deadline_ms = deadline.as_millis() as u64,
                    "process outlived its deadline, killing it"
                );
                if let Err(err) = child.start_kill() {
                    tracing::error!(pid = child.id(), "kill after timeout failed: {err}");
                    return ExitOutcome::WaitFailed(format!("kill after timeout failed: {err}"));
                }
                let _ = child.wait().await;
                ExitOutcome::TimedOut
            }
        },
        _ = token.cancelled() => terminate(child, grace_period).await,
    }
}

/// Two-phase shutdown: ask politely, give the process a moment, then kill.
async fn terminate(mut child: Child, grace_period: Duration) -> ExitOutcome {
    match child.try_wait() {
        Ok(Some(status)) => return ExitOutcome::Exited { code: exit_code_of(status) },
        Ok(None) => {}
        Err(err) => return ExitOutcome::WaitFailed(err.to_string()),
    }

    if send_sigterm(&child) {
        match tokio::time::timeout(grace_period, child.wait()).await {
            Ok(Ok(_status)) => return ExitOutcome::Terminated,
            Ok(Err(err)) => return ExitOutcome::WaitFailed(err.to_string()),
            Err(_) => {
                tracing::debug!(pid = child.id(), "graceful termination expired, escalating");
            }
        }
    }

    if let Err(err) = child.start_kill() {
        tracing::error!(pid = child.id(), "forced termination failed: {err}");
        return ExitOutcome::WaitFailed(format!("forced termination failed: {err}"));
    }
    let _ = child.wait().await;
    ExitOutcome::Terminated
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    match child.id() {
        Some(pid) => unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 },
        None => false,
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    // No portable soft-termination signal; callers fall through to the kill.
    false
}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .unwrap_or_else(|| EXIT_CODE_SIGNAL_BASE + status.signal().unwrap_or(SIGKILL_CODE))
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    use std::process::Stdio;

    use tokio::process::Command;

    fn reaper() -> ProcessReaper {
        ProcessReaper::new(Duration::from_millis(200))
    }

    fn spawn_sleep(seconds: &str) -> Child {
        Command::new("sleep")
            .arg(seconds)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .expect("spawn sleep")
    }

    fn alive(pid: u32) -> bool {
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    #[tokio::test]
    async fn natural_exit_is_reported_with_code() {
        let child = Command::new("sh")
            .args(["-c", "exit 7"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn sh");
        let handle = reaper().register(child, Duration::from_secs(5));
        assert_eq!(handle.wait().await, ExitOutcome::Exited { code: 7 });
    }

    #[tokio::test]
    async fn deadline_kills_the_process() {
        let reaper = reaper();
        let child = spawn_sleep("30");
        let handle = reaper.register(child, Duration::from_millis(100));
        let pid = handle.pid().expect("pid");

        assert_eq!(handle.wait().await, ExitOutcome::TimedOut);
        assert!(!alive(pid));
        assert_eq!(reaper.supervised_count(), 0);
    }

    #[tokio::test]
    async fn close_terminates_a_running_process() {
        let child = spawn_sleep("30");
        let handle = reaper().register(child, Duration::from_secs(60));
        let pid = handle.pid().expect("pid");

        assert_eq!(handle.close().await, ExitOutcome::Terminated);
        assert!(!alive(pid));
    }

    #[tokio::test]
    async fn close_after_exit_keeps_the_recorded_outcome() {
        let child = Command::new("true")
            .stdin(Stdio::null())
            .spawn()
            .expect("spawn true");
        let handle = reaper().register(child, Duration::from_secs(5));

        assert_eq!(handle.wait().await, ExitOutcome::Exited { code: 0 });
        assert_eq!(handle.close().await, ExitOutcome::Exited { code: 0 });
        assert_eq!(handle.close().await, ExitOutcome::Exited { code: 0 });
    }

    #[tokio::test]
    async fn every_clone_observes_the_same_outcome() {
        let child = spawn_sleep("30");
        let handle = reaper().register(child, Duration::from_secs(60));
        let other = handle.clone();

        let (first, second) = tokio::join!(handle.close(), other.wait());
        assert_eq!(first, ExitOutcome::Terminated);
        assert_eq!(second, ExitOutcome::Terminated);
    }

    #[tokio::test]
    async fn signal_death_maps_to_conventional_code() {
        let child = spawn_sleep("30");
        let pid = child.id().expect("pid");
        let handle = reaper().register(child, Duration::from_secs(60));

        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
        assert_eq!(
            handle.wait().await,
            ExitOutcome::Exited { code: EXIT_CODE_SIGNAL_BASE + SIGKILL_CODE },
        );
    }
}
