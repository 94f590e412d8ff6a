/// Supervision of the single managed child process.
///
/// The supervisor is `Idle` (nothing tracked), `Running` (one tracked child),
/// or `Restarting` (SIGTERM sent, waiting for the exit before respawning).
///
/// Every spawned child gets an exit observer: a tokio task that awaits the
/// child and only then takes the state lock. `ensure_running` holds the same
/// lock while it records the pending launch and sends the signal, so the
/// observer either sees the pending launch and respawns, or has already
/// cleared the handle and `ensure_running` starts a fresh child. The
/// replacement is never spawned before the previous exit was observed.
///
/// Calls into one supervisor must still be serialized by the caller: two
/// overlapping build cycles would each see a partially applied transition.
///
/// SIGTERM goes out by raw pid. tokio reaps the child inside `wait()`, a
/// moment before the observer takes the lock, so a SIGTERM issued in that
/// window targets a pid that may already be free. SIGKILL escalation does not
/// have this gap: the observer sends it through the `Child` handle itself.
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;

use crate::report::{Report, ReportKind, Reporter};

/// How a resolved artifact is executed and stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Interpreter to run the artifact with (e.g. `node`). When unset the
    /// artifact itself is executed.
    pub runner: Option<String>,
    /// Grace period between SIGTERM and SIGKILL. `None` never escalates.
    pub stop_timeout: Option<Duration>,
}

impl LaunchSpec {
    fn program(&self, path: &Path) -> String {
        match &self.runner {
            Some(runner) => runner.clone(),
            None => path.display().to_string(),
        }
    }

    fn command(&self, request: &LaunchRequest) -> Command {
        let mut cmd = match &self.runner {
            Some(runner) => {
                let mut cmd = Command::new(runner);
                cmd.arg(&request.path);
                cmd
            }
            None => Command::new(&request.path),
        };
        // stdin carries the build event feed; the child must not consume it.
        cmd.args(&request.args).stdin(Stdio::null());
        cmd
    }
}

/// Observable supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Running,
    Restarting,
}

/// What `ensure_running` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// Nothing was tracked; a new child was spawned.
    Started { pid: u32 },
    /// SIGTERM was sent to `pid`; the replacement starts once it exits.
    Restarting { pid: u32 },
    /// A restart was already in flight; its launch request was replaced
    /// with this one and no further signal was sent.
    RestartCoalesced,
}

/// Errors reported by the supervisor. Neither is fatal: the supervisor stays
/// in a well-defined state and accepts the next call.
#[derive(Debug)]
pub enum SupervisorError {
    /// The child could not be spawned. The supervisor is `Idle`.
    SpawnFailed {
        program: String,
        source: std::io::Error,
    },
    /// The termination signal could not be delivered. The supervisor stays
    /// `Running`, and the launch request is kept so that the child's own exit
    /// still triggers the respawn.
    TerminationFailed { pid: u32, source: Errno },
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorError::SpawnFailed { program, source } => {
                write!(f, "failed to spawn {}: {}", program, source)
            }
            SupervisorError::TerminationFailed { pid, source } => {
                write!(f, "failed to send SIGTERM to pid {}: {}", pid, source)
            }
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SupervisorError::SpawnFailed { source, .. } => Some(source),
            SupervisorError::TerminationFailed { source, .. } => Some(source),
        }
    }
}

impl SupervisorError {
    pub fn kind(&self) -> ReportKind {
        match self {
            SupervisorError::SpawnFailed { .. } => ReportKind::SpawnFailed,
            SupervisorError::TerminationFailed { .. } => ReportKind::TerminationFailed,
        }
    }
}

#[derive(Debug, Clone)]
struct LaunchRequest {
    path: PathBuf,
    args: Vec<String>,
}

#[derive(Debug)]
struct TrackedChild {
    /// Distinguishes successive children, since pids can be reused.
    id: u64,
    pid: u32,
    /// Tells the exit observer that SIGTERM went out and the stop timeout
    /// starts now.
    stopping: Option<oneshot::Sender<()>>,
}

#[derive(Debug, Default)]
struct SupervisionState {
    current: Option<TrackedChild>,
    restart_pending: bool,
    /// Launch to perform when the current child exits.
    pending_launch: Option<LaunchRequest>,
    next_id: u64,
}

/// Delivers a signal to a pid.
type SignalFn = fn(u32, Signal) -> nix::Result<()>;

struct Shared {
    state: Mutex<SupervisionState>,
    launch: LaunchSpec,
    reporter: Arc<dyn Reporter>,
    signal: SignalFn,
}

/// Owns at most one live child process.
pub struct ProcessSupervisor {
    shared: Arc<Shared>,
}

impl ProcessSupervisor {
    pub fn new(launch: LaunchSpec, reporter: Arc<dyn Reporter>) -> Self {
        Self::with_signal(launch, reporter, send_signal)
    }

    fn with_signal(launch: LaunchSpec, reporter: Arc<dyn Reporter>, signal: SignalFn) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SupervisionState::default()),
                launch,
                reporter,
                signal,
            }),
        }
    }

    /// Start `path` if nothing is running, otherwise gracefully restart.
    ///
    /// Never waits for the child. Must be called from within a tokio runtime.
    pub fn ensure_running(
        &self,
        path: &Path,
        args: &[String],
    ) -> Result<EnsureOutcome, SupervisorError> {
        let request = LaunchRequest {
            path: path.to_path_buf(),
            args: args.to_vec(),
        };
        let mut state = self.shared.lock();

        let Some(pid) = state.current.as_ref().map(|c| c.pid) else {
            let pid = self.shared.spawn_tracked(&mut state, &request)?;
            return Ok(EnsureOutcome::Started { pid });
        };

        if state.restart_pending {
            tracing::debug!(
                pid,
                path = %path.display(),
                "restart already in flight, replacing launch request"
            );
            state.pending_launch = Some(request);
            return Ok(EnsureOutcome::RestartCoalesced);
        }

        state.pending_launch = Some(request);
        (self.shared.signal)(pid, Signal::SIGTERM)
            .map_err(|source| SupervisorError::TerminationFailed { pid, source })?;
        state.restart_pending = true;
        tracing::debug!(pid, "sent SIGTERM, waiting for exit");

        if let Some(stopping) = state.current.as_mut().and_then(|c| c.stopping.take()) {
            let _ = stopping.send(());
        }

        Ok(EnsureOutcome::Restarting { pid })
    }

    pub fn state(&self) -> SupervisorState {
        let state = self.shared.lock();
        match (&state.current, state.restart_pending) {
            (None, _) => SupervisorState::Idle,
            (Some(_), false) => SupervisorState::Running,
            (Some(_), true) => SupervisorState::Restarting,
        }
    }

    /// Pid of the tracked child, if any.
    pub fn current_pid(&self) -> Option<u32> {
        self.shared.lock().current.as_ref().map(|c| c.pid)
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SupervisionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the child, track it, and attach its exit observer.
    fn spawn_tracked(
        self: &Arc<Self>,
        state: &mut SupervisionState,
        request: &LaunchRequest,
    ) -> Result<u32, SupervisorError> {
        let program = self.launch.program(&request.path);
        let child = self
            .launch
            .command(request)
            .spawn()
            .map_err(|source| SupervisorError::SpawnFailed {
                program: program.clone(),
                source,
            })?;
        let pid = child.id().ok_or_else(|| SupervisorError::SpawnFailed {
            program: program.clone(),
            source: std::io::Error::other("child exited before it could be tracked"),
        })?;

        state.next_id += 1;
        let id = state.next_id;
        let (stopping, stop_requested) = oneshot::channel();
        state.current = Some(TrackedChild {
            id,
            pid,
            stopping: Some(stopping),
        });
        tracing::info!(
            pid,
            program = %program,
            path = %request.path.display(),
            args = ?request.args,
            "child process started"
        );

        let shared = Arc::clone(self);
        let stop_timeout = self.launch.stop_timeout;
        tokio::spawn(async move {
            let status = wait_for_exit(child, pid, stop_timeout, stop_requested).await;
            match &status {
                Ok(status) => tracing::info!(pid, %status, "child process exited"),
                Err(e) => tracing::warn!(pid, error = %e, "failed to wait on child process"),
            }
            shared.on_exit(id);
        });

        Ok(pid)
    }

    fn on_exit(self: &Arc<Self>, id: u64) {
        let mut state = self.lock();
        if state.current.as_ref().map(|c| c.id) != Some(id) {
            return;
        }
        state.current = None;
        state.restart_pending = false;

        let Some(request) = state.pending_launch.take() else {
            return;
        };
        if let Err(e) = self.spawn_tracked(&mut state, &request) {
            self.reporter
                .report(Report::new(ReportKind::SpawnFailed, e.to_string()));
        }
    }
}

/// Await the child. Once SIGTERM has been sent and `stop_timeout` passes
/// without an exit, the child is killed through its handle.
async fn wait_for_exit(
    mut child: Child,
    pid: u32,
    stop_timeout: Option<Duration>,
    mut stop_requested: oneshot::Receiver<()>,
) -> std::io::Result<std::process::ExitStatus> {
    let Some(timeout) = stop_timeout else {
        return child.wait().await;
    };

    tokio::select! {
        status = child.wait() => return status,
        Ok(()) = &mut stop_requested => {}
    }

    tokio::select! {
        status = child.wait() => status,
        _ = tokio::time::sleep(timeout) => {
            tracing::warn!(pid, "child ignored SIGTERM, sending SIGKILL");
            if let Err(e) = child.start_kill() {
                tracing::error!(pid, error = %e, "failed to send SIGKILL");
            }
            child.wait().await
        }
    }
}

/// Signal a child. A process that is already gone counts as delivered: its
/// exit observer is about to run.
fn send_signal(pid: u32, sig: Signal) -> nix::Result<()> {
    match signal::kill(Pid::from_raw(pid as i32), sig) {
        Err(Errno::ESRCH) => Ok(()),
        other => other,
    }
}
