//! Process management for the worker subprocess

use super::codec::JsonStreamCodec;
use crate::error::WorkerError;
use futures::StreamExt;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for spawning a subprocess
#[derive(Clone, Debug)]
pub struct ProcessConfig {
    /// Executable to run
    pub program: String,

    /// Arguments to pass to it
    pub args: Vec<String>,

    /// Variables added on top of the inherited environment
    pub env: Vec<(String, String)>,
}

impl ProcessConfig {
    /// Create a new process configuration
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Add an argument
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable
    ///
    /// The child inherits the parent's environment; variables set here are
    /// added to it, overriding inherited values with the same name.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Handle to a running subprocess speaking a stream of JSON documents
///
/// A background monitor task owns the [`Child`]. When the process exits the
/// monitor records the status and cancels [`exited`](Self::exited), so
/// callers blocked elsewhere can select on process death.
pub struct ProcessHandle {
    pid: Option<u32>,
    stdin: Option<BufWriter<ChildStdin>>,
    stdout: FramedRead<ChildStdout, JsonStreamCodec>,
    exited: CancellationToken,
    kill: CancellationToken,
    status: Arc<OnceLock<Option<ExitStatus>>>,
    monitor: Option<JoinHandle<()>>,
}

impl ProcessHandle {
    /// Spawn a new subprocess
    ///
    /// stdin and stdout are piped; stderr is passed through to ours.
    pub fn spawn(config: &ProcessConfig) -> Result<Self, WorkerError> {
        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(WorkerError::Spawn)?;
        let pid = child.id();

        let stdin = child.stdin.take().ok_or_else(|| {
            WorkerError::Spawn(std::io::Error::other("failed to capture worker stdin"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            WorkerError::Spawn(std::io::Error::other("failed to capture worker stdout"))
        })?;

        info!(program = %config.program, pid, "worker started");

        let exited = CancellationToken::new();
        let kill = CancellationToken::new();
        let status = Arc::new(OnceLock::new());
        let monitor = tokio::spawn(monitor_exit(
            child,
            exited.clone(),
            kill.clone(),
            Arc::clone(&status),
        ));

        Ok(Self {
            pid,
            stdin: Some(BufWriter::new(stdin)),
            stdout: FramedRead::new(stdout, JsonStreamCodec::new()),
            exited,
            kill,
            status,
            monitor: Some(monitor),
        })
    }

    /// Write one JSON document followed by a newline
    pub async fn send_message(&mut self, message: &serde_json::Value) -> Result<(), WorkerError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| WorkerError::Exited(self.status.get().copied().flatten()))?;

        let mut line = serde_json::to_vec(message)
            .map_err(|e| WorkerError::Protocol(format!("cannot encode request: {e}")))?;
        line.push(b'\n');

        stdin.write_all(&line).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Read the next JSON document
    ///
    /// Documents may span lines. Returns `Ok(None)` at end of output.
    pub async fn recv_message(&mut self) -> Result<Option<serde_json::Value>, WorkerError> {
        match self.stdout.next().await {
            None => Ok(None),
            Some(Ok(Ok(message))) => Ok(Some(message)),
            Some(Ok(Err(err))) => Err(WorkerError::Protocol(format!(
                "cannot decode response: {err}"
            ))),
            Some(Err(err)) => Err(WorkerError::Io(err)),
        }
    }

    /// Check if the process is still alive
    pub fn is_alive(&self) -> bool {
        !self.exited.is_cancelled()
    }

    /// Token cancelled once the process has exited
    pub fn exited(&self) -> CancellationToken {
        self.exited.clone()
    }

    /// Exit status, once the process has exited
    ///
    /// `None` while running, or if the status could not be collected.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.status.get().copied().flatten()
    }

    /// Stop the process, escalating to a kill after `grace`
    ///
    /// Closes stdin and, on Unix, sends SIGTERM. If the process is still
    /// running once `grace` has elapsed it is killed.
    pub async fn terminate(&mut self, grace: Duration) -> Result<Option<ExitStatus>, WorkerError> {
        if !self.is_alive() {
            return Ok(self.exit_status());
        }

        // EOF on stdin is the worker's cue to finish
        drop(self.stdin.take());
        self.signal_terminate();

        if tokio::time::timeout(grace, self.exited.cancelled())
            .await
            .is_err()
        {
            warn!(pid = self.pid, ?grace, "worker ignored termination, killing");
            self.kill.cancel();
            self.exited.cancelled().await;
        }

        if let Some(monitor) = self.monitor.take() {
            if let Err(err) = monitor.await {
                warn!(%err, "worker monitor task failed");
            }
        }
        Ok(self.exit_status())
    }

    #[cfg(unix)]
    fn signal_terminate(&self) {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = self.pid.and_then(|pid| i32::try_from(pid).ok()) else {
            return;
        };
        if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            debug!(pid, %err, "failed to signal worker");
        }
    }

    #[cfg(not(unix))]
    fn signal_terminate(&self) {}
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.kill.cancel();
    }
}

async fn monitor_exit(
    mut child: Child,
    exited: CancellationToken,
    kill: CancellationToken,
    status: Arc<OnceLock<Option<ExitStatus>>>,
) {
    let result = tokio::select! {
        result = child.wait() => result,
        () = kill.cancelled() => {
            if let Err(err) = child.start_kill() {
                warn!(%err, "failed to kill worker");
            }
            child.wait().await
        }
    };

    let exit = match result {
        Ok(exit) => {
            if exit.success() {
                info!(status = %exit, "worker exited");
            } else {
                warn!(status = %exit, "worker exited");
            }
            Some(exit)
        }
        Err(err) => {
            warn!(%err, "error waiting for worker process");
            None
        }
    };
    let _ = status.set(exit);
    exited.cancel();
}
