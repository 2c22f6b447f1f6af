//! Child process plumbing for the worker-process pipeline.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::messages::{encode_command, parse_message, WorkerCommand, WorkerMessage};
use crate::error::PipelineError;

/// Default time allowed for the worker to load its model and report ready.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(600);

/// Everything needed to (re)spawn a worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub ready_timeout: Duration,
}

impl WorkerSpec {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }
}

/// A running worker that has completed its ready handshake.
#[derive(Debug)]
pub struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    capabilities: Vec<String>,
}

impl WorkerProcess {
    /// Spawn the worker and wait for its `ready` message.
    ///
    /// The child is killed if the handshake fails or the handle is dropped.
    pub async fn spawn(spec: &WorkerSpec) -> Result<Self, PipelineError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn()?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PipelineError::Protocol("worker stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::Protocol("worker stdout unavailable".into()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(pid, "worker: {line}");
                }
            });
        }

        let mut process = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            capabilities: Vec::new(),
        };

        let handshake = tokio::time::timeout(spec.ready_timeout, process.await_ready()).await;
        match handshake {
            Ok(Ok(capabilities)) => {
                tracing::info!(pid, capabilities = ?capabilities, "Worker process ready");
                process.capabilities = capabilities;
                Ok(process)
            }
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => Err(PipelineError::ModelLoad(format!(
                "worker did not report ready within {}s",
                spec.ready_timeout.as_secs()
            ))),
        }
    }

    async fn await_ready(&mut self) -> Result<Vec<String>, PipelineError> {
        loop {
            match self.next_message().await? {
                WorkerMessage::Ready(ready) => return Ok(ready.capabilities),
                WorkerMessage::Error(err) => return Err(PipelineError::ModelLoad(err.message)),
                other => tracing::debug!(message = ?other, "Ignoring message before ready"),
            }
        }
    }

    /// Capabilities advertised in the ready handshake.
    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Whether the child has not exited yet.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Write one command line to the worker.
    pub async fn send(&mut self, command: &WorkerCommand) -> Result<(), PipelineError> {
        let line = encode_command(command)
            .map_err(|e| PipelineError::Protocol(format!("failed to encode command: {e}")))?;
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Next protocol message. Blank and non-protocol lines are skipped;
    /// end of output is a protocol error.
    pub async fn next_message(&mut self) -> Result<WorkerMessage, PipelineError> {
        loop {
            let Some(line) = self.stdout.next_line().await? else {
                return Err(PipelineError::Protocol("worker process closed its output".into()));
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_message(line) {
                Ok(message) => return Ok(message),
                Err(e) => tracing::debug!(error = %e, line, "Skipping non-protocol worker output"),
            }
        }
    }

    /// Kill the child and reap it.
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!(error = %e, "Worker process kill failed");
        }
    }
}
