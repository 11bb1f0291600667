//! Child process spawning with log forwarding and a kill switch.

use std::{
    process::{ExitStatus, Stdio},
    sync::{Mutex, PoisonError},
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    sync::oneshot,
};

/// A command line: program plus arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandConfig {
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl std::fmt::Display for CommandConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Everything needed to launch a managed child process.
#[derive(Debug, Clone)]
pub(crate) struct ProcessSpec {
    /// Name used in log lines.
    pub name: &'static str,
    pub command: CommandConfig,
    pub extra_args: Vec<String>,
    pub envs: Vec<(String, String)>,
    /// Start from an empty environment instead of inheriting ours.
    pub clear_env: bool,
}

impl ProcessSpec {
    pub fn new(name: &'static str, command: CommandConfig) -> Self {
        Self {
            name,
            command,
            extra_args: Vec::new(),
            envs: Vec::new(),
            clear_env: false,
        }
    }

    /// Append arguments after the configured ones.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Run the child with exactly these variables.
    pub fn exact_env<'a>(mut self, vars: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        self.clear_env = true;
        self.envs.extend(
            vars.into_iter()
                .map(|(key, value)| (key.to_string(), value.to_string())),
        );
        self
    }

    /// Spawn the process. Its stdout and stderr are forwarded to the log line by line.
    pub fn spawn(self) -> anyhow::Result<(KillSwitch, ChildExit)> {
        let mut cmd = Command::new(&self.command.program);

        cmd.args(&self.command.args)
            .args(&self.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if self.clear_env {
            cmd.env_clear();
        }
        cmd.envs(self.envs);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {} (`{}`)", self.name, self.command))?;

        tracing::debug!(
            service = self.name,
            pid = child.id(),
            command = %self.command,
            "Process spawned"
        );

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(self.name, "stdout", stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(self.name, "stderr", stderr));
        }

        let (tx, rx) = oneshot::channel();

        Ok((
            KillSwitch {
                tx: Mutex::new(Some(tx)),
            },
            ChildExit {
                name: self.name,
                child,
                kill_rx: rx,
            },
        ))
    }
}

/// Forward every line of a child stream to the log, verbatim.
async fn forward_lines(name: &'static str, stream: &'static str, reader: impl AsyncRead + Unpin) {
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::info!(service = name, stream, "{}", line),
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(service = name, stream, error = %e, "Error reading process output");
                break;
            }
        }
    }

    tracing::trace!(service = name, stream, "Output stream ended");
}

/// Fire-and-forget termination request for a managed child.
#[derive(Debug)]
pub(crate) struct KillSwitch {
    tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl KillSwitch {
    /// Request termination. Returns `false` if it was already requested.
    pub fn fire(&self) -> bool {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();

        match tx {
            Some(tx) => {
                // The child may already have exited, in which case nobody listens.
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }
}

/// Completion of a managed child.
pub(crate) struct ChildExit {
    name: &'static str,
    child: Child,
    kill_rx: oneshot::Receiver<()>,
}

impl ChildExit {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the child to exit, killing it if the kill switch fires (or is dropped)
    /// first.
    pub async fn wait(mut self) -> anyhow::Result<ExitStatus> {
        let exited = tokio::select! {
            status = self.child.wait() => Some(status),
            _ = &mut self.kill_rx => None,
        };

        let status = match exited {
            Some(status) => status,
            None => {
                tracing::debug!(service = self.name, "Killing process");
                if let Err(e) = self.child.start_kill() {
                    tracing::debug!(service = self.name, error = %e, "Process already gone");
                }
                self.child.wait().await
            }
        }
        .with_context(|| format!("Failed to wait for {}", self.name))?;

        tracing::debug!(service = self.name, %status, "Process exited");

        Ok(status)
    }
}

/// Exit code reported for a finished child. Termination by signal reports `0`.
pub(crate) fn exit_code(status: &ExitStatus) -> i32 {
    status.code().unwrap_or(0)
}
