// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Running external executables.

use std::ffi::OsStr;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use installer_common::ErrorKind;
use slog::{Logger, debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;

use crate::relay::{OutputRelay, Panel, RelayError};

#[derive(Debug)]
pub struct CommandFailureInfo {
    command: String,
    status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl fmt::Display for CommandFailureInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Command [{}] executed and failed with status: {}",
            self.command, self.status
        )?;
        if !self.stdout.is_empty() {
            write!(f, "  stdout: {}", self.stdout)?;
        }
        if !self.stderr.is_empty() {
            write!(f, "  stderr: {}", self.stderr)?;
        }
        Ok(())
    }
}

impl CommandFailureInfo {
    pub fn status(&self) -> ExitStatus {
        self.status
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ExecutionError {
    #[error("Failed to start execution of [{command}]")]
    ExecutionStart {
        command: String,
        #[source]
        err: std::io::Error,
    },

    #[error("I/O error while waiting for [{command}] to exit")]
    Wait {
        command: String,
        #[source]
        err: std::io::Error,
    },

    #[error("{0}")]
    CommandFailure(Box<CommandFailureInfo>),

    #[error("Failed to read output of [{command}]")]
    ReadOutput {
        command: String,
        #[source]
        err: std::io::Error,
    },

    #[error("Failed to relay output of [{command}]")]
    Relay {
        command: String,
        #[source]
        err: RelayError,
    },

    #[error("Failed to parse output of [{command}]: {message}")]
    ParseFailure { command: String, message: String },

    #[error("[{command}] was cancelled")]
    Cancelled { command: String },
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutionError::Cancelled { .. } => ErrorKind::Cancelled,
            _ => ErrorKind::Process,
        }
    }
}

/// Wrapper for `tokio::process::Command` where the builder methods take and
/// return `self`.
pub struct Command {
    inner: tokio::process::Command,
}

impl Command {
    pub fn new(program: impl AsRef<OsStr>) -> Command {
        Command { inner: tokio::process::Command::new(program) }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Command {
        self.inner.arg(arg);
        self
    }

    pub fn args(
        mut self,
        args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    ) -> Command {
        self.inner.args(args);
        self
    }

    /// Replace the inherited environment with exactly `vars`.
    pub fn env_exact<K, V>(
        mut self,
        vars: impl IntoIterator<Item = (K, V)>,
    ) -> Command
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.inner.env_clear().envs(vars);
        self
    }

    /// Run to completion, capturing output; a non-zero exit is an error.
    pub async fn ensure_success(
        mut self,
        log: &Logger,
    ) -> Result<std::process::Output, ExecutionError> {
        let command = self.to_string();
        debug!(log, "running: {command}");
        let start = Instant::now();
        let output = self
            .inner
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| ExecutionError::ExecutionStart {
                command: command.clone(),
                err,
            })?;
        debug!(
            log,
            "process exited with {} ({:?})",
            output.status,
            start.elapsed()
        );
        if !output.status.success() {
            return Err(ExecutionError::CommandFailure(Box::new(
                CommandFailureInfo {
                    command,
                    status: output.status,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                },
            )));
        }
        Ok(output)
    }

    /// Like [`Command::ensure_success`], returning stdout as a string.
    pub async fn ensure_stdout(
        self,
        log: &Logger,
    ) -> Result<String, ExecutionError> {
        let command = self.to_string();
        let output = self.ensure_success(log).await?;
        String::from_utf8(output.stdout).map_err(|_| {
            ExecutionError::ParseFailure {
                command,
                message: "stdout was not UTF-8".to_owned(),
            }
        })
    }

    /// Run to completion, relaying every line of stdout and stderr to `panel`.
    ///
    /// The two streams are drained concurrently by separate tasks, each
    /// waiting for its line to render before reading the next one. If `cancel`
    /// fires before the process exits, the process is killed and reaped and
    /// [`ExecutionError::Cancelled`] is returned.
    ///
    /// The process is started in its own process group, so a terminal
    /// interrupt reaches only the installer, which decides what to cancel.
    pub async fn run_relayed(
        self,
        log: &Logger,
        relay: &OutputRelay,
        panel: Panel,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), ExecutionError> {
        let command = self.to_string();
        let mut inner = self.inner;

        info!(log, "running: {command}"; "panel" => panel.name());
        let start = Instant::now();
        let mut child = inner
            .kill_on_drop(true)
            .process_group(0)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| ExecutionError::ExecutionStart {
                command: command.clone(),
                err,
            })?;

        let stdout = spawn_reader(
            command.clone(),
            child.stdout.take().expect("stdout is piped"),
            relay.clone(),
            panel,
        );
        let stderr = spawn_reader(
            command.clone(),
            child.stderr.take().expect("stderr is piped"),
            relay.clone(),
            panel,
        );

        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let waited = tokio::select! {
            status = child.wait() => Some(status),
            () = cancelled => None,
        };

        let status = match waited {
            Some(status) => status.map_err(|err| ExecutionError::Wait {
                command: command.clone(),
                err,
            })?,
            None => {
                warn!(log, "cancelling: {command}");
                // kill() also waits for the process, so nothing is left
                // behind.
                if let Err(error) = child.kill().await {
                    warn!(log, "failed to kill {command}"; "error" => %error);
                }
                stdout.abort();
                stderr.abort();
                return Err(ExecutionError::Cancelled { command });
            }
        };

        info!(
            log,
            "process exited with {status} ({:?})",
            start.elapsed();
            "command" => &command,
        );

        // Bubble up any errors from the readers.
        stdout.await.expect("stdout reader panicked")?;
        stderr.await.expect("stderr reader panicked")?;

        if !status.success() {
            return Err(ExecutionError::CommandFailure(Box::new(
                CommandFailureInfo {
                    command,
                    status,
                    stdout: String::new(),
                    stderr: String::new(),
                },
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let command = self.inner.as_std();
        write!(f, "{}", command.get_program().to_string_lossy())?;
        for arg in command.get_args() {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

fn spawn_reader(
    command: String,
    reader: impl AsyncRead + Send + Unpin + 'static,
    relay: OutputRelay,
    panel: Panel,
) -> tokio::task::JoinHandle<Result<(), ExecutionError>> {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    tokio::spawn(async move {
        loop {
            buf.clear();
            // We have no control over what the child writes, so read up to a
            // newline without assuming valid UTF-8.
            let size =
                reader.read_until(b'\n', &mut buf).await.map_err(|err| {
                    ExecutionError::ReadOutput { command: command.clone(), err }
                })?;
            if size == 0 {
                return Ok(());
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);
            relay.relay(panel, line).await.map_err(|err| {
                ExecutionError::Relay { command: command.clone(), err }
            })?;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::MemorySink;
    use crate::test_helpers::test_setup_log;
    use assert_matches::assert_matches;
    use std::time::Duration;

    #[tokio::test]
    async fn relays_both_streams() {
        let logctx = test_setup_log("relays_both_streams");
        let sink = MemorySink::new();
        let (relay, render_loop) = OutputRelay::spawn(&logctx.log, sink.clone());

        Command::new("/bin/sh")
            .arg("-c")
            .arg("echo out1; echo err1 >&2; echo out2; printf 'no newline'")
            .run_relayed(&logctx.log, &relay, Panel::Install, None)
            .await
            .unwrap();

        drop(relay);
        render_loop.finish().await;
        let lines = sink.lines_for(Panel::Install);
        let stdout: Vec<_> =
            lines.iter().filter(|l| !l.starts_with("err")).collect();
        assert_eq!(stdout, ["out1", "out2", "no newline"]);
        assert!(lines.contains(&"err1".to_owned()));
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure() {
        let logctx = test_setup_log("nonzero_exit_is_a_failure");
        let (relay, _render_loop) =
            OutputRelay::spawn(&logctx.log, MemorySink::new());

        let error = Command::new("/bin/sh")
            .args(["-c", "exit 3"])
            .run_relayed(&logctx.log, &relay, Panel::Install, None)
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Process);
        assert_matches!(error, ExecutionError::CommandFailure(info) => {
            assert_eq!(info.status().code(), Some(3));
        });
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn missing_executable_fails_to_start() {
        let logctx = test_setup_log("missing_executable_fails_to_start");
        let (relay, _render_loop) =
            OutputRelay::spawn(&logctx.log, MemorySink::new());
        let error = Command::new("/nonexistent/installer-test-binary")
            .run_relayed(&logctx.log, &relay, Panel::Install, None)
            .await
            .unwrap_err();
        assert_matches!(error, ExecutionError::ExecutionStart { .. });
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn cancellation_kills_the_process() {
        let logctx = test_setup_log("cancellation_kills_the_process");
        let (relay, _render_loop) =
            OutputRelay::spawn(&logctx.log, MemorySink::new());
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                token.cancel();
            })
        };

        let start = Instant::now();
        let error = Command::new("/bin/sh")
            .args(["-c", "echo rebooting; sleep 30"])
            .run_relayed(&logctx.log, &relay, Panel::Install, Some(&token))
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert_matches!(error, ExecutionError::Cancelled { .. });
        assert_eq!(error.kind(), ErrorKind::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(10));
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn ensure_stdout_captures_output() {
        let logctx = test_setup_log("ensure_stdout_captures_output");
        let out = Command::new("/bin/sh")
            .args(["-c", "echo 64424509440"])
            .ensure_stdout(&logctx.log)
            .await
            .unwrap();
        assert_eq!(out.trim(), "64424509440");

        let error = Command::new("/bin/sh")
            .args(["-c", "echo oops >&2; exit 1"])
            .ensure_stdout(&logctx.log)
            .await
            .unwrap_err();
        assert!(error.to_string().contains("oops"), "{error}");
        logctx.cleanup_successful();
    }
}
