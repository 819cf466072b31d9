//! Long-lived interpreter child process speaking a line protocol

use crate::error::{Result, SandboxError};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// Interpreter process with piped stdin/stdout.
///
/// The child's stderr is not part of the protocol; it is forwarded to the
/// log. The process is killed when the worker is dropped.
pub(crate) struct WorkerProcess {
    program: String,
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl WorkerProcess {
    pub fn spawn(
        program: &str,
        args: &[&str],
        cwd: &Path,
        envs: &[(&str, String)],
    ) -> Result<Self> {
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in envs {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| SandboxError::Spawn {
            program: program.to_string(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Protocol(format!("{} stdin not captured", program)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Protocol(format!("{} stdout not captured", program)))?;

        if let Some(stderr) = child.stderr.take() {
            let name = program.to_string();
            let mut reader = BufReader::new(stderr).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = reader.next_line().await {
                    tracing::debug!(worker = %name, "{}", line);
                }
            });
        }

        tracing::debug!(program, pid = child.id(), "Worker process started");

        Ok(Self {
            program: program.to_string(),
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        let write = async {
            self.stdin.write_all(line.as_bytes()).await?;
            self.stdin.write_all(b"\n").await?;
            self.stdin.flush().await
        };
        match write.await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Err(self.terminated().await),
            Err(e) => Err(e.into()),
        }
    }

    /// Next protocol line; end of stream means the interpreter exited
    pub async fn next_line(&mut self) -> Result<String> {
        match self.stdout.next_line().await? {
            Some(line) => {
                tracing::trace!(program = %self.program, "{}", line);
                Ok(line)
            }
            None => Err(self.terminated().await),
        }
    }

    async fn terminated(&mut self) -> SandboxError {
        let status = match self.child.wait().await {
            Ok(status) => status.to_string(),
            Err(e) => e.to_string(),
        };
        SandboxError::Terminated(format!("{} exited ({})", self.program, status))
    }
}

/// Whether `program --version` runs successfully
pub(crate) async fn probe(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}
