//! Python sandbox backed by a persistent `python3` worker

use super::worker::{probe, WorkerProcess};
use super::{OutputSink, PythonProvider, PythonSandbox, StreamKind};
use crate::config::PythonConfig;
use crate::error::{Result, SandboxError};
use crate::vfs::Vfs;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::TempDir;

const DRIVER: &str = include_str!("python_driver.py");

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum DriverRequest<'a> {
    Run { code: &'a str },
    LoadPackage { name: &'a str },
    Import { name: &'a str },
    Install { packages: &'a [String] },
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DriverMessage {
    Ready { version: String },
    Stdout { data: String },
    Stderr { data: String },
    Result {
        #[serde(default)]
        value: Value,
    },
    #[serde(rename = "ok")]
    Done,
    Error { message: String },
}

/// Where worker output goes while a reply is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Forward {
    Sinks,
    Trace,
}

/// Starts one `python3` worker per load
pub struct NativePythonProvider {
    config: PythonConfig,
}

impl NativePythonProvider {
    pub fn new(config: PythonConfig) -> Self {
        Self { config }
    }

    /// Whether the configured interpreter can be started
    pub async fn is_available(&self) -> bool {
        probe(&self.config.interpreter).await
    }
}

#[async_trait]
impl PythonProvider for NativePythonProvider {
    async fn load(&self) -> Result<Box<dyn PythonSandbox>> {
        let vfs = Vfs::new("polyrun-python-")?;
        let site = tempfile::Builder::new().prefix("polyrun-site-").tempdir()?;

        let mut envs = vec![(
            "POLYRUN_SITE_DIR",
            site.path().to_string_lossy().into_owned(),
        )];
        if let Some(index_url) = &self.config.index_url {
            envs.push(("POLYRUN_INDEX_URL", index_url.clone()));
        }

        let mut worker = WorkerProcess::spawn(
            &self.config.interpreter,
            &["-u", "-c", DRIVER],
            vfs.root(),
            &envs,
        )?;

        let handshake = worker.next_line().await?;
        let version = match serde_json::from_str::<DriverMessage>(&handshake) {
            Ok(DriverMessage::Ready { version }) => version,
            _ => {
                return Err(SandboxError::Protocol(format!(
                    "unexpected handshake from {}: {}",
                    self.config.interpreter, handshake
                )))
            }
        };

        tracing::debug!(%version, vfs = %vfs.root().display(), "Python worker ready");

        Ok(Box::new(NativePython {
            worker,
            vfs,
            _site: site,
            version,
            stdout: None,
            stderr: None,
            in_flight: false,
        }))
    }

    fn name(&self) -> &str {
        "python3"
    }
}

/// Live `python3` worker with its own working directory
pub struct NativePython {
    worker: WorkerProcess,
    vfs: Vfs,
    _site: TempDir,
    version: String,
    stdout: Option<OutputSink>,
    stderr: Option<OutputSink>,
    /// A request was sent and its reply not yet consumed
    in_flight: bool,
}

impl NativePython {
    async fn call(&mut self, request: DriverRequest<'_>) -> Result<Value> {
        if self.in_flight {
            self.resync().await?;
        }

        let line = serde_json::to_string(&request)?;
        self.worker.send_line(&line).await?;
        self.in_flight = true;
        let reply = self.reply(Forward::Sinks).await;
        if reply.is_ok() || matches!(reply, Err(SandboxError::Interpreter(_))) {
            self.in_flight = false;
        }
        reply
    }

    /// Discard the reply of a request whose caller went away, output
    /// included: the installed sinks belong to the current caller
    async fn resync(&mut self) -> Result<()> {
        tracing::debug!("Discarding reply of an abandoned Python request");
        match self.reply(Forward::Trace).await {
            Ok(_) | Err(SandboxError::Interpreter(_)) => {
                self.in_flight = false;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn reply(&mut self, forward: Forward) -> Result<Value> {
        loop {
            let line = self.worker.next_line().await?;
            let message = match serde_json::from_str::<DriverMessage>(&line) {
                Ok(message) => message,
                Err(_) => {
                    self.emit(forward, StreamKind::Stdout, line);
                    continue;
                }
            };

            match message {
                DriverMessage::Stdout { data } => self.emit(forward, StreamKind::Stdout, data),
                DriverMessage::Stderr { data } => self.emit(forward, StreamKind::Stderr, data),
                DriverMessage::Result { value } => return Ok(value),
                DriverMessage::Done => return Ok(Value::Null),
                DriverMessage::Error { message } => return Err(SandboxError::Interpreter(message)),
                DriverMessage::Ready { .. } => {
                    return Err(SandboxError::Protocol("unexpected ready message".to_string()))
                }
            }
        }
    }

    fn emit(&self, forward: Forward, stream: StreamKind, data: String) {
        let sink = match (forward, stream) {
            (Forward::Trace, _) => None,
            (Forward::Sinks, StreamKind::Stdout) => self.stdout.as_ref(),
            (Forward::Sinks, StreamKind::Stderr) => self.stderr.as_ref(),
        };
        match sink {
            Some(sink) => {
                let _ = sink.send(data);
            }
            None => tracing::trace!(?stream, "{}", data),
        }
    }
}

#[async_trait]
impl PythonSandbox for NativePython {
    fn version(&self) -> &str {
        &self.version
    }

    fn set_stdout(&mut self, sink: Option<OutputSink>) {
        self.stdout = sink;
    }

    fn set_stderr(&mut self, sink: Option<OutputSink>) {
        self.stderr = sink;
    }

    async fn load_package(&mut self, name: &str) -> Result<()> {
        self.call(DriverRequest::LoadPackage { name }).await.map(|_| ())
    }

    async fn import_module(&mut self, name: &str) -> Result<()> {
        self.call(DriverRequest::Import { name }).await.map(|_| ())
    }

    async fn run_async(&mut self, code: &str) -> Result<Value> {
        self.call(DriverRequest::Run { code }).await
    }

    async fn install_packages(&mut self, packages: &[String]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        self.call(DriverRequest::Install { packages }).await.map(|_| ())
    }

    async fn read_file(&self, name: &str) -> std::io::Result<Vec<u8>> {
        self.vfs.read(name).await
    }
}
