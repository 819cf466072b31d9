//! R sandbox backed by a persistent `Rscript` worker
//!
//! Commands are single lines on the worker's stdin. Code, captured streams,
//! result descriptions and plots are exchanged as files in a private control
//! directory, so user output never mixes with protocol replies.

use super::worker::{probe, WorkerProcess};
use super::{OutputLine, RCapture, RObject, RProvider, RSandbox, ShelterId};
use crate::config::RConfig;
use crate::error::{Result, SandboxError};
use crate::vfs::Vfs;
use async_trait::async_trait;
use polyrun_common::PlotImage;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const DRIVER: &str = include_str!("r_driver.R");
const REPLY_PREFIX: &str = "@@polyrun ";
const VALUE_SEPARATOR: char = '\u{1f}';
const NA_MARKER: &str = "\u{1e}";

/// Creates `Rscript` workers; the process starts in [`RSandbox::init`]
pub struct NativeRProvider {
    config: RConfig,
}

impl NativeRProvider {
    pub fn new(config: RConfig) -> Self {
        Self { config }
    }

    /// Whether the configured `Rscript` can be started
    pub async fn is_available(&self) -> bool {
        probe(&self.config.rscript).await
    }
}

impl RProvider for NativeRProvider {
    fn create(&self) -> Result<Box<dyn RSandbox>> {
        Ok(Box::new(NativeR::new(self.config.clone())?))
    }

    fn name(&self) -> &str {
        "Rscript"
    }
}

/// Live `Rscript` worker with its own working directory
pub struct NativeR {
    config: RConfig,
    vfs: Vfs,
    control: TempDir,
    worker: Option<WorkerProcess>,
    version: Option<String>,
    next_shelter: u64,
    deferred: Vec<ShelterId>,
    /// A command was sent and its reply not yet consumed
    in_flight: bool,
}

impl NativeR {
    pub fn new(config: RConfig) -> Result<Self> {
        Ok(Self {
            config,
            vfs: Vfs::new("polyrun-r-")?,
            control: tempfile::Builder::new().prefix("polyrun-r-ctl-").tempdir()?,
            worker: None,
            version: None,
            next_shelter: 1,
            deferred: Vec::new(),
            in_flight: false,
        })
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    fn control_path(&self, name: &str) -> PathBuf {
        self.control.path().join(name)
    }

    fn worker(&mut self) -> Result<&mut WorkerProcess> {
        self.worker
            .as_mut()
            .ok_or_else(|| SandboxError::Protocol("R interpreter is not initialized".to_string()))
    }

    /// Send a command after purging shelters that were dropped unreleased
    async fn command(&mut self, line: &str) -> Result<()> {
        if self.in_flight {
            tracing::debug!("Discarding reply of an abandoned R command");
            self.reply().await.or_else(ignore_interpreter_error)?;
        }

        for shelter in std::mem::take(&mut self.deferred) {
            if let Err(e) = self.raw_command(&format!("PURGE {}", shelter)).await {
                tracing::warn!(%shelter, error = %e, "Deferred shelter purge failed");
                if matches!(e, SandboxError::Terminated(_)) {
                    return Err(e);
                }
            }
        }

        self.raw_command(line).await
    }

    async fn raw_command(&mut self, line: &str) -> Result<()> {
        self.worker()?.send_line(line).await?;
        self.in_flight = true;
        self.reply().await
    }

    async fn reply(&mut self) -> Result<()> {
        loop {
            let line = self.worker()?.next_line().await?;
            let Some(status) = line.strip_prefix(REPLY_PREFIX) else {
                tracing::trace!("{}", line);
                continue;
            };

            self.in_flight = false;
            return match status {
                "OK" => Ok(()),
                "ERR" => Err(SandboxError::Interpreter(self.read_error().await)),
                other => Err(SandboxError::Protocol(format!("unexpected reply: {}", other))),
            };
        }
    }

    async fn read_error(&self) -> String {
        match tokio::fs::read_to_string(self.control_path("error.txt")).await {
            Ok(text) => text.trim_end().to_string(),
            Err(e) => format!("R reported an error that could not be read: {}", e),
        }
    }

    async fn read_lines(&self, name: &str) -> Result<Vec<String>> {
        let text = read_optional(&self.control_path(name)).await?;
        Ok(split_lines(&String::from_utf8_lossy(&text)))
    }

    async fn read_result(&self) -> Result<RObject> {
        let fields = self.read_lines("result.txt").await?;
        let values = read_optional(&self.control_path("values.bin")).await?;
        let reason = read_optional(&self.control_path("reason.txt")).await?;
        Ok(parse_object(
            &fields,
            &String::from_utf8_lossy(&values),
            String::from_utf8_lossy(&reason).trim_end(),
        ))
    }

    async fn read_plots(&self, shelter: ShelterId) -> Result<Vec<PlotImage>> {
        let prefix = format!("plot-{}-", shelter);
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(self.control.path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) && name.ends_with(".png") {
                names.push(name);
            }
        }
        names.sort();

        let mut images = Vec::with_capacity(names.len());
        for name in names {
            images.push(PlotImage::png(tokio::fs::read(self.control_path(&name)).await?));
        }
        Ok(images)
    }
}

#[async_trait]
impl RSandbox for NativeR {
    async fn init(&mut self) -> Result<()> {
        let driver = self.control_path("driver.R");
        tokio::fs::write(&driver, DRIVER).await?;
        let driver = driver.to_string_lossy().into_owned();

        let envs = [
            (
                "POLYRUN_CONTROL_DIR",
                self.control.path().to_string_lossy().into_owned(),
            ),
            ("POLYRUN_REPO_URL", self.config.repo_url.clone()),
            ("POLYRUN_PLOT_WIDTH", self.config.plot_width.to_string()),
            ("POLYRUN_PLOT_HEIGHT", self.config.plot_height.to_string()),
        ];

        let mut worker = WorkerProcess::spawn(
            &self.config.rscript,
            &["--vanilla", &driver],
            self.vfs.root(),
            &envs,
        )?;

        let version = loop {
            let line = worker.next_line().await?;
            if let Some(version) = line
                .strip_prefix(REPLY_PREFIX)
                .and_then(|status| status.strip_prefix("READY "))
            {
                break version.to_string();
            }
        };

        tracing::debug!(%version, vfs = %self.vfs.root().display(), "R worker ready");
        self.version = Some(version);
        self.worker = Some(worker);
        Ok(())
    }

    async fn create_shelter(&mut self) -> Result<ShelterId> {
        let shelter = ShelterId(self.next_shelter);
        self.next_shelter += 1;
        self.command(&format!("SHELTER {}", shelter)).await?;
        Ok(shelter)
    }

    async fn capture_r(&mut self, shelter: ShelterId, code: &str) -> Result<RCapture> {
        tokio::fs::write(self.control_path("code.R"), code).await?;
        self.command(&format!("CAPTURE {}", shelter)).await?;

        let mut output: Vec<OutputLine> = self
            .read_lines("stdout.txt")
            .await?
            .into_iter()
            .map(OutputLine::stdout)
            .collect();
        output.extend(
            self.read_lines("stderr.txt")
                .await?
                .into_iter()
                .map(OutputLine::stderr),
        );

        Ok(RCapture {
            output,
            result: self.read_result().await?,
            images: self.read_plots(shelter).await?,
        })
    }

    async fn purge_shelter(&mut self, shelter: ShelterId) -> Result<()> {
        self.command(&format!("PURGE {}", shelter)).await
    }

    fn defer_purge(&mut self, shelter: ShelterId) {
        self.deferred.push(shelter);
    }

    async fn install_packages(&mut self, packages: &[String]) -> Result<()> {
        if packages.is_empty() {
            return Ok(());
        }
        tokio::fs::write(self.control_path("packages.txt"), packages.join("\n")).await?;
        self.command("INSTALL 0").await
    }

    async fn read_file(&self, name: &str) -> std::io::Result<Vec<u8>> {
        self.vfs.read(name).await
    }
}

fn ignore_interpreter_error(error: SandboxError) -> Result<()> {
    match error {
        SandboxError::Interpreter(_) => Ok(()),
        other => Err(other),
    }
}

/// Contents of a control file, empty when the driver did not write it
async fn read_optional(path: &Path) -> Result<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(data),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

fn split_lines(text: &str) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}

/// Rebuild a result object from the driver's description: kind, type, class
/// and length, one per line
fn parse_object(fields: &[String], values: &str, reason: &str) -> RObject {
    let field = |index: usize| fields.get(index).map(String::as_str).unwrap_or("");

    match field(0) {
        "vector" => {
            let r_type = field(1).to_string();
            let length: usize = field(3).parse().unwrap_or(0);
            let values = if length == 0 {
                Vec::new()
            } else {
                values
                    .split(VALUE_SEPARATOR)
                    .map(|item| parse_value(&r_type, item))
                    .collect()
            };
            RObject::Vector { r_type, values }
        }
        "opaque" => RObject::Opaque {
            class: field(2).to_string(),
        },
        "unconvertible" => RObject::Unconvertible {
            reason: reason.to_string(),
        },
        _ => RObject::Null,
    }
}

fn parse_value(r_type: &str, item: &str) -> Value {
    if item == NA_MARKER {
        return Value::Null;
    }
    match r_type {
        "logical" => Value::Bool(item == "TRUE"),
        "integer" => item
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(item.to_string())),
        "double" => item
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(item.to_string())),
        _ => Value::String(item.to_string()),
    }
}
