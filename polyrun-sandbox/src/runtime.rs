//! Sandbox traits and backend implementations

#[cfg(feature = "process")]
mod javascript;
#[cfg(feature = "process")]
mod python;
#[cfg(feature = "process")]
mod r;
#[cfg(feature = "v8")]
mod v8;
#[cfg(feature = "process")]
mod worker;

use crate::Result;
use async_trait::async_trait;
use polyrun_common::PlotImage;
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;

#[cfg(feature = "process")]
pub use javascript::NodeEvaluator;
#[cfg(feature = "process")]
pub use python::{NativePython, NativePythonProvider};
#[cfg(feature = "process")]
pub use r::{NativeR, NativeRProvider};
#[cfg(feature = "v8")]
pub use v8::V8Evaluator;

/// Receives one line of interpreter output, without its trailing newline
pub type OutputSink = mpsc::UnboundedSender<String>;

/// Starts Python sandboxes
#[async_trait]
pub trait PythonProvider: Send + Sync {
    /// Bring up a fresh interpreter. Expensive and not cancellable.
    async fn load(&self) -> Result<Box<dyn PythonSandbox>>;

    fn name(&self) -> &str;
}

/// A live Python interpreter with its own filesystem
#[async_trait]
pub trait PythonSandbox: Send + Sync {
    fn version(&self) -> &str;

    /// Redirect stdout lines, `None` restores the default
    fn set_stdout(&mut self, sink: Option<OutputSink>);

    /// Redirect stderr lines, `None` restores the default
    fn set_stderr(&mut self, sink: Option<OutputSink>);

    /// Make a package available for import
    async fn load_package(&mut self, name: &str) -> Result<()>;

    async fn import_module(&mut self, name: &str) -> Result<()>;

    /// Run code; the value of a trailing expression is returned, `Null` otherwise
    async fn run_async(&mut self, code: &str) -> Result<Value>;

    async fn install_packages(&mut self, packages: &[String]) -> Result<()>;

    async fn read_file(&self, name: &str) -> std::io::Result<Vec<u8>>;
}

/// Creates R sandboxes; initialization happens separately through [`RSandbox::init`]
pub trait RProvider: Send + Sync {
    fn create(&self) -> Result<Box<dyn RSandbox>>;

    fn name(&self) -> &str;
}

/// Identifies an isolation scope inside an R sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShelterId(pub u64);

impl fmt::Display for ShelterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: StreamKind,
    pub data: String,
}

impl OutputLine {
    pub fn stdout(data: impl Into<String>) -> Self {
        Self {
            stream: StreamKind::Stdout,
            data: data.into(),
        }
    }

    pub fn stderr(data: impl Into<String>) -> Self {
        Self {
            stream: StreamKind::Stderr,
            data: data.into(),
        }
    }
}

/// R value produced by a capture, described without deep conversion
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RObject {
    /// Nothing was evaluated
    #[default]
    Null,
    /// Plain atomic vector (including `NULL`) converted element-wise
    Vector { r_type: String, values: Vec<Value> },
    /// Anything with a class, a closure or an environment
    Opaque { class: String },
    /// Conversion to a plain array failed
    Unconvertible { reason: String },
}

/// Everything one capture produced
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RCapture {
    pub output: Vec<OutputLine>,
    pub result: RObject,
    pub images: Vec<PlotImage>,
}

impl RCapture {
    pub fn lines(&self, stream: StreamKind) -> impl Iterator<Item = &str> {
        self.output
            .iter()
            .filter(move |line| line.stream == stream)
            .map(|line| line.data.as_str())
    }
}

/// A live R interpreter with its own filesystem
#[async_trait]
pub trait RSandbox: Send + Sync {
    /// Second bring-up phase: start the interpreter
    async fn init(&mut self) -> Result<()>;

    async fn create_shelter(&mut self) -> Result<ShelterId>;

    /// Evaluate code in the global environment, capturing streams and plots.
    /// Objects created for the result are owned by `shelter`.
    async fn capture_r(&mut self, shelter: ShelterId, code: &str) -> Result<RCapture>;

    /// Release everything owned by `shelter`
    async fn purge_shelter(&mut self, shelter: ShelterId) -> Result<()>;

    /// Queue a purge for a shelter that could not be released in place.
    /// Flushed before the next command.
    fn defer_purge(&mut self, shelter: ShelterId);

    async fn install_packages(&mut self, packages: &[String]) -> Result<()>;

    async fn read_file(&self, name: &str) -> std::io::Result<Vec<u8>>;
}

/// Failure thrown by evaluated JavaScript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsError {
    pub message: String,
    pub stack: Option<String>,
}

impl JsError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }
}

impl fmt::Display for JsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Evaluates JavaScript directly, without sandboxing or output capture
#[async_trait]
pub trait JsEvaluator: Send + Sync {
    async fn evaluate(&self, code: &str) -> std::result::Result<Value, JsError>;

    fn name(&self) -> &str;
}
