//! Per-language execution against a leased sandbox

use crate::error::SandboxError;
use crate::normalize::{classify_python, classify_r};
use crate::runtime::{JsEvaluator, OutputSink, PythonSandbox, RSandbox, StreamKind};
use crate::shelter::Shelter;
use crate::slot::RuntimeSlot;
use polyrun_common::{ExecutionResult, Language, JAVASCRIPT_STDOUT_PLACEHOLDER};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Unique execution identifier, used to correlate log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub uuid::Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) async fn execute_python(
    slot: &RuntimeSlot<dyn PythonSandbox>,
    code: &str,
) -> ExecutionResult {
    let id = ExecutionId::new();
    let mut sandbox = match slot.lease().await {
        Ok(lease) => lease,
        Err(e) => return rejected(id, Language::Python, e),
    };
    tracing::info!(execution_id = %id, language = "python", code_len = code.len(), "Executing code");

    let (stdout_tx, mut stdout_rx) = mpsc::unbounded_channel();
    let (stderr_tx, mut stderr_rx) = mpsc::unbounded_channel();
    let outcome = {
        let mut redirect = Redirect::install(&mut *sandbox, stdout_tx, stderr_tx);
        redirect.run(code).await
    };
    drop(sandbox);

    let mut result = ExecutionResult::default();
    while let Ok(line) = stdout_rx.try_recv() {
        result.stdout.push_str(&line);
        result.stdout.push('\n');
    }
    while let Ok(line) = stderr_rx.try_recv() {
        result.stderr.push_str(&line);
        result.stderr.push('\n');
    }

    match outcome {
        Ok(value) => classify_python(value).apply_to(&mut result),
        Err(e) => {
            let message = e.to_string();
            tracing::debug!(execution_id = %id, error = %message, "Python execution failed");
            result.stderr.push_str(&format!("Python Execution Error: {}\n", message));
            result.error = Some(message);
            retire_if_dead(slot, &e).await;
        }
    }

    tracing::info!(execution_id = %id, success = result.success(), "Execution completed");
    result
}

pub(crate) async fn execute_r(slot: &RuntimeSlot<dyn RSandbox>, code: &str) -> ExecutionResult {
    let id = ExecutionId::new();
    let mut sandbox = match slot.lease().await {
        Ok(lease) => lease,
        Err(e) => return rejected(id, Language::R, e),
    };
    tracing::info!(execution_id = %id, language = "r", code_len = code.len(), "Executing code");

    let mut result = ExecutionResult::default();
    let mut fault = None;

    match Shelter::acquire(&mut *sandbox).await {
        Ok(mut shelter) => {
            match shelter.capture(code).await {
                Ok(capture) => {
                    result.stdout = join_lines(capture.lines(StreamKind::Stdout));
                    result.stderr = join_lines(capture.lines(StreamKind::Stderr));

                    let (classified, conversion_error) = classify_r(capture.result);
                    if let Some(reason) = conversion_error {
                        result.stderr.push_str(&format!("Conversion Error: {}\n", reason));
                    }
                    classified.apply_to(&mut result);
                    result.plot_image = capture.images.into_iter().next();
                }
                Err(e) => {
                    append_line(&mut result.stderr, &format!("Execution Error: {}", e));
                    result.error = Some(e.to_string());
                    fault = Some(e);
                }
            }

            let shelter_id = shelter.id();
            if let Err(e) = shelter.release().await {
                tracing::warn!(execution_id = %id, shelter = %shelter_id, error = %e, "Shelter purge failed");
                append_line(&mut result.stderr, &format!("Purge Error: {}", e));
                if fault.is_none() && is_fatal(&e) {
                    fault = Some(e);
                }
            }
        }
        Err(e) => {
            append_line(&mut result.stderr, &format!("Execution Error: {}", e));
            result.error = Some(e.to_string());
            fault = Some(e);
        }
    }
    drop(sandbox);

    if let Some(e) = fault {
        retire_if_dead(slot, &e).await;
    }

    tracing::info!(execution_id = %id, success = result.success(), "Execution completed");
    result
}

pub(crate) async fn execute_javascript(evaluator: &dyn JsEvaluator, code: &str) -> ExecutionResult {
    let id = ExecutionId::new();
    tracing::info!(
        execution_id = %id,
        language = "javascript",
        evaluator = evaluator.name(),
        code_len = code.len(),
        "Executing code"
    );

    let mut result = ExecutionResult::default();
    match evaluator.evaluate(code).await {
        Ok(value) => {
            result.stdout = JAVASCRIPT_STDOUT_PLACEHOLDER.to_string();
            if !value.is_null() {
                result.return_value = Some(value);
            }
        }
        Err(e) => {
            result.stderr = e.stack.clone().unwrap_or_default();
            result.error = Some(e.message);
        }
    }

    tracing::info!(execution_id = %id, success = result.success(), "Execution completed");
    result
}

/// Output sinks installed on a Python sandbox for one execution. Removed on
/// drop, so a cancelled execution leaves nothing behind for the next one.
struct Redirect<'a> {
    sandbox: &'a mut dyn PythonSandbox,
}

impl<'a> Redirect<'a> {
    fn install(
        sandbox: &'a mut dyn PythonSandbox,
        stdout: OutputSink,
        stderr: OutputSink,
    ) -> Self {
        sandbox.set_stdout(Some(stdout));
        sandbox.set_stderr(Some(stderr));
        Self { sandbox }
    }

    async fn run(&mut self, code: &str) -> crate::error::Result<Value> {
        self.sandbox.run_async(code).await
    }
}

impl Drop for Redirect<'_> {
    fn drop(&mut self) {
        self.sandbox.set_stdout(None);
        self.sandbox.set_stderr(None);
    }
}

fn rejected(id: ExecutionId, language: Language, error: SandboxError) -> ExecutionResult {
    tracing::warn!(execution_id = %id, %language, error = %error, "Execution rejected");
    ExecutionResult::rejected(error.to_string())
}

/// A sandbox whose interpreter exited cannot run anything else; move the
/// slot to `error` so the next load starts a fresh one.
pub(crate) async fn retire_if_dead<S: ?Sized>(slot: &RuntimeSlot<S>, error: &SandboxError) {
    if is_fatal(error) {
        tracing::error!(language = %slot.language(), error = %error, "Sandbox terminated");
        slot.fail(error.to_string());
        slot.clear().await;
    }
}

fn is_fatal(error: &SandboxError) -> bool {
    matches!(error, SandboxError::Terminated(_))
}

fn join_lines<'a>(lines: impl Iterator<Item = &'a str>) -> String {
    lines.collect::<Vec<_>>().join("\n")
}

/// Append a message on its own line
fn append_line(buffer: &mut String, message: &str) {
    if !buffer.is_empty() && !buffer.ends_with('\n') {
        buffer.push('\n');
    }
    buffer.push_str(message);
}
