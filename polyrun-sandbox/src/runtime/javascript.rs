//! Direct JavaScript evaluation in a `node` child process

use super::{JsError, JsEvaluator};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const DRIVER: &str = include_str!("javascript_driver.js");
const RESULT_SENTINEL: &str = "__POLYRUN_RESULT__";

#[derive(Debug, Deserialize)]
struct Outcome {
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    stack: Option<String>,
}

/// Evaluates each snippet with indirect `eval` in a fresh `node` process.
/// Output written by the snippet is discarded.
pub struct NodeEvaluator {
    node: String,
}

impl NodeEvaluator {
    pub fn new(node: impl Into<String>) -> Self {
        Self { node: node.into() }
    }
}

impl Default for NodeEvaluator {
    fn default() -> Self {
        Self::new("node")
    }
}

#[async_trait]
impl JsEvaluator for NodeEvaluator {
    async fn evaluate(&self, code: &str) -> Result<Value, JsError> {
        let mut child = Command::new(&self.node)
            .arg("-e")
            .arg(DRIVER)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| JsError::new(format!("Failed to spawn {}: {}", self.node, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(code.as_bytes())
                .await
                .map_err(|e| JsError::new(format!("Failed to send code to {}: {}", self.node, e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| JsError::new(format!("Failed to wait for {}: {}", self.node, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(outcome) = parse_outcome(&stdout) else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(JsError {
                message: format!("{} exited without a result ({})", self.node, output.status),
                stack: (!stderr.is_empty()).then_some(stderr),
            });
        };

        if outcome.ok {
            Ok(outcome.value)
        } else {
            Err(JsError {
                message: outcome.message.unwrap_or_default(),
                stack: outcome.stack,
            })
        }
    }

    fn name(&self) -> &str {
        "node"
    }
}

fn parse_outcome(stdout: &str) -> Option<Outcome> {
    stdout
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(RESULT_SENTINEL))
        .and_then(|payload| serde_json::from_str(payload).ok())
}
