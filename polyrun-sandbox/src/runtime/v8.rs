//! JavaScript evaluation in an embedded V8 isolate using deno_core

use super::{JsError, JsEvaluator};
use async_trait::async_trait;
use serde_json::Value;

/// Evaluates each snippet in a fresh isolate on the blocking pool
pub struct V8Evaluator {
    /// Optional snapshot for fast startup
    snapshot: Option<&'static [u8]>,
}

impl V8Evaluator {
    pub fn new() -> Self {
        Self { snapshot: None }
    }

    /// The snapshot vec is leaked to get 'static lifetime
    pub fn with_snapshot(snapshot: Vec<u8>) -> Self {
        let snapshot_static: &'static [u8] = Box::leak(snapshot.into_boxed_slice());
        Self {
            snapshot: Some(snapshot_static),
        }
    }
}

impl Default for V8Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JsEvaluator for V8Evaluator {
    async fn evaluate(&self, code: &str) -> Result<Value, JsError> {
        use deno_core::{v8, JsRuntime, RuntimeOptions};

        let code = code.to_string();
        let snapshot = self.snapshot;

        let task = tokio::task::spawn_blocking(move || {
            let options = RuntimeOptions {
                startup_snapshot: snapshot,
                ..Default::default()
            };
            let mut runtime = JsRuntime::new(options);

            let global = runtime.execute_script("<eval>", code).map_err(|e| {
                let stack = e.to_string();
                let message = stack.lines().next().unwrap_or_default().to_string();
                JsError {
                    message,
                    stack: Some(stack),
                }
            })?;

            let scope = &mut runtime.handle_scope();
            let local = v8::Local::new(scope, global);
            if local.is_undefined() || local.is_null() {
                return Ok(Value::Null);
            }
            match deno_core::serde_v8::from_v8::<Value>(scope, local) {
                Ok(value) => Ok(value),
                Err(_) => Ok(Value::String(local.to_rust_string_lossy(scope))),
            }
        });

        task.await
            .map_err(|e| JsError::new(format!("Task panicked: {}", e)))?
    }

    fn name(&self) -> &str {
        "v8"
    }
}
