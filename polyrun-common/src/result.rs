//! Execution requests and the uniform execution result

use crate::types::Language;
use serde::{Deserialize, Serialize};

/// Placeholder reported as stdout for JavaScript, which has no output capture
pub const JAVASCRIPT_STDOUT_PLACEHOLDER: &str =
    "[JavaScript execution via eval - stdout not captured]";

/// Request to execute a snippet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub language: Language,
    pub code: String,
}

impl ExecutionRequest {
    pub fn new(language: Language, code: impl Into<String>) -> Self {
        Self {
            language,
            code: code.into(),
        }
    }
}

/// Raster image captured from a graphics device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlotImage {
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl PlotImage {
    pub fn png(data: Vec<u8>) -> Self {
        Self {
            mime_type: "image/png".to_string(),
            data,
        }
    }
}

/// Uniform result of every execution.
///
/// Return-value classification fills at most one of `return_value`,
/// `plot_image_base64` and `generated_filename`. `plot_image` comes from R's
/// separate image channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// First image captured by R's graphics device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plot_image: Option<PlotImage>,
    /// Base64 PNG returned as the final Python expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plot_image_base64: Option<String>,
    /// File written to the sandbox filesystem, fetchable with `read_file`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_filename: Option<String>,
}

impl ExecutionResult {
    /// Result for a call that was refused before touching the interpreter
    pub fn rejected(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            stderr: format!("Error: {}", message),
            error: Some(message),
            ..Default::default()
        }
    }

    /// Check if execution succeeded
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    /// Whether the result references an image or a downloadable file
    pub fn has_artifact(&self) -> bool {
        self.plot_image.is_some()
            || self.plot_image_base64.is_some()
            || self.generated_filename.is_some()
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
