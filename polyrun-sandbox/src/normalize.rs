//! Classification of raw interpreter return values
//!
//! Both sandboxes overload "return a string" to mean a plain value, a plot,
//! or a file to download. Each language executor classifies its own raw value
//! into a [`Classified`] and the result is flattened into an
//! [`ExecutionResult`].

use crate::runtime::RObject;
use polyrun_common::ExecutionResult;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Shown instead of R objects, which are not deep-converted
pub const R_OBJECT_PLACEHOLDER: &str = "[RObject]";
pub const R_CONVERSION_ERROR_PLACEHOLDER: &str = "[RObject Conversion Error]";

const BASE64_PROBE_CHARS: usize = 100;

static GENERATED_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(csv|pdf|png|jpe?g|txt|pptx|xlsx)$").unwrap());

static BASE64_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+/=]+$").unwrap());

/// Classified return value
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// Name of a file written to the sandbox filesystem
    File(String),
    /// Base64-encoded image
    Image(String),
    /// Displayable value, `Null` when there is nothing to show
    Value(Value),
}

impl Classified {
    /// Write the classification into its result field
    pub fn apply_to(self, result: &mut ExecutionResult) {
        match self {
            Classified::File(name) => result.generated_filename = Some(name),
            Classified::Image(data) => result.plot_image_base64 = Some(data),
            Classified::Value(Value::Null) => {}
            Classified::Value(value) => result.return_value = Some(value),
        }
    }
}

/// Whether a string names a downloadable artifact
pub fn looks_like_generated_file(value: &str) -> bool {
    GENERATED_FILE.is_match(value)
}

/// Whether a string looks like a base64 plot: long, with a base64 prefix
pub fn looks_like_base64_image(value: &str) -> bool {
    let mut chars = value.char_indices();
    let Some((probe_end, _)) = chars.nth(BASE64_PROBE_CHARS) else {
        return false;
    };
    BASE64_PREFIX.is_match(&value[..probe_end])
}

/// Classify the value of a Python snippet's final expression
pub fn classify_python(value: Value) -> Classified {
    match value {
        Value::String(text) if looks_like_generated_file(&text) => Classified::File(text),
        Value::String(text) if looks_like_base64_image(&text) => Classified::Image(text),
        other => Classified::Value(other),
    }
}

/// Classify an R result object.
///
/// Only atomic vectors of length one are inspected for a filename. Returns
/// the conversion failure, if any, for the caller to report on stderr.
pub fn classify_r(object: RObject) -> (Classified, Option<String>) {
    match object {
        RObject::Null => (Classified::Value(Value::Null), None),
        RObject::Vector { values, .. } => match values.as_slice() {
            [Value::String(name)] if looks_like_generated_file(name) => {
                (Classified::File(name.clone()), None)
            }
            _ => (placeholder(R_OBJECT_PLACEHOLDER), None),
        },
        RObject::Opaque { .. } => (placeholder(R_OBJECT_PLACEHOLDER), None),
        RObject::Unconvertible { reason } => {
            (placeholder(R_CONVERSION_ERROR_PLACEHOLDER), Some(reason))
        }
    }
}

fn placeholder(text: &str) -> Classified {
    Classified::Value(Value::String(text.to_string()))
}
