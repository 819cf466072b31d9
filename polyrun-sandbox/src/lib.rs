//! polyrun sandbox - Multi-language code execution orchestrator
//!
//! Lazily brings up a Python and an R sandbox, runs snippets against them
//! and normalizes their output into one [`ExecutionResult`] shape.
//! JavaScript is evaluated directly without a sandbox.

mod config;
mod error;
mod executor;
mod loader;
mod normalize;
mod orchestrator;
mod runtime;
mod shelter;
mod slot;
mod vfs;

pub use config::{JavaScriptConfig, PolyrunConfig, PythonConfig, RConfig};
pub use error::{LoadError, Result, SandboxError};
pub use executor::ExecutionId;
pub use loader::LoaderOptions;
pub use normalize::{
    classify_python, classify_r, looks_like_base64_image, looks_like_generated_file, Classified,
    R_CONVERSION_ERROR_PLACEHOLDER, R_OBJECT_PLACEHOLDER,
};
pub use orchestrator::Orchestrator;
#[cfg(feature = "process")]
pub use runtime::{NativePython, NativePythonProvider, NativeR, NativeRProvider, NodeEvaluator};
pub use runtime::{
    JsError, JsEvaluator, OutputLine, OutputSink, PythonProvider, PythonSandbox, RCapture,
    RObject, RProvider, RSandbox, ShelterId, StreamKind,
};
#[cfg(feature = "v8")]
pub use runtime::V8Evaluator;
pub use shelter::Shelter;
pub use vfs::Vfs;

pub use polyrun_common::{
    ExecutionRequest, ExecutionResult, Language, PlotImage, RuntimeState, RuntimeStatus,
    RuntimesSnapshot,
};
