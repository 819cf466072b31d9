use polyrun_common::Language;
use thiserror::Error;

/// Faults raised by sandbox backends and orchestrator preconditions
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Raised by the interpreter while running user code
    #[error("{0}")]
    Interpreter(String),

    #[error("Sandbox protocol error: {0}")]
    Protocol(String),

    #[error("Sandbox process terminated: {0}")]
    Terminated(String),

    #[error("{0} runtime not ready.")]
    NotReady(Language),

    #[error("{0} runtime is busy.")]
    Busy(Language),

    #[error("{0} instance is missing.")]
    MissingInstance(Language),

    #[error("Operation not supported for {0}")]
    Unsupported(Language),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;

/// Load failure shared by every caller awaiting the same bring-up
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("{language} runtime failed to load: {message}")]
    Bootstrap { language: Language, message: String },

    /// The mandatory package-installer step failed
    #[error("Failed to initialize {module}: {message}")]
    Installer { module: String, message: String },
}

impl LoadError {
    pub fn bootstrap(language: Language, cause: impl std::fmt::Display) -> Self {
        LoadError::Bootstrap {
            language,
            message: cause.to_string(),
        }
    }
}
