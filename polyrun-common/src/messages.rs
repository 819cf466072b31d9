use crate::{ExecutionResult, Language, RuntimeState, RuntimesSnapshot};
use serde::{Deserialize, Serialize};

/// Request sent by a UI binding over the session protocol (one JSON object per line)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SessionRequest {
    Load {
        #[serde(default)]
        id: Option<String>,
        language: Language,
    },
    Execute {
        #[serde(default)]
        id: Option<String>,
        language: Language,
        code: String,
    },
    ReadFile {
        #[serde(default)]
        id: Option<String>,
        language: Language,
        filename: String,
    },
    Install {
        #[serde(default)]
        id: Option<String>,
        language: Language,
        packages: Vec<String>,
    },
    Status {
        #[serde(default)]
        id: Option<String>,
    },
}

impl SessionRequest {
    /// Correlation id echoed back in the response
    pub fn id(&self) -> Option<&str> {
        match self {
            SessionRequest::Load { id, .. }
            | SessionRequest::Execute { id, .. }
            | SessionRequest::ReadFile { id, .. }
            | SessionRequest::Install { id, .. }
            | SessionRequest::Status { id } => id.as_deref(),
        }
    }
}

/// Response or event written back to the UI binding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionResponse {
    Loaded {
        id: Option<String>,
        language: Language,
        state: RuntimeState,
    },
    Result {
        id: Option<String>,
        language: Language,
        result: ExecutionResult,
    },
    File {
        id: Option<String>,
        language: Language,
        filename: String,
        /// Base64 file contents, `null` when the file is unavailable
        data: Option<String>,
    },
    Installed {
        id: Option<String>,
        language: Language,
        packages: Vec<String>,
    },
    Status {
        id: Option<String>,
        runtimes: RuntimesSnapshot,
    },
    /// Unsolicited: a sandbox changed status
    StateChanged {
        language: Language,
        state: RuntimeState,
    },
    Error {
        id: Option<String>,
        message: String,
    },
}
