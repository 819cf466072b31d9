//! Languages, lifecycle statuses and the observable per-runtime state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Languages accepted by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Language {
    Python,
    R,
    /// Evaluated directly, without a sandbox or a lifecycle
    JavaScript,
}

impl Language {
    /// Languages backed by a long-lived sandbox with its own [`RuntimeState`]
    pub const SANDBOXED: [Language; 2] = [Language::Python, Language::R];

    /// Whether this language runs inside a managed sandbox
    pub fn is_sandboxed(self) -> bool {
        matches!(self, Language::Python | Language::R)
    }

    /// Lowercase wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::R => "r",
            Language::JavaScript => "javascript",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::Python => "Python",
            Language::R => "R",
            Language::JavaScript => "JavaScript",
        };
        f.write_str(name)
    }
}

/// Returned when a language name is not recognised
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported language: {0}")]
pub struct UnsupportedLanguage(pub String);

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "py" | "python3" => Ok(Language::Python),
            "r" => Ok(Language::R),
            "javascript" | "js" => Ok(Language::JavaScript),
            _ => Err(UnsupportedLanguage(s.to_string())),
        }
    }
}

impl TryFrom<String> for Language {
    type Error = UnsupportedLanguage;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Lifecycle status of one sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    #[default]
    Uninitialized,
    Loading,
    /// Second bring-up phase, only used by R
    Initializing,
    Ready,
    Executing,
    Error,
}

impl RuntimeStatus {
    /// A load is in flight
    pub fn is_loading(self) -> bool {
        matches!(self, RuntimeStatus::Loading | RuntimeStatus::Initializing)
    }

    /// The sandbox has a live instance
    pub fn is_loaded(self) -> bool {
        matches!(self, RuntimeStatus::Ready | RuntimeStatus::Executing)
    }
}

impl fmt::Display for RuntimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeStatus::Uninitialized => "uninitialized",
            RuntimeStatus::Loading => "loading",
            RuntimeStatus::Initializing => "initializing",
            RuntimeStatus::Ready => "ready",
            RuntimeStatus::Executing => "executing",
            RuntimeStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Observable state of one sandbox.
///
/// The live interpreter handle is owned by the orchestrator and never appears here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeState {
    pub status: RuntimeStatus,
    /// Message of the last load failure, cleared when a new load starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl RuntimeState {
    pub fn new() -> Self {
        Self {
            status: RuntimeStatus::Uninitialized,
            last_error: None,
            changed_at: Utc::now(),
        }
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new()
    }
}

/// Both sandbox states at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimesSnapshot {
    pub python: RuntimeState,
    pub r: RuntimeState,
}

impl RuntimesSnapshot {
    pub fn get(&self, language: Language) -> Option<&RuntimeState> {
        match language {
            Language::Python => Some(&self.python),
            Language::R => Some(&self.r),
            Language::JavaScript => None,
        }
    }
}
