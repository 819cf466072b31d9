//! Configuration for the sandbox backends

use crate::error::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolyrunConfig {
    #[serde(default)]
    pub python: PythonConfig,
    #[serde(default)]
    pub r: RConfig,
    #[serde(default)]
    pub javascript: JavaScriptConfig,
}

/// Python sandbox configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PythonConfig {
    /// Interpreter executable
    #[serde(default = "PythonConfig::default_interpreter")]
    pub interpreter: String,
    /// Package-installer module that must import before the sandbox is ready
    #[serde(default = "PythonConfig::default_installer_module")]
    pub installer_module: String,
    /// Package index used for installs (pip's default when unset)
    #[serde(default)]
    pub index_url: Option<String>,
    /// Evaluate `1+1` after bring-up and warn if it fails
    #[serde(default = "default_true")]
    pub smoke_test: bool,
}

impl PythonConfig {
    fn default_interpreter() -> String {
        "python3".to_string()
    }

    fn default_installer_module() -> String {
        "pip".to_string()
    }
}

impl Default for PythonConfig {
    fn default() -> Self {
        Self {
            interpreter: Self::default_interpreter(),
            installer_module: Self::default_installer_module(),
            index_url: None,
            smoke_test: true,
        }
    }
}

/// R sandbox configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RConfig {
    /// `Rscript` executable
    #[serde(default = "RConfig::default_rscript")]
    pub rscript: String,
    /// CRAN-style repository used for installs
    #[serde(default = "RConfig::default_repo_url")]
    pub repo_url: String,
    /// Captured plot size in pixels
    #[serde(default = "RConfig::default_plot_size")]
    pub plot_width: u32,
    #[serde(default = "RConfig::default_plot_size")]
    pub plot_height: u32,
}

impl RConfig {
    fn default_rscript() -> String {
        "Rscript".to_string()
    }

    fn default_repo_url() -> String {
        "https://cloud.r-project.org".to_string()
    }

    fn default_plot_size() -> u32 {
        504
    }
}

impl Default for RConfig {
    fn default() -> Self {
        Self {
            rscript: Self::default_rscript(),
            repo_url: Self::default_repo_url(),
            plot_width: Self::default_plot_size(),
            plot_height: Self::default_plot_size(),
        }
    }
}

/// JavaScript evaluator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JavaScriptConfig {
    /// Node.js executable used by the process evaluator
    #[serde(default = "JavaScriptConfig::default_node")]
    pub node: String,
}

impl JavaScriptConfig {
    fn default_node() -> String {
        "node".to_string()
    }
}

impl Default for JavaScriptConfig {
    fn default() -> Self {
        Self {
            node: Self::default_node(),
        }
    }
}

fn default_true() -> bool {
    true
}

impl PolyrunConfig {
    /// Load configuration from the default location, writing defaults when missing
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SandboxError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        toml::from_str(&content).map_err(|e| {
            SandboxError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Save configuration to a file, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SandboxError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| SandboxError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| SandboxError::ConfigError(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| {
            SandboxError::ConfigError("Cannot determine home directory".to_string())
        })?;

        Ok(home.join(".config").join("polyrun").join("config.toml"))
    }
}
