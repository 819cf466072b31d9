//! Sandbox bring-up
//!
//! The orchestrator decides *whether* to load and deduplicates concurrent
//! callers. The functions here perform one bring-up and record its outcome
//! on the slot.

use crate::config::PythonConfig;
use crate::error::{LoadError, SandboxError};
use crate::runtime::{PythonProvider, PythonSandbox, RProvider, RSandbox};
use crate::slot::RuntimeSlot;
use polyrun_common::{Language, RuntimeStatus};

/// Knobs for the Python bring-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderOptions {
    /// Package-installer module that must load and import before `ready`
    pub installer_module: String,
    /// Evaluate `1+1` once the installer imported
    pub smoke_test: bool,
}

impl From<&PythonConfig> for LoaderOptions {
    fn from(config: &PythonConfig) -> Self {
        Self {
            installer_module: config.installer_module.clone(),
            smoke_test: config.smoke_test,
        }
    }
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            installer_module: "pip".to_string(),
            smoke_test: true,
        }
    }
}

pub(crate) async fn load_python(
    slot: &RuntimeSlot<dyn PythonSandbox>,
    provider: &dyn PythonProvider,
    options: &LoaderOptions,
) -> Result<(), LoadError> {
    tracing::info!(language = %Language::Python, provider = provider.name(), "Loading runtime");

    match bring_up_python(provider, options).await {
        Ok(sandbox) => {
            tracing::info!(
                language = %Language::Python,
                version = sandbox.version(),
                "Runtime ready"
            );
            slot.install(sandbox).await;
            Ok(())
        }
        Err(e) => {
            record_failure(slot, &e).await;
            Err(e)
        }
    }
}

async fn bring_up_python(
    provider: &dyn PythonProvider,
    options: &LoaderOptions,
) -> Result<Box<dyn PythonSandbox>, LoadError> {
    let mut sandbox = provider
        .load()
        .await
        .map_err(|e| LoadError::bootstrap(Language::Python, e))?;

    let module = options.installer_module.as_str();
    let installer = async {
        sandbox.load_package(module).await?;
        sandbox.import_module(module).await
    };
    installer.await.map_err(|e| LoadError::Installer {
        module: module.to_string(),
        message: e.to_string(),
    })?;
    tracing::debug!(module, "Package installer imported");

    if options.smoke_test {
        match sandbox.run_async("1+1").await {
            Ok(value) => tracing::debug!(%value, "Smoke test passed"),
            Err(e) => tracing::warn!(error = %e, "Python smoke test failed"),
        }
    }

    Ok(sandbox)
}

pub(crate) async fn load_r(
    slot: &RuntimeSlot<dyn RSandbox>,
    provider: &dyn RProvider,
) -> Result<(), LoadError> {
    tracing::info!(language = %Language::R, provider = provider.name(), "Loading runtime");

    let outcome = async {
        let mut sandbox = provider.create()?;
        slot.transition(RuntimeStatus::Initializing);
        sandbox.init().await?;
        Ok::<_, SandboxError>(sandbox)
    }
    .await
    .map_err(|e| LoadError::bootstrap(Language::R, e));

    match outcome {
        Ok(sandbox) => {
            tracing::info!(language = %Language::R, "Runtime ready");
            slot.install(sandbox).await;
            Ok(())
        }
        Err(e) => {
            record_failure(slot, &e).await;
            Err(e)
        }
    }
}

async fn record_failure<S: ?Sized>(slot: &RuntimeSlot<S>, error: &LoadError) {
    slot.clear().await;
    slot.fail(error.to_string());
    tracing::error!(language = %slot.language(), error = %error, "Runtime failed to load");
}
