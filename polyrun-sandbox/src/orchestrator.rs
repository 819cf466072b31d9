//! The process-wide store of runtime states

use crate::error::{LoadError, SandboxError};
use crate::executor::{self, retire_if_dead};
use crate::loader::{self, LoaderOptions};
use crate::runtime::{JsEvaluator, PythonProvider, PythonSandbox, RProvider, RSandbox};
use crate::slot::RuntimeSlot;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use polyrun_common::{
    ExecutionRequest, ExecutionResult, Language, RuntimeState, RuntimeStatus, RuntimesSnapshot,
};
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

#[cfg(feature = "process")]
use crate::config::PolyrunConfig;

type LoadFuture = Shared<BoxFuture<'static, Result<(), LoadError>>>;

/// Owns one Python and one R sandbox plus a JavaScript evaluator.
///
/// Cheap to clone; clones share the same sandboxes. Each language has its own
/// slot, so a long execution in one never blocks the other.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    python: RuntimeSlot<dyn PythonSandbox>,
    r: RuntimeSlot<dyn RSandbox>,
    python_provider: Arc<dyn PythonProvider>,
    r_provider: Arc<dyn RProvider>,
    javascript: Arc<dyn JsEvaluator>,
    /// In-flight bring-ups, joined by every concurrent caller
    loads: Mutex<HashMap<Language, LoadFuture>>,
    options: LoaderOptions,
}

impl Orchestrator {
    pub fn new(
        python: Arc<dyn PythonProvider>,
        r: Arc<dyn RProvider>,
        javascript: Arc<dyn JsEvaluator>,
    ) -> Self {
        Self::with_loader_options(python, r, javascript, LoaderOptions::default())
    }

    pub fn with_loader_options(
        python: Arc<dyn PythonProvider>,
        r: Arc<dyn RProvider>,
        javascript: Arc<dyn JsEvaluator>,
        options: LoaderOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                python: RuntimeSlot::new(Language::Python),
                r: RuntimeSlot::new(Language::R),
                python_provider: python,
                r_provider: r,
                javascript,
                loads: Mutex::new(HashMap::new()),
                options,
            }),
        }
    }

    /// Orchestrator backed by locally installed interpreters
    #[cfg(feature = "process")]
    pub fn native(config: &PolyrunConfig) -> Self {
        use crate::runtime::{NativePythonProvider, NativeRProvider};

        #[cfg(feature = "v8")]
        let javascript: Arc<dyn JsEvaluator> = Arc::new(crate::runtime::V8Evaluator::new());
        #[cfg(not(feature = "v8"))]
        let javascript: Arc<dyn JsEvaluator> = Arc::new(crate::runtime::NodeEvaluator::new(
            config.javascript.node.clone(),
        ));

        Self::with_loader_options(
            Arc::new(NativePythonProvider::new(config.python.clone())),
            Arc::new(NativeRProvider::new(config.r.clone())),
            javascript,
            LoaderOptions::from(&config.python),
        )
    }

    /// Bring a runtime to `ready`.
    ///
    /// Returns immediately when it already is. Concurrent callers share one
    /// bring-up and all observe its outcome. After a failure the next call
    /// starts over.
    pub async fn load_runtime(&self, language: Language) -> Result<(), LoadError> {
        if !language.is_sandboxed() {
            return Ok(());
        }

        let load = {
            let mut loads = self.inner.loads.lock().unwrap_or_else(PoisonError::into_inner);
            match loads.get(&language) {
                Some(load) if load.peek().is_none() => load.clone(),
                _ => {
                    loads.remove(&language);
                    if self.inner.status(language).is_loaded() {
                        return Ok(());
                    }
                    let load = self.start_load(language);
                    loads.insert(language, load.clone());
                    load
                }
            }
        };

        let outcome = load.clone().await;

        let mut loads = self.inner.loads.lock().unwrap_or_else(PoisonError::into_inner);
        if loads
            .get(&language)
            .is_some_and(|current| Shared::ptr_eq(current, &load))
        {
            loads.remove(&language);
        }

        outcome
    }

    /// Enter `loading` and run the bring-up on its own task, so it completes
    /// even when every caller stops waiting
    fn start_load(&self, language: Language) -> LoadFuture {
        self.inner.begin_load(language);

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            match language {
                Language::Python => {
                    loader::load_python(&inner.python, inner.python_provider.as_ref(), &inner.options)
                        .await
                }
                Language::R => loader::load_r(&inner.r, inner.r_provider.as_ref()).await,
                Language::JavaScript => Ok(()),
            }
        });

        let inner = Arc::clone(&self.inner);
        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let error = LoadError::bootstrap(language, format!("load task failed: {}", e));
                    inner.abandon_load(language, &error).await;
                    Err(error)
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Run a snippet. Never fails; faults are reported inside the result.
    pub async fn execute_code(&self, language: Language, code: &str) -> ExecutionResult {
        match language {
            Language::Python => executor::execute_python(&self.inner.python, code).await,
            Language::R => executor::execute_r(&self.inner.r, code).await,
            Language::JavaScript => {
                executor::execute_javascript(self.inner.javascript.as_ref(), code).await
            }
        }
    }

    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        self.execute_code(request.language, &request.code).await
    }

    /// Read a file from a ready sandbox's filesystem.
    ///
    /// `None` when the runtime is not ready, the file does not exist, or the
    /// read fails.
    pub async fn read_file(&self, language: Language, filename: &str) -> Option<Bytes> {
        let outcome = match language {
            Language::Python => match self.inner.python.peek() {
                Ok(sandbox) => sandbox.read_file(filename).await,
                Err(e) => return unreadable(language, filename, e),
            },
            Language::R => match self.inner.r.peek() {
                Ok(sandbox) => sandbox.read_file(filename).await,
                Err(e) => return unreadable(language, filename, e),
            },
            Language::JavaScript => {
                return unreadable(language, filename, SandboxError::Unsupported(language))
            }
        };

        match outcome {
            Ok(data) => {
                tracing::debug!(%language, filename, size = data.len(), "Read file");
                Some(Bytes::from(data))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(%language, filename, "File not found");
                None
            }
            Err(e) => {
                tracing::warn!(%language, filename, error = %e, "Failed to read file");
                None
            }
        }
    }

    /// Install packages from the configured registry.
    ///
    /// Holds the sandbox exclusively, like an execution.
    pub async fn install_packages(
        &self,
        language: Language,
        packages: &[String],
    ) -> Result<(), SandboxError> {
        tracing::info!(%language, ?packages, "Installing packages");

        let outcome = match language {
            Language::Python => {
                let mut sandbox = self.inner.python.lease().await?;
                sandbox.install_packages(packages).await
            }
            Language::R => {
                let mut sandbox = self.inner.r.lease().await?;
                sandbox.install_packages(packages).await
            }
            Language::JavaScript => return Err(SandboxError::Unsupported(language)),
        };

        if let Err(e) = &outcome {
            tracing::warn!(%language, error = %e, "Package installation failed");
            match language {
                Language::Python => retire_if_dead(&self.inner.python, e).await,
                Language::R => retire_if_dead(&self.inner.r, e).await,
                Language::JavaScript => {}
            }
        }
        outcome
    }

    /// Current state of a sandboxed language, `None` for JavaScript
    pub fn state(&self, language: Language) -> Option<RuntimeState> {
        match language {
            Language::Python => Some(self.inner.python.state()),
            Language::R => Some(self.inner.r.state()),
            Language::JavaScript => None,
        }
    }

    pub fn snapshot(&self) -> RuntimesSnapshot {
        RuntimesSnapshot {
            python: self.inner.python.state(),
            r: self.inner.r.state(),
        }
    }

    /// Observe every state change of a sandboxed language
    pub fn subscribe(&self, language: Language) -> Option<watch::Receiver<RuntimeState>> {
        match language {
            Language::Python => Some(self.inner.python.subscribe()),
            Language::R => Some(self.inner.r.subscribe()),
            Language::JavaScript => None,
        }
    }
}

impl Inner {
    fn status(&self, language: Language) -> RuntimeStatus {
        match language {
            Language::Python => self.python.status(),
            Language::R => self.r.status(),
            Language::JavaScript => RuntimeStatus::Ready,
        }
    }

    fn begin_load(&self, language: Language) {
        match language {
            Language::Python => self.python.begin_load(),
            Language::R => self.r.begin_load(),
            Language::JavaScript => {}
        }
    }

    async fn abandon_load(&self, language: Language, error: &LoadError) {
        tracing::error!(%language, error = %error, "Runtime failed to load");
        match language {
            Language::Python => {
                self.python.fail(error.to_string());
                self.python.clear().await;
            }
            Language::R => {
                self.r.fail(error.to_string());
                self.r.clear().await;
            }
            Language::JavaScript => {}
        }
    }
}

fn unreadable(language: Language, filename: &str, reason: SandboxError) -> Option<Bytes> {
    tracing::debug!(%language, filename, reason = %reason, "File not readable");
    None
}
