//! Common test utilities shared across integration and E2E tests


pub use fakes::*;

use polyrun_sandbox::{Orchestrator, RuntimeState, RuntimeStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

/// Whether `program --version` runs on this machine
pub fn binary_available(program: &str) -> bool {
    std::process::Command::new(program)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Wait until a state receiver reports `status`
pub async fn wait_for_status(states: &mut watch::Receiver<RuntimeState>, status: RuntimeStatus) {
    tokio::time::timeout(Duration::from_secs(5), states.wait_for(|state| state.status == status))
        .await
        .expect("timed out waiting for status")
        .expect("state channel closed");
}

/// Orchestrator over fresh fakes, returning the fakes for inspection
pub fn fake_orchestrator() -> (Orchestrator, Arc<FakePythonProvider>, Arc<FakeRProvider>) {
    let python = Arc::new(FakePythonProvider::default());
    let r = Arc::new(FakeRProvider::default());
    let orchestrator = Orchestrator::new(python.clone(), r.clone(), Arc::new(FakeJs));
    (orchestrator, python, r)
}
