//! Orchestrator behavior against scripted sandboxes

use crate::common::{
    fake_orchestrator, setup_test_logging, wait_for_status, FakeJs, FakePythonProvider,
    FakeRProvider,
};
use assert_matches::assert_matches;
use polyrun_common::{ExecutionRequest, JAVASCRIPT_STDOUT_PLACEHOLDER};
use polyrun_sandbox::{
    Language, LoadError, Orchestrator, RuntimeStatus, SandboxError, R_CONVERSION_ERROR_PLACEHOLDER,
    R_OBJECT_PLACEHOLDER,
};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[tokio::test]
async fn test_execute_before_load_is_rejected() {
    setup_test_logging();
    let (orchestrator, python, _) = fake_orchestrator();

    let result = orchestrator.execute_code(Language::Python, "print:hi").await;

    assert_eq!(result.error.as_deref(), Some("Python runtime not ready."));
    assert_eq!(result.stderr, "Error: Python runtime not ready.");
    assert!(result.stdout.is_empty());
    assert_eq!(
        orchestrator.state(Language::Python).unwrap().status,
        RuntimeStatus::Uninitialized
    );
    assert_eq!(python.load_count(), 0);
}

#[tokio::test]
async fn test_load_then_execute_python() {
    setup_test_logging();
    let (orchestrator, python, _) = fake_orchestrator();

    orchestrator.load_runtime(Language::Python).await.unwrap();
    assert_eq!(
        orchestrator.state(Language::Python).unwrap().status,
        RuntimeStatus::Ready
    );

    let result = orchestrator
        .execute(ExecutionRequest::new(
            Language::Python,
            "print:hello\nwarn:careful\nvalue:2",
        ))
        .await;

    assert!(result.success());
    assert_eq!(result.stdout, "hello\n");
    assert_eq!(result.stderr, "careful\n");
    assert_eq!(result.return_value, Some(json!(2)));
    assert_eq!(
        orchestrator.state(Language::Python).unwrap().status,
        RuntimeStatus::Ready
    );
    assert_eq!(python.load_count(), 1);
}

#[tokio::test]
async fn test_load_is_idempotent_once_ready() {
    let (orchestrator, python, r) = fake_orchestrator();

    for _ in 0..3 {
        orchestrator.load_runtime(Language::Python).await.unwrap();
        orchestrator.load_runtime(Language::R).await.unwrap();
    }

    assert_eq!(python.load_count(), 1);
    assert_eq!(r.create_count(), 1);
}

#[tokio::test]
async fn test_concurrent_loads_share_one_bootstrap() {
    setup_test_logging();
    let gate = Arc::new(Notify::new());
    let python = Arc::new(FakePythonProvider::gated(gate.clone()));
    let orchestrator =
        Orchestrator::new(python.clone(), Arc::new(FakeRProvider::default()), Arc::new(FakeJs));

    let mut states = orchestrator.subscribe(Language::Python).unwrap();
    let callers: Vec<_> = (0..4)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.load_runtime(Language::Python).await })
        })
        .collect();

    wait_for_status(&mut states, RuntimeStatus::Loading).await;
    gate.notify_one();

    for caller in callers {
        assert_eq!(caller.await.unwrap(), Ok(()));
    }
    assert_eq!(python.load_count(), 1);
    assert_eq!(
        orchestrator.state(Language::Python).unwrap().status,
        RuntimeStatus::Ready
    );
}

#[tokio::test]
async fn test_concurrent_callers_share_the_failure() {
    let gate = Arc::new(Notify::new());
    let python = Arc::new(FakePythonProvider::gated(gate.clone()));
    python.fail_load.store(true, Ordering::SeqCst);
    let orchestrator =
        Orchestrator::new(python.clone(), Arc::new(FakeRProvider::default()), Arc::new(FakeJs));

    let first = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.load_runtime(Language::Python).await }
    });
    let second = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.load_runtime(Language::Python).await }
    });

    let mut states = orchestrator.subscribe(Language::Python).unwrap();
    wait_for_status(&mut states, RuntimeStatus::Loading).await;
    gate.notify_one();

    let first = first.await.unwrap().unwrap_err();
    let second = second.await.unwrap().unwrap_err();
    assert_eq!(first, second);
    assert_eq!(python.load_count(), 1);
}

#[tokio::test]
async fn test_failed_load_is_recorded_and_retried() {
    setup_test_logging();
    let (orchestrator, python, _) = fake_orchestrator();
    python.fail_load.store(true, Ordering::SeqCst);

    let err = orchestrator.load_runtime(Language::Python).await.unwrap_err();
    assert_matches!(err, LoadError::Bootstrap { language: Language::Python, .. });

    let state = orchestrator.state(Language::Python).unwrap();
    assert_eq!(state.status, RuntimeStatus::Error);
    assert!(state
        .last_error
        .as_deref()
        .unwrap()
        .contains("interpreter crashed during startup"));

    let result = orchestrator.execute_code(Language::Python, "value:1").await;
    assert_eq!(result.error.as_deref(), Some("Python runtime not ready."));

    python.fail_load.store(false, Ordering::SeqCst);
    orchestrator.load_runtime(Language::Python).await.unwrap();

    let state = orchestrator.state(Language::Python).unwrap();
    assert_eq!(state.status, RuntimeStatus::Ready);
    assert_eq!(state.last_error, None);
    assert_eq!(python.load_count(), 2);
}

#[tokio::test]
async fn test_installer_failure_fails_the_load() {
    let (orchestrator, python, _) = fake_orchestrator();
    python.fail_installer.store(true, Ordering::SeqCst);

    let err = orchestrator.load_runtime(Language::Python).await.unwrap_err();

    assert_matches!(err, LoadError::Installer { ref module, .. } if module == "pip");
    assert!(err.to_string().starts_with("Failed to initialize pip:"));
    assert_eq!(
        orchestrator.state(Language::Python).unwrap().status,
        RuntimeStatus::Error
    );
}

#[tokio::test]
async fn test_python_error_keeps_output_and_sandbox() {
    let (orchestrator, _, _) = fake_orchestrator();
    orchestrator.load_runtime(Language::Python).await.unwrap();

    let result = orchestrator
        .execute_code(
            Language::Python,
            "print:before\nraise:NameError: name 'x' is not defined",
        )
        .await;

    assert_eq!(result.stdout, "before\n");
    assert_eq!(
        result.stderr,
        "Python Execution Error: NameError: name 'x' is not defined\n"
    );
    assert_eq!(
        result.error.as_deref(),
        Some("NameError: name 'x' is not defined")
    );
    assert_eq!(result.return_value, None);
    assert_eq!(
        orchestrator.state(Language::Python).unwrap().status,
        RuntimeStatus::Ready
    );
}

#[tokio::test]
async fn test_python_generated_file_can_be_read() {
    let (orchestrator, _, _) = fake_orchestrator();
    orchestrator.load_runtime(Language::Python).await.unwrap();

    let result = orchestrator
        .execute_code(Language::Python, "write:report.csv\nvalue:\"report.csv\"")
        .await;

    assert_eq!(result.generated_filename.as_deref(), Some("report.csv"));
    assert_eq!(result.return_value, None);

    let data = orchestrator
        .read_file(Language::Python, "report.csv")
        .await
        .unwrap();
    assert_eq!(&data[..], b"a,b\n1,2\n");
}

#[tokio::test]
async fn test_python_base64_plot() {
    let (orchestrator, _, _) = fake_orchestrator();
    orchestrator.load_runtime(Language::Python).await.unwrap();
    let encoded = "iVBORw0KGgoAAAANSUhEUg".repeat(8);

    let result = orchestrator
        .execute_code(Language::Python, &format!("value:\"{}\"", encoded))
        .await;

    assert_eq!(result.plot_image_base64.as_deref(), Some(encoded.as_str()));
    assert_eq!(result.return_value, None);
    assert_eq!(result.generated_filename, None);
}

#[tokio::test]
async fn test_busy_sandbox_rejects_second_execution() {
    setup_test_logging();
    let (orchestrator, _, _) = fake_orchestrator();
    orchestrator.load_runtime(Language::Python).await.unwrap();
    orchestrator.load_runtime(Language::R).await.unwrap();

    let mut states = orchestrator.subscribe(Language::Python).unwrap();
    let long = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move {
            orchestrator
                .execute_code(Language::Python, "sleep:300\nvalue:1")
                .await
        }
    });
    wait_for_status(&mut states, RuntimeStatus::Executing).await;

    let rejected = orchestrator.execute_code(Language::Python, "value:2").await;
    assert_eq!(rejected.error.as_deref(), Some("Python runtime is busy."));
    assert!(orchestrator.read_file(Language::Python, "any.csv").await.is_none());

    // The other language is independent
    let r = orchestrator.execute_code(Language::R, "cat:still here").await;
    assert!(r.success());
    assert_eq!(r.stdout, "still here");

    let finished = long.await.unwrap();
    assert_eq!(finished.return_value, Some(json!(1)));
    assert_eq!(
        orchestrator.state(Language::Python).unwrap().status,
        RuntimeStatus::Ready
    );
}

#[tokio::test]
async fn test_execution_during_a_read_waits_instead_of_failing() {
    setup_test_logging();
    let (orchestrator, python, _) = fake_orchestrator();
    orchestrator.load_runtime(Language::Python).await.unwrap();
    orchestrator
        .execute_code(Language::Python, "write:report.csv")
        .await;
    python.read_delay.store(200, Ordering::SeqCst);

    let read = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.read_file(Language::Python, "report.csv").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    // The read does not show as work in progress
    assert_eq!(
        orchestrator.state(Language::Python).unwrap().status,
        RuntimeStatus::Ready
    );

    let result = orchestrator.execute_code(Language::Python, "value:3").await;
    assert!(result.success(), "{:?}", result);
    assert_eq!(result.return_value, Some(json!(3)));
    assert_eq!(&read.await.unwrap().unwrap()[..], b"a,b\n1,2\n");
}

fn assert_send<T: Send>(_: T) {}

#[tokio::test]
async fn test_operation_futures_are_send() {
    let (orchestrator, _, _) = fake_orchestrator();
    let packages = vec!["numpy".to_string()];

    for language in [Language::Python, Language::R, Language::JavaScript] {
        assert_send(orchestrator.execute_code(language, "value:1"));
        assert_send(orchestrator.read_file(language, "out.csv"));
        assert_send(orchestrator.install_packages(language, &packages));
        assert_send(orchestrator.load_runtime(language));
    }
    assert_send(orchestrator.execute(ExecutionRequest {
        language: Language::R,
        code: "cat:hi".to_string(),
    }));
}

#[tokio::test]
async fn test_terminated_interpreter_is_retired() {
    let (orchestrator, python, _) = fake_orchestrator();
    orchestrator.load_runtime(Language::Python).await.unwrap();

    let result = orchestrator.execute_code(Language::Python, "exit").await;
    assert!(!result.success());

    let state = orchestrator.state(Language::Python).unwrap();
    assert_eq!(state.status, RuntimeStatus::Error);
    assert!(state.last_error.as_deref().unwrap().contains("exited"));

    orchestrator.load_runtime(Language::Python).await.unwrap();
    assert_eq!(python.load_count(), 2);
    let result = orchestrator.execute_code(Language::Python, "value:3").await;
    assert_eq!(result.return_value, Some(json!(3)));
}

#[tokio::test]
async fn test_r_output_and_placeholder() {
    let (orchestrator, _, r) = fake_orchestrator();
    orchestrator.load_runtime(Language::R).await.unwrap();

    let result = orchestrator
        .execute_code(Language::R, "cat:a\ncat:b\nmessage:Warning: careful")
        .await;

    assert!(result.success());
    assert_eq!(result.stdout, "a\nb");
    assert_eq!(result.stderr, "Warning: careful");
    assert_eq!(result.return_value, Some(json!(R_OBJECT_PLACEHOLDER)));

    let log = r.shelter_log();
    assert_eq!(log.created.len(), 1);
    assert_eq!(log.purged, log.created);
    assert!(log.deferred.is_empty());
}

#[tokio::test]
async fn test_r_values_and_objects_are_placeholders() {
    let (orchestrator, _, _) = fake_orchestrator();
    orchestrator.load_runtime(Language::R).await.unwrap();

    for code in ["value:42", "opaque"] {
        let result = orchestrator.execute_code(Language::R, code).await;
        assert_eq!(result.return_value, Some(json!(R_OBJECT_PLACEHOLDER)), "{code}");
    }

    let empty = orchestrator.execute_code(Language::R, "").await;
    assert!(empty.success());
    assert_eq!(empty.return_value, None);
}

#[tokio::test]
async fn test_r_error_still_purges_shelter() {
    let (orchestrator, _, r) = fake_orchestrator();
    orchestrator.load_runtime(Language::R).await.unwrap();

    let result = orchestrator
        .execute_code(Language::R, "cat:partial\nstop:boom")
        .await;

    assert_eq!(result.error.as_deref(), Some("boom"));
    assert_eq!(result.stderr, "Execution Error: boom");
    assert_eq!(result.return_value, None);
    assert_eq!(
        orchestrator.state(Language::R).unwrap().status,
        RuntimeStatus::Ready
    );

    let log = r.shelter_log();
    assert_eq!(log.purged, log.created);
}

#[tokio::test]
async fn test_r_purge_failure_is_reported() {
    let (orchestrator, _, r) = fake_orchestrator();
    orchestrator.load_runtime(Language::R).await.unwrap();
    r.fail_purge.store(true, Ordering::SeqCst);

    let result = orchestrator
        .execute_code(Language::R, "message:note\nvalue:1")
        .await;

    assert!(result.success());
    assert_eq!(
        result.stderr,
        "note\nPurge Error: shelter 1 is not registered"
    );
    assert_eq!(result.return_value, Some(json!(R_OBJECT_PLACEHOLDER)));
}

#[tokio::test]
async fn test_r_first_plot_is_kept() {
    let (orchestrator, _, _) = fake_orchestrator();
    orchestrator.load_runtime(Language::R).await.unwrap();

    let result = orchestrator.execute_code(Language::R, "plot\nplot").await;

    let image = result.plot_image.unwrap();
    assert_eq!(image.mime_type, "image/png");
    assert_eq!(image.data, vec![0x89, 1]);
}

#[tokio::test]
async fn test_r_generated_file() {
    let (orchestrator, _, _) = fake_orchestrator();
    orchestrator.load_runtime(Language::R).await.unwrap();

    let result = orchestrator
        .execute_code(Language::R, "file:summary.PDF")
        .await;

    assert_eq!(result.generated_filename.as_deref(), Some("summary.PDF"));
    assert_eq!(result.return_value, None);
    let data = orchestrator.read_file(Language::R, "summary.PDF").await.unwrap();
    assert_eq!(&data[..], b"%PDF");
}

#[tokio::test]
async fn test_r_conversion_error() {
    let (orchestrator, _, _) = fake_orchestrator();
    orchestrator.load_runtime(Language::R).await.unwrap();

    let result = orchestrator.execute_code(Language::R, "bad").await;

    assert!(result.success());
    assert_eq!(
        result.return_value,
        Some(json!(R_CONVERSION_ERROR_PLACEHOLDER))
    );
    assert_eq!(
        result.stderr,
        "Conversion Error: cannot coerce type 'closure' to vector\n"
    );
}

#[tokio::test]
async fn test_cancelled_r_execution_defers_purge() {
    setup_test_logging();
    let (orchestrator, _, r) = fake_orchestrator();
    orchestrator.load_runtime(Language::R).await.unwrap();

    let mut states = orchestrator.subscribe(Language::R).unwrap();
    let task = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.execute_code(Language::R, "sleep:5000").await }
    });
    wait_for_status(&mut states, RuntimeStatus::Executing).await;

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    assert_eq!(
        orchestrator.state(Language::R).unwrap().status,
        RuntimeStatus::Ready
    );
    {
        let log = r.shelter_log();
        assert_eq!(log.deferred, log.created);
        assert!(log.purged.is_empty());
    }

    let result = orchestrator.execute_code(Language::R, "cat:next").await;
    assert_eq!(result.stdout, "next");
}

#[tokio::test]
async fn test_r_load_passes_through_initializing() {
    setup_test_logging();
    let gate = Arc::new(Notify::new());
    let r = Arc::new(FakeRProvider::gated(gate.clone()));
    let orchestrator =
        Orchestrator::new(Arc::new(FakePythonProvider::default()), r.clone(), Arc::new(FakeJs));

    let mut states = orchestrator.subscribe(Language::R).unwrap();
    let load = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.load_runtime(Language::R).await }
    });

    wait_for_status(&mut states, RuntimeStatus::Initializing).await;
    let rejected = orchestrator.execute_code(Language::R, "cat:x").await;
    assert_eq!(rejected.error.as_deref(), Some("R runtime not ready."));

    gate.notify_one();
    load.await.unwrap().unwrap();
    assert_eq!(
        orchestrator.state(Language::R).unwrap().status,
        RuntimeStatus::Ready
    );
}

#[tokio::test]
async fn test_r_init_failure() {
    let (orchestrator, _, r) = fake_orchestrator();
    r.fail_init.store(true, Ordering::SeqCst);

    let err = orchestrator.load_runtime(Language::R).await.unwrap_err();

    assert_eq!(err.to_string(), "R runtime failed to load: R failed to start");
    let state = orchestrator.state(Language::R).unwrap();
    assert_eq!(state.status, RuntimeStatus::Error);
    assert_eq!(state.last_error, Some(err.to_string()));
}

#[tokio::test]
async fn test_abandoned_load_still_completes() {
    let gate = Arc::new(Notify::new());
    let python = Arc::new(FakePythonProvider::gated(gate.clone()));
    let orchestrator =
        Orchestrator::new(python.clone(), Arc::new(FakeRProvider::default()), Arc::new(FakeJs));

    let mut states = orchestrator.subscribe(Language::Python).unwrap();
    let caller = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.load_runtime(Language::Python).await }
    });
    wait_for_status(&mut states, RuntimeStatus::Loading).await;
    caller.abort();
    let _ = caller.await;

    gate.notify_one();
    wait_for_status(&mut states, RuntimeStatus::Ready).await;

    orchestrator.load_runtime(Language::Python).await.unwrap();
    assert_eq!(python.load_count(), 1);
}

#[tokio::test]
async fn test_read_file_unavailable_cases() {
    let (orchestrator, _, _) = fake_orchestrator();

    assert!(orchestrator.read_file(Language::R, "out.csv").await.is_none());
    assert!(orchestrator
        .read_file(Language::JavaScript, "out.csv")
        .await
        .is_none());

    orchestrator.load_runtime(Language::R).await.unwrap();
    assert!(orchestrator.read_file(Language::R, "missing.csv").await.is_none());
}

#[tokio::test]
async fn test_javascript_evaluation() {
    let (orchestrator, _, _) = fake_orchestrator();
    orchestrator.load_runtime(Language::JavaScript).await.unwrap();

    let result = orchestrator.execute_code(Language::JavaScript, "42").await;
    assert_eq!(result.stdout, JAVASCRIPT_STDOUT_PLACEHOLDER);
    assert_eq!(result.return_value, Some(json!(42)));
    assert!(result.stderr.is_empty());

    let result = orchestrator
        .execute_code(Language::JavaScript, "undefined")
        .await;
    assert_eq!(result.return_value, None);
    assert!(result.success());

    let result = orchestrator.execute_code(Language::JavaScript, "throw").await;
    assert_eq!(result.error.as_deref(), Some("boom"));
    assert_eq!(result.stderr, "Error: boom\n    at <eval>:1:7");
    assert!(result.stdout.is_empty());

    assert!(orchestrator.state(Language::JavaScript).is_none());
    assert!(orchestrator.subscribe(Language::JavaScript).is_none());
}

#[tokio::test]
async fn test_install_packages() {
    let (orchestrator, python, _) = fake_orchestrator();
    let packages = vec!["numpy".to_string(), "pandas".to_string()];

    let err = orchestrator
        .install_packages(Language::Python, &packages)
        .await
        .unwrap_err();
    assert_matches!(err, SandboxError::NotReady(Language::Python));

    orchestrator.load_runtime(Language::Python).await.unwrap();
    orchestrator
        .install_packages(Language::Python, &packages)
        .await
        .unwrap();
    assert_eq!(*python.installed.lock().unwrap(), packages);
    assert_eq!(
        orchestrator.state(Language::Python).unwrap().status,
        RuntimeStatus::Ready
    );

    let err = orchestrator
        .install_packages(Language::JavaScript, &packages)
        .await
        .unwrap_err();
    assert_matches!(err, SandboxError::Unsupported(Language::JavaScript));
}

#[tokio::test]
async fn test_snapshot_tracks_both_sandboxes() {
    let (orchestrator, _, _) = fake_orchestrator();
    let mut python_states = orchestrator.subscribe(Language::Python).unwrap();

    orchestrator.load_runtime(Language::Python).await.unwrap();

    let snapshot = orchestrator.snapshot();
    assert_eq!(snapshot.python.status, RuntimeStatus::Ready);
    assert_eq!(snapshot.r.status, RuntimeStatus::Uninitialized);
    assert!(python_states.has_changed().unwrap());
    assert_eq!(
        python_states.borrow_and_update().status,
        RuntimeStatus::Ready
    );
}
