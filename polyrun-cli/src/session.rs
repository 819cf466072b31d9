//! JSON-lines session protocol over stdin/stdout
//!
//! Every request is handled on its own task, so a long R execution does not
//! hold up Python requests. Responses are written in completion order and
//! carry the request's `id`.

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use polyrun_common::{
    Language, RuntimeState, RuntimeStatus, SessionRequest, SessionResponse,
};
use polyrun_sandbox::Orchestrator;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub async fn serve(orchestrator: Orchestrator) -> Result<()> {
    info!("Session started");
    let (tx, mut rx) = mpsc::unbounded_channel::<SessionResponse>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(response) = rx.recv().await {
            let mut line = serde_json::to_string(&response)?;
            line.push('\n');
            stdout.write_all(line.as_bytes()).await?;
            stdout.flush().await?;
        }
        Ok::<_, anyhow::Error>(())
    });

    let mut watchers = JoinSet::new();
    for language in Language::SANDBOXED {
        let Some(mut states) = orchestrator.subscribe(language) else {
            continue;
        };
        let tx = tx.clone();
        watchers.spawn(async move {
            while states.changed().await.is_ok() {
                let state = states.borrow_and_update().clone();
                if tx.send(SessionResponse::StateChanged { language, state }).is_err() {
                    break;
                }
            }
        });
    }

    let mut requests = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SessionRequest>(&line) {
            Ok(request) => {
                debug!(?request, "Session request");
                let orchestrator = orchestrator.clone();
                let tx = tx.clone();
                requests.spawn(async move {
                    let _ = tx.send(handle(&orchestrator, request).await);
                });
            }
            Err(e) => {
                warn!(error = %e, "Invalid session request");
                let _ = tx.send(SessionResponse::Error {
                    id: None,
                    message: format!("Invalid request: {}", e),
                });
            }
        }
    }

    while requests.join_next().await.is_some() {}
    watchers.shutdown().await;
    drop(tx);
    writer.await??;

    info!("Session ended");
    Ok(())
}

/// Run one request to completion and build its response
pub async fn handle(orchestrator: &Orchestrator, request: SessionRequest) -> SessionResponse {
    let id = request.id().map(str::to_string);

    match request {
        SessionRequest::Load { language, .. } => match orchestrator.load_runtime(language).await {
            Ok(()) => SessionResponse::Loaded {
                id,
                language,
                state: orchestrator.state(language).unwrap_or_else(always_ready),
            },
            Err(e) => SessionResponse::Error {
                id,
                message: e.to_string(),
            },
        },
        SessionRequest::Execute { language, code, .. } => SessionResponse::Result {
            id,
            language,
            result: orchestrator.execute_code(language, &code).await,
        },
        SessionRequest::ReadFile {
            language, filename, ..
        } => {
            let data = orchestrator
                .read_file(language, &filename)
                .await
                .map(|bytes| STANDARD.encode(bytes));
            SessionResponse::File {
                id,
                language,
                filename,
                data,
            }
        }
        SessionRequest::Install {
            language, packages, ..
        } => match orchestrator.install_packages(language, &packages).await {
            Ok(()) => SessionResponse::Installed {
                id,
                language,
                packages,
            },
            Err(e) => SessionResponse::Error {
                id,
                message: e.to_string(),
            },
        },
        SessionRequest::Status { .. } => SessionResponse::Status {
            id,
            runtimes: orchestrator.snapshot(),
        },
    }
}

/// JavaScript has no lifecycle; it is always usable
fn always_ready() -> RuntimeState {
    RuntimeState {
        status: RuntimeStatus::Ready,
        ..RuntimeState::new()
    }
}
