//! The WebSocket a dispatched runner connects back to.
//!
//! One socket carries exactly one job. The handler only checks that the id
//! names a pending job before upgrading; promotion happens once the socket
//! is open, so a late or duplicate connection is refused with a policy
//! close instead of starting the job twice.

use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::dispatch::{JobLauncher, JobOutcome, JobState, Registry};
use crate::runner::Outbound;
use crate::types::JobId;

use super::AppState;

/// `GET /runner/{id}/ws`
///
/// - 400 if `id` is not a job id
/// - 404 if no job with that id is waiting for a runner
/// - otherwise upgrades and runs the job over the socket
pub async fn runner_ws_handler<L: JobLauncher>(
    State(state): State<AppState<L>>,
    Path(id): Path<String>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Ok(id) = id.parse::<JobId>() else {
        return (StatusCode::BAD_REQUEST, "invalid job id").into_response();
    };
    if state.registry().job_state(id) != Some(JobState::Pending) {
        debug!(job = %id, "Connection for unknown job");
        return (StatusCode::NOT_FOUND, "unknown job").into_response();
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    let registry = Arc::clone(state.registry());
    ws.on_upgrade(move |socket| serve_runner(registry, id, socket))
}

fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

/// Reports the job's connection as gone when dropped, so a socket task that
/// is aborted mid-job still releases its worker.
struct DisconnectGuard<L: JobLauncher> {
    registry: Arc<Registry<L>>,
    id: JobId,
}

impl<L: JobLauncher> Drop for DisconnectGuard<L> {
    fn drop(&mut self) {
        self.registry.disconnected(self.id);
    }
}

async fn serve_runner<L: JobLauncher>(registry: Arc<Registry<L>>, id: JobId, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    let mut connection = match registry.connect(id) {
        Ok(connection) => connection,
        Err(e) => {
            warn!(job = %id, error = %e, "Refusing runner connection");
            let _ = sink.send(close_message(close_code::POLICY, &e.to_string())).await;
            return;
        }
    };
    let guard = DisconnectGuard {
        registry: Arc::clone(&registry),
        id,
    };

    loop {
        tokio::select! {
            outbound = connection.outbound.recv() => match outbound {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        warn!(job = %id, error = %e, "Failed to send to runner");
                        break;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let _ = sink.send(close_message(code, reason)).await;
                    break;
                }
                None => break,
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if let Err(violation) = registry.deliver(id, text.as_str()) {
                        warn!(job = %id, %violation, "Closing runner connection");
                        let _ = sink.send(close_message(close_code::PROTOCOL, "protocol violation")).await;
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(job = %id, ?frame, "Runner closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(job = %id, error = %e, "Runner connection failed");
                    break;
                }
                None => break,
            },
            () = connection.cancel.cancelled() => {
                let _ = sink.send(close_message(close_code::AWAY, "server shutting down")).await;
                break;
            }
        }
    }

    drop(guard);
    match connection.worker.await {
        Ok(JobOutcome::Completed) => info!(job = %id, "Job completed"),
        Ok(JobOutcome::Failed(message)) => warn!(job = %id, %message, "Job failed"),
        Err(e) => warn!(job = %id, error = %e, "Job worker did not finish cleanly"),
    }
}
