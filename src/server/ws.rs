use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use uuid::Uuid;

use super::api::SharedState;
use crate::trace::{TraceArtifact, TraceLink};
use crate::workflow::{GateReview, PhaseInstance};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket message types ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    WorkflowInitialized {
        project_id: i64,
        phases: Vec<PhaseInstance>,
    },
    PhaseUpdated {
        phase: PhaseInstance,
    },
    ReviewOpened {
        review: GateReview,
    },
    ReviewCompleted {
        review: GateReview,
    },
    ArtifactRegistered {
        artifact: TraceArtifact,
    },
    LinkAdded {
        link: TraceLink,
    },
    LinkDeactivated {
        link: TraceLink,
    },
    MatrixSnapshotSaved {
        project_id: i64,
        snapshot_id: Uuid,
    },
}

// ── WebSocket handler ────────────────────────────────────────────────

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (sender, receiver) = socket.split();
    let rx = state.ws_tx.subscribe();
    run_socket_loop(sender, receiver, rx).await;
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Forwards broadcast events to the client and drops the connection when no
/// Pong arrives within [`PONG_TIMEOUT`] of a Ping.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<String>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!("WebSocket client missed pong, closing");
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if sender.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "WebSocket subscriber lagged behind event feed");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// Serialize and broadcast a WsMessage to all connected WebSocket clients.
/// Returns silently even if no clients are connected.
pub fn broadcast_message(tx: &broadcast::Sender<String>, msg: &WsMessage) {
    match serde_json::to_string(msg) {
        Ok(json) => {
            let _ = tx.send(json);
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize WsMessage");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::PhaseStatus;

    fn sample_phase() -> PhaseInstance {
        PhaseInstance {
            id: Uuid::new_v4(),
            project_id: 4,
            phase_definition_id: "planning".into(),
            phase_name: "Planning".into(),
            sort_order: 1,
            status: PhaseStatus::UnderReview,
            started_at: None,
            completed_at: None,
            review_id: None,
            completion_percentage: 60,
        }
    }

    #[test]
    fn test_phase_updated_serialization() {
        let msg = WsMessage::PhaseUpdated {
            phase: sample_phase(),
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "PhaseUpdated");
        assert_eq!(json["data"]["phase"]["status"], "under_review");
        assert_eq!(json["data"]["phase"]["completionPercentage"], 60);
    }

    #[test]
    fn test_snapshot_saved_roundtrip() {
        let id = Uuid::new_v4();
        let msg = WsMessage::MatrixSnapshotSaved {
            project_id: 2,
            snapshot_id: id,
        };
        let json = serde_json::to_string(&msg).unwrap();
        match serde_json::from_str::<WsMessage>(&json).unwrap() {
            WsMessage::MatrixSnapshotSaved {
                project_id,
                snapshot_id,
            } => {
                assert_eq!(project_id, 2);
                assert_eq!(snapshot_id, id);
            }
            _ => panic!("Expected MatrixSnapshotSaved variant"),
        }
    }

    #[tokio::test]
    async fn test_broadcast_channel_delivers_to_subscribers() {
        let (tx, _) = broadcast::channel::<String>(16);
        let mut rx1 = tx.subscribe();
        let mut rx2 = tx.subscribe();

        broadcast_message(&tx, &WsMessage::PhaseUpdated { phase: sample_phase() });

        let received1 = rx1.recv().await.unwrap();
        let received2 = rx2.recv().await.unwrap();
        assert!(received1.contains("PhaseUpdated"));
        assert_eq!(received1, received2);
    }

    #[tokio::test]
    async fn test_broadcast_no_receivers_does_not_panic() {
        let (tx, _) = broadcast::channel::<String>(16);
        broadcast_message(
            &tx,
            &WsMessage::MatrixSnapshotSaved {
                project_id: 1,
                snapshot_id: Uuid::new_v4(),
            },
        );
    }
}
