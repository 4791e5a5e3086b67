use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use planrun_core::RunId;
use tracing::{debug, info};

use crate::infra::{app_state::AppState, views::RunStateView, websocket::messages};

/// Handle WebSocket upgrade request for a run's push channel
pub async fn plan_websocket_handler(
    ws: WebSocketUpgrade,
    Path(run_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let run_id = RunId::new(run_id);
    ws.on_upgrade(move |socket| handle_socket(socket, state, run_id))
}

/// Stream snapshots for `run_id` until either side goes away.
async fn handle_socket(socket: WebSocket, state: AppState, run_id: RunId) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (subscription, mut rx) = state.runtime().subscribe(&run_id);
    info!(run_id = %run_id, subscription = %subscription.id(), "push channel opened");

    // Ends when the runtime closes the subscription or the client stops
    // reading.
    let mut send_task = tokio::spawn(async move {
        while let Some(snapshot) = rx.recv().await {
            let frame = messages::snapshot_frame(&RunStateView::from(snapshot));
            if ws_sender.send(frame).await.is_err() {
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    // Client frames carry no commands; only a close or an error matters.
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Err(err) => {
                    debug!(error = %err, "push channel receive failed");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.runtime().unsubscribe(&subscription);
    info!(run_id = %run_id, subscription = %subscription.id(), "push channel closed");
}
