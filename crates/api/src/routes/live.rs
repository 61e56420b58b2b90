//! Live Tail WebSocket Route

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use live_tail::{BatchSink, SinkError};
use std::sync::Arc;
use storage::Record;
use tracing::{debug, info};

use crate::AppState;

/// Pushes each batch as one JSON text frame
struct WsSink {
    sender: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl BatchSink for WsSink {
    async fn push(&mut self, batch: &[Record]) -> Result<(), SinkError> {
        let text = serde_json::to_string(batch).map_err(|e| SinkError(e.to_string()))?;
        self.sender
            .send(Message::Text(text))
            .await
            .map_err(|e| SinkError(e.to_string()))
    }
}

/// Upgrade to a WebSocket that streams the newest records for one sensor
pub async fn live_records(
    State(state): State<Arc<AppState>>,
    Path(sensor_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| serve(socket, state, sensor_id))
}

async fn serve(socket: WebSocket, state: Arc<AppState>, sensor_id: String) {
    info!(sensor_id = %sensor_id, "Live tail connected");

    let (sender, mut receiver) = socket.split();
    let cancel = state.shutdown.child_token();

    // Client frames are ignored; a close frame or read error ends the tail.
    let reader = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            while let Some(msg) = receiver.next().await {
                match msg {
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            cancel.cancel();
        })
    };

    let mut sink = WsSink { sender };
    let end = state.live_tail.run(&sensor_id, &mut sink, &cancel).await;

    reader.abort();
    let _ = sink.sender.send(Message::Close(None)).await;
    info!(sensor_id = %sensor_id, "Live tail disconnected");
    debug!(sensor_id = %sensor_id, ?end, "Live tail end reason");
}
