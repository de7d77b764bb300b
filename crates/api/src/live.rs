//! Live reading feed over WebSocket
//!
//! Every successful write is broadcast to connected clients as a JSON text
//! frame. Clients that fall behind skip the events they missed.
//!
//! Clients may also send a text frame naming a snapshot they want:
//! `latest` (or `/app/sensor/request`) for the most recent readings and
//! `history` (or `/app/sensor/history`) for every stored reading.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use readings::{ReadingService, SensorReading};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::AppState;

/// Events buffered per subscriber before it starts lagging
pub const EVENT_CAPACITY: usize = 256;

/// A change to the stored readings
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ReadingEvent {
    Created { reading: SensorReading },
    Updated { reading: SensorReading },
    Deleted {
        #[serde(rename = "sensorId")]
        sensor_id: i64,
    },
}

/// Answer to a client's text frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum FeedReply {
    Snapshot { readings: Vec<SensorReading> },
    Error { message: String },
}

/// Build the reply to a snapshot request
pub async fn answer_request(service: &ReadingService, request: &str) -> FeedReply {
    let readings = match request.trim() {
        "latest" | "/app/sensor/request" => service.get_latest().await,
        "history" | "/app/sensor/history" => service.get_all().await,
        other => {
            return FeedReply::Error {
                message: format!("Unknown request {:?}", other),
            }
        }
    };

    match readings {
        Ok(readings) => FeedReply::Snapshot { readings },
        Err(e) => {
            warn!("Live feed snapshot failed: {}", e);
            FeedReply::Error {
                message: e.to_string(),
            }
        }
    }
}

/// Upgrade to a WebSocket that streams [`ReadingEvent`]s
pub async fn subscribe(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let events = state.events.subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, state, events))
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), axum::Error> {
    match serde_json::to_string(value) {
        Ok(json) => socket.send(Message::Text(json)).await,
        Err(e) => {
            warn!("Failed to encode live feed frame: {}", e);
            Ok(())
        }
    }
}

async fn forward_events(
    mut socket: WebSocket,
    state: Arc<AppState>,
    mut events: broadcast::Receiver<ReadingEvent>,
) {
    debug!("Live feed client connected");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if send_json(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Live feed client lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(request))) => {
                    debug!("Live feed request {:?}", request);
                    let reply = answer_request(&state.service, &request).await;
                    if send_json(&mut socket, &reply).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Pings are answered by axum
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("Live feed client disconnected");
}
