//! WebSocket endpoints: camera ingest, the live viewer feed and liveness
//! notifications.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, info, warn};
use watchpost_cameras::LivenessMonitor;
use watchpost_network::{BroadcastHub, LiveBroadcaster};
use watchpost_types::events::StatusEvent;

use crate::state::AppState;

pub async fn camera_socket(
    State(state): State<AppState>,
    Path(camera): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| ingest_frames(state, camera, socket))
}

/// Every binary message is one complete frame from `camera`.
async fn ingest_frames<Rx>(state: AppState, camera: String, mut incoming: Rx)
where
    Rx: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    info!(camera = %camera, "camera connected");
    while let Some(message) = incoming.next().await {
        match message {
            Ok(Message::Binary(image)) => {
                if let Err(err) = state.intake.submit(camera.clone(), image, Vec::new()).await {
                    debug!(camera = %camera, error = %err, "camera frame rejected");
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(camera = %camera, error = %err, "camera socket error");
                break;
            }
        }
    }
    info!(camera = %camera, "camera disconnected");
}

pub async fn viewer_socket(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| {
        let (sink, incoming) = socket.split();
        relay_frames(state.hub.clone(), sink, incoming)
    })
}

/// Forwards every published frame to one viewer until either side goes away.
async fn relay_frames<Tx, Rx>(hub: BroadcastHub, mut sink: Tx, mut incoming: Rx)
where
    Tx: Sink<Message> + Unpin,
    Rx: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let viewer = hub.subscribe();
    loop {
        tokio::select! {
            frame = viewer.recv() => match frame {
                Some(live) => {
                    let text = live.envelope().to_owned();
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            message = incoming.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    let pending = viewer.pending();
    viewer.close();
    debug!(
        viewer = %viewer.id(),
        dropped = viewer.dropped(),
        pending,
        "viewer disconnected"
    );
}

pub async fn status_events(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| {
        let (sink, incoming) = socket.split();
        relay_status(state.monitor.clone(), sink, incoming)
    })
}

/// Sends the current status of every camera, then each change as it happens.
async fn relay_status<Tx, Rx>(monitor: Arc<LivenessMonitor>, mut sink: Tx, mut incoming: Rx)
where
    Tx: Sink<Message> + Unpin,
    Rx: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut events = monitor.subscribe();
    for status in monitor.statuses() {
        if !send_event(&mut sink, &StatusEvent::new(status)).await {
            return;
        }
    }
    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => {
                    if !send_event(&mut sink, &event).await {
                        break;
                    }
                }
                None => break,
            },
            message = incoming.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Returns false once the socket is gone.
async fn send_event<S>(sink: &mut S, event: &StatusEvent) -> bool
where
    S: Sink<Message> + Unpin,
{
    match serde_json::to_string(event) {
        Ok(text) => sink.send(Message::Text(text.into())).await.is_ok(),
        Err(err) => {
            warn!(error = %err, "failed to encode status event");
            true
        }
    }
}
