//! WebSocket endpoint for job status observers.

use std::sync::Arc;

use axum::{
    extract::{
        Extension, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use jobqueue_infra::realtime::{ConnectionHandle, Session, SubscriptionHub};

use crate::app::services::AppServices;

pub async fn observe(
    ws: WebSocketUpgrade,
    Extension(services): Extension<Arc<AppServices>>,
) -> impl IntoResponse {
    let hub = services.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<SubscriptionHub>) {
    let (mut sink, mut stream) = socket.split();
    let (connection, mut outbox) = ConnectionHandle::channel();
    let mut session = Session::new(connection);
    let connection_id = session.id();
    info!(connection = %connection_id, "observer connected");

    // Confirmations and status pushes share one ordered outbox.
    let send_task = tokio::spawn(async move {
        while let Some(message) = outbox.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode observer message");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text)).await {
                debug!(error = %e, "observer send failed");
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    warn!(connection = %connection_id, "ignoring non-UTF-8 observer frame");
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Err(e) => {
                debug!(connection = %connection_id, error = %e, "observer connection error");
                break;
            }
        };

        if let Err(e) = session.handle_text(&hub, &text) {
            warn!(connection = %connection_id, error = %e, "ignoring observer message");
        }
    }

    session.close(&hub);
    send_task.abort();
    info!(connection = %connection_id, "observer disconnected");
}
