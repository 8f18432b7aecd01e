//! The push channel: one WebSocket per viewer, fed by the coordinator's
//! broadcast fan-out.

use axum::{
    Router, middleware,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::application::preview::PushMessage;

use super::{PreviewState, log_responses};

pub fn build_push_router(state: PreviewState) -> Router {
    Router::new()
        .route("/ws", get(upgrade))
        .layer(middleware::from_fn(log_responses))
        .with_state(state)
}

async fn upgrade(State(state): State<PreviewState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one push-channel connection: forward broadcast payloads until the
/// client goes away, then drop the registration.
async fn handle_socket(socket: WebSocket, state: PreviewState) {
    let (id, mut updates) = state.session.subscribe();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else { break };
                match encode(&update) {
                    Ok(frame) => {
                        if let Err(err) = sink.send(Message::Text(frame.into())).await {
                            warn!(
                                target = "infra::http::push",
                                subscriber = %id,
                                error = %err,
                                "Failed to deliver update"
                            );
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(
                            target = "infra::http::push",
                            subscriber = %id,
                            error = %err,
                            "Failed to encode update"
                        );
                    }
                }
            }
            inbound = stream.next() => {
                // Viewers send nothing the server acts on; only liveness
                // frames and the close handshake matter here.
                match inbound {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.session.unsubscribe(id);
    debug!(target = "infra::http::push", subscriber = %id, "Push channel closed");
}

fn encode(update: &PushMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(update)
}
