//! Signaling websocket
//!
//! One connection per peer. Outbound messages go through a single writer
//! task; inbound text (or UTF-8 binary) frames are handed to the peer
//! session in order.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{future, SinkExt, StreamExt};
use relay_sfu::{Sfu, SignalingSender};
use std::sync::Arc;
use tracing::{debug, error, info, Instrument};

use super::AppState;
use crate::logging::peer_span;

pub async fn websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let max_message_size = state.sfu.config().max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state.sfu))
}

async fn handle_socket(socket: WebSocket, sfu: Arc<Sfu>) {
    let (signaling, mut outbound) = SignalingSender::channel(sfu.config().signaling_buffer);
    let (mut ws_sink, ws_stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let json = match message.to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!(error = %e, "Failed to encode signaling message");
                    continue;
                }
            };
            if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                debug!(error = %e, "WebSocket write failed");
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    let session = match sfu.connect(signaling).await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "Failed to open peer session");
            writer.abort();
            return;
        }
    };

    let span = peer_span(session.id());
    let inbound = Box::pin(
        ws_stream
            .take_while(|frame| future::ready(!matches!(frame, Ok(Message::Close(_)))))
            .filter_map(|frame| future::ready(decode_frame(frame))),
    );

    async move {
        info!("WebSocket connection established");
        session.run(inbound).await;
        writer.abort();
        info!("WebSocket connection closed");
    }
    .instrument(span)
    .await;
}

/// Text payload of a frame; `None` for control frames.
fn decode_frame(frame: Result<Message, axum::Error>) -> Option<Result<String, String>> {
    match frame {
        Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
        Ok(Message::Binary(bytes)) => Some(
            String::from_utf8(bytes.to_vec()).map_err(|e| format!("binary frame is not UTF-8: {e}")),
        ),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Close(_)) => None,
        Err(e) => Some(Err(format!("WebSocket error: {e}"))),
    }
}
