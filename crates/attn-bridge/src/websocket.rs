//! `ws://127.0.0.1:<ATTN_WS_PORT>/ws` endpoint (§4.6, §6). Origin checking
//! accepts local origins only; each connection runs an independent write
//! pump (10 s per-write deadline) and read pump (60 s idle deadline).

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};

use crate::origin_validation::validate_local_origin;
use crate::protocol::{ClientCommand, ServerEvent};
use crate::state::AppState;

const WRITE_DEADLINE: Duration = Duration::from_secs(10);
const READ_DEADLINE: Duration = Duration::from_secs(60);

pub fn router(state: AppState) -> Router {
    Router::new().route("/ws", get(upgrade)).with_state(state)
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(status) = validate_local_origin(&headers) {
        return status.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let rx = state.events.subscribe();

    let initial = match state.initial_state_event().await {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "failed to build initial_state event");
            return;
        }
    };
    if send_event(&mut sink, &initial).await.is_err() {
        return;
    }

    let write_state = state.clone();
    let write_pump = tokio::spawn(async move {
        loop {
            match rx.recv_async().await {
                Ok(event) => {
                    if send_event(&mut sink, &event).await.is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        let _ = write_state;
    });

    let read_pump = async {
        loop {
            let next = tokio::time::timeout(READ_DEADLINE, stream.next()).await;
            let message = match next {
                Ok(Some(Ok(message))) => message,
                _ => break,
            };
            match message {
                Message::Text(text) => {
                    if let Ok(cmd) = serde_json::from_str::<ClientCommand>(&text) {
                        let _ = state.dispatch(cmd).await;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    };

    read_pump.await;
    write_pump.abort();
}

async fn send_event(
    sink: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), ()> {
    let Ok(payload) = serde_json::to_string(event) else {
        return Err(());
    };
    tokio::time::timeout(WRITE_DEADLINE, sink.send(Message::Text(payload.into())))
        .await
        .map_err(|_| ())?
        .map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    #[test]
    fn local_origin_is_accepted() {
        let mut headers = HeaderMap::new();
        headers.insert("origin", "http://localhost:9849".parse().unwrap());
        assert!(validate_local_origin(&headers).is_ok());
    }

    #[test]
    fn remote_origin_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("origin", "https://evil.example".parse().unwrap());
        assert!(validate_local_origin(&headers).is_err());
    }
}
