//! WebSocket endpoint for devices.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;

use super::{ChannelTransport, OutboundFrame};
use crate::config::ServerConfig;
use crate::error::Result;
use crate::router::MessageRouter;
use crate::session::ChatSession;

const DEVICE_ID_HEADER: &str = "device-id";

#[derive(serde::Deserialize)]
struct ConnectQuery {
    #[serde(default)]
    device_id: Option<String>,
}

/// Build the HTTP router: the device socket plus a health probe.
pub fn routes(router: MessageRouter, ws_path: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(ws_path, get(connect))
        .with_state(router)
}

/// Serve devices until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an I/O error if the listener cannot be bound or the server fails.
pub async fn serve(config: &ServerConfig, router: MessageRouter, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    let local_addr = listener.local_addr()?;
    let app = routes(router, &config.ws_path);

    tracing::info!("device gateway listening on ws://{local_addr}{}", config.ws_path);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn health(State(router): State<MessageRouter>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": router.sessions().session_count(),
    }))
}

fn device_id_from(headers: &HeaderMap, query: &ConnectQuery) -> Option<String> {
    headers
        .get(DEVICE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .or(query.device_id.as_deref())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
}

async fn connect(
    ws: WebSocketUpgrade,
    State(router): State<MessageRouter>,
    headers: HeaderMap,
    Query(query): Query<ConnectQuery>,
) -> Response {
    let Some(device_id) = device_id_from(&headers, &query) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "device-id is required"})),
        )
            .into_response();
    };
    ws.on_upgrade(move |socket| serve_socket(socket, router, device_id))
}

/// Drive one device connection from open to close.
///
/// Inbound frames are handled one at a time; outbound frames are written by
/// a separate task fed from the session's [`ChannelTransport`].
pub async fn serve_socket(socket: WebSocket, router: MessageRouter, device_id: String) {
    let (mut sink, mut stream) = socket.split();
    let (transport, mut outbound) = ChannelTransport::new();
    let session_id = uuid::Uuid::new_v4().to_string();
    let session = Arc::new(ChatSession::new(session_id.clone(), Arc::new(transport)));

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let message = match frame {
                OutboundFrame::Text(text) => Message::Text(text.into()),
                OutboundFrame::Binary(data) => Message::Binary(data),
                OutboundFrame::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    tracing::info!(%session_id, %device_id, "device connected");
    if let Err(e) = router.on_open(Arc::clone(&session), &device_id).await {
        tracing::warn!(%session_id, %device_id, error = %e, "connection rejected");
    }

    let lifetime = session.lifetime().clone();
    loop {
        let next = tokio::select! {
            () = lifetime.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(Message::Text(text))) => router.handle_text_frame(&session_id, text.as_str()).await,
            Some(Ok(Message::Binary(data))) => router.on_binary_frame(&session_id, data).await,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::debug!(%session_id, error = %e, "socket read failed");
                break;
            }
        }
    }

    router.on_close(&session_id);
    drop(session);
    let _ = writer.await;
    tracing::info!(%session_id, %device_id, "device disconnected");
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn header_wins_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert(DEVICE_ID_HEADER, "aa:bb".parse().unwrap());
        let query = ConnectQuery {
            device_id: Some("cc:dd".to_owned()),
        };
        assert_eq!(device_id_from(&headers, &query).as_deref(), Some("aa:bb"));
    }

    #[test]
    fn query_is_fallback_and_blank_is_rejected() {
        let headers = HeaderMap::new();
        let query = ConnectQuery {
            device_id: Some("cc:dd".to_owned()),
        };
        assert_eq!(device_id_from(&headers, &query).as_deref(), Some("cc:dd"));
        let blank = ConnectQuery {
            device_id: Some("  ".to_owned()),
        };
        assert_eq!(device_id_from(&headers, &blank), None);
    }
}
