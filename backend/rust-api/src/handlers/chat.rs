use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;

use crate::models::chat::ChatRequest;
use crate::services::chat_service::ChatService;
use crate::services::AppState;

/// POST /api/chat/stream
///
/// Token stream over SSE. Context failures arrive in-band as
/// `data: {"error": ...}` frames, so the response itself is always 200.
/// When the client disconnects, axum drops the stream and the upstream
/// generation request is aborted with it.
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> impl IntoResponse {
    tracing::info!(
        "Chat stream requested: course={}, module={}",
        request.course_id,
        request.module_index
    );

    let service = ChatService::new(state.mongo.clone(), state.generator.clone());
    let payloads = service.open_stream(request).await;

    let events = payloads.map(|payload| Ok::<Event, Infallible>(Event::default().data(payload)));

    Sse::new(events).keep_alive(KeepAlive::default())
}
