//! HTTP API v1.
//!
//! Endpoints:
//!
//! - `POST /v1/chat`               advance a conversation, receive an SSE stream
//! - `POST /v1/chat/{id}/cancel`   cancel the conversation's active run
//! - `GET  /v1/tools`              list available tools

use axum::{
    Router,
    extract::rejection::JsonRejection,
    extract::{Path, State},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};

use agentflux_core::chunk::StreamEvent;
use agentflux_core::resume::ChatBody;
use agentflux_core::tool::ToolInfo;

use crate::SharedState;
use crate::error::GatewayError;

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat/{id}/cancel", post(cancel_handler))
        .route("/tools", get(list_tools_handler))
        .with_state(state)
}

// ── Chat ──────────────────────────────────────────────────────────────────

/// `POST /v1/chat`: run the loop and stream its events.
///
/// The status line is only committed once the first event exists, so a
/// run cancelled before that answers 499 and a run that died answers 500.
async fn chat_handler(
    State(state): State<SharedState>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let Json(body) = body.map_err(|e| GatewayError::BadRequest(e.body_text()))?;
    if body.conversation.messages.is_empty() {
        return Err(GatewayError::BadRequest(
            "conversation has no messages".into(),
        ));
    }
    if body.cursor == u64::MAX {
        return Err(GatewayError::BadRequest("cursor is out of range".into()));
    }

    let mut agent = state.agent.clone();
    if let Some(names) = &body.tools {
        let selected = agent
            .tools()
            .select(names)
            .map_err(|e| GatewayError::BadRequest(e.to_string()))?;
        agent = agent.with_tools(Arc::new(selected));
    }
    if let Some(options) = body.options.clone() {
        agent = agent.with_options(options);
    }

    let conversation_id = body.conversation.id.to_string();
    let ticket = state.runs.begin(&conversation_id)?;
    let cancel = ticket.token();
    // Dropping the response body (client gone) cancels the run.
    let guard = cancel.clone().drop_guard();

    info!(
        conversation_id = %conversation_id,
        cursor = body.cursor,
        approvals = body.approvals.len(),
        tool_results = body.tool_results.len(),
        "v1/chat request"
    );

    let (conversation, resume, cursor) = body.into_parts();
    let (mut rx, handle) = agent.run(conversation, resume, cursor, cancel.clone());

    let first = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        first = rx.recv() => first,
    };
    let Some(first) = first else {
        if cancel.is_cancelled() {
            info!(conversation_id = %conversation_id, "Cancelled before first event");
            return Err(GatewayError::ClientClosed);
        }
        return Err(match handle.await {
            Err(e) => {
                error!(conversation_id = %conversation_id, error = %e, "Agent run crashed");
                GatewayError::Internal(format!("agent run failed: {e}"))
            }
            Ok(_) => GatewayError::Internal("agent run produced no events".into()),
        });
    };

    let stream = tokio_stream::once(first)
        .chain(ReceiverStream::new(rx))
        .map(move |event| {
            let _held = (&ticket, &guard);
            Ok::<_, Infallible>(sse_frame(&event))
        });

    Ok(Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response())
}

fn sse_frame(event: &StreamEvent) -> SseEvent {
    let data = serde_json::to_string(event).unwrap_or_default();
    SseEvent::default()
        .event(event.chunk.event_type())
        .id(event.seq.to_string())
        .data(data)
}

#[derive(Serialize)]
struct CancelResponse {
    cancelled: bool,
}

/// `POST /v1/chat/{id}/cancel`
async fn cancel_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, GatewayError> {
    state.runs.cancel(&id)?;
    info!(conversation_id = %id, "Run cancelled on request");
    Ok(Json(CancelResponse { cancelled: true }))
}

// ── Tools ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
    count: usize,
}

/// `GET /v1/tools`
async fn list_tools_handler(State(state): State<SharedState>) -> Json<ToolListResponse> {
    let tools = state.agent.tools().infos();
    Json(ToolListResponse {
        count: tools.len(),
        tools,
    })
}
