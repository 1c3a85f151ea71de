//! Plumbing shared by the HTTP adapters: status mapping and the task that
//! pumps a provider's SSE body into a chunk pipe.

use agentflux_core::adapter::{Adapter, ChatOptions, ChatRequest, ChunkReceiver};
use agentflux_core::chunk::StreamChunk;
use agentflux_core::error::AdapterError;
use agentflux_core::message::Message;
use agentflux_core::sse::{SseDecoder, SseFrame};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Translates one provider's SSE frames into protocol chunks.
pub(crate) trait FrameParser: Send + 'static {
    /// Chunks produced by one frame. A terminal chunk ends the stream.
    fn frame(&mut self, frame: &SseFrame) -> Vec<StreamChunk>;

    /// The body ended without a terminal frame.
    fn finish(&mut self) -> Result<StreamChunk, AdapterError>;
}

/// Map non-success statuses to adapter errors.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, AdapterError> {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        return Err(AdapterError::RateLimited { retry_after_secs });
    }

    if status == 401 || status == 403 {
        return Err(AdapterError::AuthenticationFailed(format!(
            "{provider} rejected the API key"
        )));
    }

    if status != 200 {
        let error_body = response.text().await.unwrap_or_default();
        warn!(provider, status, body = %error_body, "Provider streaming error");
        return Err(AdapterError::ApiError {
            status_code: status,
            message: error_body,
        });
    }

    Ok(response)
}

/// Spawn the task that reads `response` and feeds `parser`.
///
/// Cancellation drops the body, which closes the connection.
pub(crate) fn pump<P: FrameParser>(
    provider: String,
    response: reqwest::Response,
    mut parser: P,
    cancel: CancellationToken,
    capacity: usize,
) -> ChunkReceiver {
    let (tx, rx) = mpsc::channel(capacity);

    tokio::spawn(async move {
        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(provider = %provider, "Stream cancelled, dropping body");
                    return;
                }
                next = body.next() => next,
            };

            let Some(next) = next else { break };
            let bytes = match next {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = tx.send(Err(AdapterError::StreamInterrupted(e.to_string()))).await;
                    return;
                }
            };

            for frame in decoder.push(&bytes) {
                if !forward(&tx, parser.frame(&frame)).await {
                    return;
                }
            }
        }

        if let Some(frame) = decoder.finish()
            && !forward(&tx, parser.frame(&frame)).await
        {
            return;
        }

        let _ = tx.send(parser.finish()).await;
    });

    rx
}

/// Send chunks in order. Returns false once the stream is over, either
/// because a terminal was sent or the receiver went away.
async fn forward(
    tx: &mpsc::Sender<Result<StreamChunk, AdapterError>>,
    chunks: Vec<StreamChunk>,
) -> bool {
    for chunk in chunks {
        let terminal = chunk.is_terminal();
        if tx.send(Ok(chunk)).await.is_err() || terminal {
            return false;
        }
    }
    true
}

/// Summarize by running one tool-less turn and collecting its text.
pub(crate) async fn summarize_with(
    adapter: &dyn Adapter,
    text: &str,
    options: &ChatOptions,
) -> Result<String, AdapterError> {
    let request = ChatRequest {
        messages: vec![
            Message::system("Summarize the following text concisely. Reply with the summary only."),
            Message::user(text),
        ],
        tools: Vec::new(),
        options: options.clone(),
    };

    let mut rx = adapter.chat_stream(request, CancellationToken::new()).await?;
    let mut summary = String::new();
    while let Some(chunk) = rx.recv().await {
        match chunk? {
            StreamChunk::ContentDelta { delta } => summary.push_str(&delta),
            StreamChunk::Error { message } => return Err(AdapterError::StreamInterrupted(message)),
            StreamChunk::Done { .. } => return Ok(summary),
            _ => {}
        }
    }
    Err(AdapterError::StreamInterrupted(
        "stream ended without a terminal event".into(),
    ))
}
