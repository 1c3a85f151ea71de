//! Turn gateway SSE bytes into sequenced protocol events.

use agentflux_core::chunk::StreamEvent;
use agentflux_core::error::ProtocolError;
use agentflux_core::sse::{SseDecoder, SseFrame};

#[derive(Debug, Default)]
pub struct EventDecoder {
    sse: SseDecoder,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every event completed by them, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Result<StreamEvent, ProtocolError>> {
        self.sse.push(bytes).into_iter().map(parse).collect()
    }

    pub fn finish(&mut self) -> Option<Result<StreamEvent, ProtocolError>> {
        self.sse.finish().map(parse)
    }
}

fn parse(frame: SseFrame) -> Result<StreamEvent, ProtocolError> {
    let event: StreamEvent = serde_json::from_str(&frame.data)
        .map_err(|e| ProtocolError::MalformedFrame(format!("{e}: {}", frame.data)))?;
    if let Some(name) = &frame.event
        && name != event.chunk.event_type()
    {
        return Err(ProtocolError::MalformedFrame(format!(
            "frame named '{name}' carries a '{}' event",
            event.chunk.event_type()
        )));
    }
    Ok(event)
}
