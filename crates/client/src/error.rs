use agentflux_core::error::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Server answered {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Server closed the request before streaming")]
    ClosedEarly,

    /// A continuation for this conversation is already on the wire.
    #[error("A continuation is already in flight for this conversation")]
    ContinuationInFlight,

    #[error("No pending approval for call {0}")]
    NotAwaitingApproval(String),

    #[error("No pending client tool call {0}")]
    NotAwaitingResult(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}
