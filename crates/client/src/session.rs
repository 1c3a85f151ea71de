//! A chat session against an agentflux gateway.
//!
//! The session owns the [`ChatStore`] for one conversation. It streams each
//! exchange into the store, runs the local tools it has implementations for
//! when a turn suspends on them, and sends exactly one continuation once
//! every pending call is answered. Calls with no local implementation stay
//! pending until the consumer answers them with [`ChatSession::submit_result`].
//! Only one exchange per session is ever on the wire.

use agentflux_config::ClientConfig;
use agentflux_core::adapter::ChatOptions;
use agentflux_core::chunk::{PendingKind, StreamEvent};
use agentflux_core::error::ProtocolError;
use agentflux_core::message::{Conversation, Message, ToolCallRef};
use agentflux_core::resume::{ChatBody, ClientToolResult};
use futures::StreamExt;
use serde_json::Value;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::decode::EventDecoder;
use crate::error::ClientError;
use crate::state::{Action, ChatState, ChatStatus};
use crate::store::ChatStore;
use crate::tools::ClientToolRegistry;

#[derive(Clone)]
pub struct ChatSession {
    http: reqwest::Client,
    endpoint: String,
    store: Arc<ChatStore>,
    tools: Arc<ClientToolRegistry>,
    tool_selection: Option<Vec<String>>,
    options: Option<ChatOptions>,
    in_flight: Arc<Mutex<()>>,
    /// Token handed to local tools of the current exchange
    local_cancel: Arc<StdMutex<CancellationToken>>,
}

impl ChatSession {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            store: Arc::new(ChatStore::default()),
            tools: Arc::new(ClientToolRegistry::new()),
            tool_selection: None,
            options: None,
            in_flight: Arc::new(Mutex::new(())),
            local_cancel: Arc::new(StdMutex::new(CancellationToken::new())),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.endpoint.clone())
    }

    /// Continue an existing conversation instead of starting a new one.
    pub fn with_conversation(mut self, conversation: Conversation) -> Self {
        self.store = Arc::new(ChatStore::new(ChatState::new(conversation)));
        self
    }

    pub fn with_tools(mut self, tools: ClientToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    /// Restrict the server's tools to these names.
    pub fn with_tool_selection(mut self, names: Vec<String>) -> Self {
        self.tool_selection = Some(names);
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn snapshot(&self) -> ChatState {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.store.subscribe()
    }

    /// Send a user prompt and drive the conversation until it finishes or
    /// needs the user.
    pub async fn send(&self, text: impl Into<String>) -> Result<ChatState, ClientError> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| ClientError::ContinuationInFlight)?;
        self.store
            .dispatch(Action::UserMessage(Message::user(text.into())));
        self.drive().await
    }

    /// Answer an approval request. The continuation leaves once every
    /// pending call is answered; until then this only records the decision.
    pub async fn decide(&self, call_id: &str, approved: bool) -> Result<ChatState, ClientError> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| ClientError::ContinuationInFlight)?;

        let awaiting = self
            .store
            .snapshot()
            .pending_of(PendingKind::Approval)
            .any(|p| p.call_id == call_id);
        if !awaiting {
            return Err(ClientError::NotAwaitingApproval(call_id.to_string()));
        }

        info!(call_id, approved, "Approval decided");
        self.store.dispatch(Action::Decide {
            call_id: call_id.to_string(),
            approved,
        });
        self.continue_if_ready().await
    }

    /// Answer a client tool call this session has no implementation for.
    /// Like [`decide`](Self::decide), the continuation leaves once every
    /// pending call is answered.
    pub async fn submit_result(&self, result: ClientToolResult) -> Result<ChatState, ClientError> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| ClientError::ContinuationInFlight)?;

        let awaiting = self
            .store
            .snapshot()
            .pending_of(PendingKind::ClientExecution)
            .any(|p| p.call_id == result.call_id);
        if !awaiting {
            return Err(ClientError::NotAwaitingResult(result.call_id));
        }

        info!(call_id = %result.call_id, is_error = result.error.is_some(), "Tool result supplied");
        self.store.dispatch(Action::ClientResult(result));
        self.continue_if_ready().await
    }

    /// Ask the server to cancel this conversation's active run. Local tools
    /// still running see the cancellation through their context.
    pub async fn cancel(&self) -> Result<(), ClientError> {
        self.local_token().cancel();
        let id = self.store.snapshot().conversation.id;
        let url = format!("{}/v1/chat/{id}/cancel", self.endpoint);
        let response = self.http.post(&url).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(())
    }

    async fn continue_if_ready(&self) -> Result<ChatState, ClientError> {
        let state = self.store.snapshot();
        if !state.ready_to_continue() {
            return Ok(state);
        }
        self.drive().await
    }

    fn local_token(&self) -> CancellationToken {
        self.local_cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn drive(&self) -> Result<ChatState, ClientError> {
        // A fresh token per drive; an earlier cancel must not poison it.
        let cancel = CancellationToken::new();
        *self.local_cancel.lock().unwrap_or_else(|e| e.into_inner()) = cancel.clone();

        loop {
            self.exchange().await?;

            let state = self.store.snapshot();
            if state.status != ChatStatus::AwaitingInput {
                return Ok(state);
            }

            let local: Vec<ToolCallRef> = state
                .pending_of(PendingKind::ClientExecution)
                .filter(|p| self.tools.get(&p.tool_name).is_some())
                .map(|p| {
                    let mut call = ToolCallRef::new(p.call_id.clone(), p.tool_name.clone());
                    call.arguments = p.arguments.to_string();
                    call
                })
                .collect();
            if !local.is_empty() {
                debug!(calls = local.len(), "Running local tools");
                for result in self.tools.run_all(local, &cancel).await {
                    self.store.dispatch(Action::ClientResult(result));
                }
            }

            let state = self.store.snapshot();
            if !state.ready_to_continue() {
                return Ok(state);
            }
            debug!(cursor = state.last_seq, "Sending continuation");
        }
    }

    /// One HTTP exchange, streamed into the store.
    async fn exchange(&self) -> Result<(), ClientError> {
        let state = self.store.snapshot();
        let body = ChatBody {
            conversation: state.conversation,
            tools: self.tool_selection.clone(),
            options: self.options.clone(),
            tool_results: state.results,
            approvals: state.decisions,
            cursor: state.last_seq,
        };
        self.store.dispatch(Action::Submitting);

        let url = format!("{}/v1/chat", self.endpoint);
        let response = match self.http.post(&url).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                let err = ClientError::from(e);
                self.store.dispatch(Action::Failed(err.to_string()));
                return Err(err);
            }
        };

        let status = response.status();
        if status.as_u16() == 499 {
            self.store.dispatch(Action::StreamClosed);
            return Err(ClientError::ClosedEarly);
        }
        if !status.is_success() {
            let err = status_error(response).await;
            self.store.dispatch(Action::Failed(err.to_string()));
            return Err(err);
        }
        self.store.dispatch(Action::Accepted);

        let mut decoder = EventDecoder::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    for event in decoder.push(&bytes) {
                        self.apply(event);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Event stream broke off");
                    break;
                }
            }
        }
        if let Some(event) = decoder.finish() {
            self.apply(event);
        }
        self.store.dispatch(Action::StreamClosed);
        Ok(())
    }

    fn apply(&self, event: Result<StreamEvent, ProtocolError>) {
        match event {
            Ok(event) => self.store.dispatch(Action::Event(event)),
            Err(e) => warn!(error = %e, "Skipping malformed frame"),
        }
    }
}

async fn status_error(response: reqwest::Response) -> ClientError {
    let status = response.status();
    let message = response
        .json::<Value>()
        .await
        .ok()
        .and_then(|v| v["error"].as_str().map(String::from))
        .unwrap_or_else(|| status.to_string());
    ClientError::Status {
        status: status.as_u16(),
        message,
    }
}
