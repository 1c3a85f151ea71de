//! `agentflux chat`: send one prompt to a gateway and stream the answer.
//!
//! Approval requests are asked on stdin unless `--yes` was given. The
//! `getLocation` client tool runs locally.

use agentflux_client::{ChatSession, ChatState, ChatStatus, ClientError, ClientToolRegistry};
use agentflux_config::AppConfig;
use agentflux_core::chunk::{PendingCall, PendingKind};
use agentflux_core::error::ToolError;
use agentflux_core::message::Role;
use agentflux_core::tool::{Tool, ToolContext};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::io::{self, BufRead, Write};
use tokio::sync::watch;
use tracing::{info, warn};

pub async fn run(
    message: String,
    yes: bool,
    endpoint: Option<String>,
    location: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let endpoint = endpoint.unwrap_or_else(|| config.client.endpoint.clone());

    let mut tools = ClientToolRegistry::new();
    tools.register(DeviceLocation { city: location });
    let session = ChatSession::new(endpoint).with_tools(tools);

    let mut rx = session.subscribe();
    let mut view = Transcript::default();

    let mut state = follow(&session, session.send(message), &mut rx, &mut view).await?;
    while state.status == ChatStatus::AwaitingInput {
        let approvals: Vec<PendingCall> =
            state.pending_of(PendingKind::Approval).cloned().collect();
        if approvals.is_empty() {
            break;
        }
        for call in approvals {
            let approved = yes || ask(&call).await?;
            let decided = session.decide(&call.call_id, approved);
            state = follow(&session, decided, &mut rx, &mut view).await?;
        }
    }
    view.finish();

    info!(
        prompt_tokens = state.usage.prompt_tokens,
        completion_tokens = state.usage.completion_tokens,
        "Conversation finished"
    );

    match state.status {
        ChatStatus::Failed => Err(state.error.unwrap_or_else(|| "request failed".into()).into()),
        ChatStatus::Closed => Err("stream closed before the turn finished".into()),
        ChatStatus::AwaitingInput => {
            let waiting: Vec<&str> = state
                .pending_of(PendingKind::ClientExecution)
                .map(|p| p.tool_name.as_str())
                .collect();
            Err(format!("turn is waiting on client tools: {}", waiting.join(", ")).into())
        }
        _ => Ok(()),
    }
}

/// Await `exchange`, rendering every store update as it lands. Ctrl-C
/// cancels the server run.
async fn follow(
    session: &ChatSession,
    exchange: impl Future<Output = Result<ChatState, ClientError>>,
    rx: &mut watch::Receiver<ChatState>,
    view: &mut Transcript,
) -> Result<ChatState, ClientError> {
    tokio::pin!(exchange);
    let mut interrupted = false;
    loop {
        tokio::select! {
            result = &mut exchange => {
                view.render(&rx.borrow_and_update());
                return result;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    return exchange.await;
                }
                view.render(&rx.borrow_and_update());
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                if let Err(e) = session.cancel().await {
                    warn!(error = %e, "Cancel request failed");
                }
            }
        }
    }
}

async fn ask(call: &PendingCall) -> io::Result<bool> {
    let prompt = format!("\nAllow {}({})? [y/N] ", call.tool_name, call.arguments);
    tokio::task::spawn_blocking(move || {
        eprint!("{prompt}");
        io::stderr().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(is_yes(&line))
    })
    .await
    .map_err(io::Error::other)?
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Incremental terminal rendering of a reconciled conversation.
#[derive(Default)]
struct Transcript {
    /// Bytes of assistant text already printed, per message id
    printed: HashMap<String, usize>,
    /// Tool messages already announced
    announced: HashSet<String>,
    line_open: bool,
}

impl Transcript {
    fn render(&mut self, state: &ChatState) {
        let mut out = io::stdout().lock();
        for message in &state.conversation.messages {
            match message.role {
                Role::Assistant => {
                    let text = message.text();
                    let done = self.printed.entry(message.id.clone()).or_insert(0);
                    if let Some(fresh) = text.get(*done..).filter(|s| !s.is_empty()) {
                        let _ = write!(out, "{fresh}");
                        *done = text.len();
                        self.line_open = true;
                    }
                }
                Role::Tool if self.announced.insert(message.id.clone()) => {
                    if self.line_open {
                        let _ = writeln!(out);
                        self.line_open = false;
                    }
                    let marker = if message.is_error { "failed" } else { "ok" };
                    let _ = writeln!(
                        out,
                        "  [{} {marker}] {}",
                        message.tool_name.as_deref().unwrap_or("tool"),
                        message.text()
                    );
                }
                _ => {}
            }
        }
        let _ = out.flush();
    }

    fn finish(&mut self) {
        if self.line_open {
            println!();
            self.line_open = false;
        }
    }
}

/// Client side of the `getLocation` tool.
struct DeviceLocation {
    city: Option<String>,
}

#[async_trait]
impl Tool for DeviceLocation {
    fn name(&self) -> &str {
        "getLocation"
    }

    fn description(&self) -> &str {
        "Read the user's current location from their device."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
        match &self.city {
            Some(city) => Ok(json!({ "city": city })),
            None => Err(ToolError::ExecutionFailed {
                tool_name: "getLocation".into(),
                reason: "location unavailable; pass --location".into(),
            }),
        }
    }
}
