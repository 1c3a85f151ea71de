//! The agent loop: invoke the model, dispatch the tools it asked for, feed
//! the results back, repeat.
//!
//! A run ends when the model stops, when the iteration strategy refuses
//! another invocation (`done{length}`), when a call suspends on an approval
//! or a client-side tool (`done{tool_calls, pending}`), when the model
//! stream fails (`error`), or silently when the run is cancelled.

use agentflux_config::AgentConfig;
use agentflux_core::adapter::{Adapter, ChatOptions, ChatRequest};
use agentflux_core::arguments::ArgumentBuffer;
use agentflux_core::chunk::{FinishReason, PendingCall, StreamChunk, StreamEvent, Usage};
use agentflux_core::error::ProtocolError;
use agentflux_core::message::{Conversation, Message, ToolCallRef};
use agentflux_core::resume::ResumeInputs;
use agentflux_core::tool::ToolRegistry;
use agentflux_tools::{CallOutcome, DispatchContext, DispatchOutcome, dispatch};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::iteration::{IterationStrategy, MaxIterations};

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    /// A terminal `done` was emitted.
    Completed(FinishReason),
    /// Calls wait for approvals or client results.
    Suspended(Vec<PendingCall>),
    /// The model stream failed; an `error` event was emitted.
    Failed(String),
    /// The token fired or the consumer went away. Nothing further was emitted.
    Cancelled,
}

/// The conversation as the run left it, plus accounting.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub conversation: Conversation,
    pub status: RunStatus,
    /// Summed over every model invocation of this run
    pub usage: Usage,
    pub invocations: usize,
    /// Sequence number of the last emitted event
    pub last_seq: u64,
}

/// The orchestrator. Cheap to clone; every run gets its own task.
#[derive(Clone)]
pub struct AgentLoop {
    adapter: Arc<dyn Adapter>,
    tools: Arc<ToolRegistry>,
    strategy: Arc<dyn IterationStrategy>,
    options: ChatOptions,
    channel_capacity: usize,
}

impl AgentLoop {
    pub fn new(adapter: Arc<dyn Adapter>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            adapter,
            tools,
            strategy: Arc::new(MaxIterations::default()),
            options: ChatOptions::default(),
            channel_capacity: 64,
        }
    }

    /// Build a loop with the cap and channel sizing from `[agent]`.
    pub fn from_config(
        adapter: Arc<dyn Adapter>,
        tools: Arc<ToolRegistry>,
        config: &AgentConfig,
    ) -> Self {
        Self::new(adapter, tools)
            .with_max_iterations(config.max_iterations as usize)
            .with_channel_capacity(config.channel_capacity)
    }

    pub fn with_max_iterations(self, max: usize) -> Self {
        self.with_strategy(MaxIterations(max))
    }

    pub fn with_strategy(mut self, strategy: impl IterationStrategy + 'static) -> Self {
        self.strategy = Arc::new(strategy);
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Swap the registry, e.g. for a per-request tool selection.
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Advance `conversation` on a background task.
    ///
    /// Outstanding calls of the latest tool turn are resolved first using
    /// `resume`; events are numbered from `cursor + 1`. Dropping the receiver
    /// cancels the run.
    pub fn run(
        &self,
        conversation: Conversation,
        resume: ResumeInputs,
        cursor: u64,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<StreamEvent>, JoinHandle<RunOutcome>) {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let run = Run {
            agent: self.clone(),
            conversation,
            emitter: Emitter {
                tx,
                last_seq: cursor,
                cancel: cancel.clone(),
            },
            cancel,
            usage: Usage::default(),
            invocations: 0,
        };
        (rx, tokio::spawn(run.drive(resume)))
    }
}

/// Numbers events and stops sending once the run is cancelled.
struct Emitter {
    tx: mpsc::Sender<StreamEvent>,
    last_seq: u64,
    cancel: CancellationToken,
}

impl Emitter {
    /// Returns `false` when the event was not delivered; the run must stop.
    async fn emit(&mut self, message_id: &str, chunk: StreamChunk) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let Some(seq) = self.last_seq.checked_add(1) else {
            warn!(cursor = self.last_seq, "Sequence numbers exhausted, stopping run");
            self.cancel.cancel();
            return false;
        };
        let event = StreamEvent {
            seq,
            message_id: message_id.to_string(),
            chunk,
        };
        let delivered = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        };
        if !delivered {
            // A vanished consumer cancels everything downstream of it.
            self.cancel.cancel();
            return false;
        }
        self.last_seq = seq;
        true
    }

    fn last_seq(&self) -> u64 {
        self.last_seq
    }
}

enum TurnEnd {
    /// The model finished; its assistant message sits at `assistant_idx`.
    Finished {
        reason: FinishReason,
        assistant_idx: usize,
    },
    Halted(RunStatus),
}

struct Run {
    agent: AgentLoop,
    conversation: Conversation,
    emitter: Emitter,
    cancel: CancellationToken,
    usage: Usage,
    invocations: usize,
}

impl Run {
    async fn drive(mut self, resume: ResumeInputs) -> RunOutcome {
        info!(
            conversation_id = %self.conversation.id,
            messages = self.conversation.messages.len(),
            "Starting agent run"
        );

        let status = self.advance(&resume).await;
        match &status {
            RunStatus::Completed(reason) => info!(
                conversation_id = %self.conversation.id,
                invocations = self.invocations,
                ?reason,
                "Agent run completed"
            ),
            RunStatus::Suspended(pending) => info!(
                conversation_id = %self.conversation.id,
                pending = pending.len(),
                "Agent run suspended"
            ),
            RunStatus::Failed(message) => warn!(
                conversation_id = %self.conversation.id,
                error = %message,
                "Agent run failed"
            ),
            RunStatus::Cancelled => info!(
                conversation_id = %self.conversation.id,
                "Agent run cancelled"
            ),
        }

        RunOutcome {
            last_seq: self.emitter.last_seq(),
            conversation: self.conversation,
            status,
            usage: self.usage,
            invocations: self.invocations,
        }
    }

    async fn advance(&mut self, resume: &ResumeInputs) -> RunStatus {
        if let Some(status) = self.resume_outstanding(resume).await {
            return status;
        }

        loop {
            if self.cancel.is_cancelled() {
                return RunStatus::Cancelled;
            }

            if !self.agent.strategy.should_continue(self.invocations) {
                warn!(
                    conversation_id = %self.conversation.id,
                    iterations = self.invocations,
                    "Max iterations reached, ending run"
                );
                return self.finish(FinishReason::Length).await;
            }

            let (reason, idx) = match self.model_turn().await {
                TurnEnd::Finished {
                    reason,
                    assistant_idx,
                } => (reason, assistant_idx),
                TurnEnd::Halted(status) => return status,
            };

            let calls = self.conversation.messages[idx].tool_calls.clone();
            if calls.is_empty() {
                // `tool_calls` with nothing to call is a plain stop.
                let reason = match reason {
                    FinishReason::ToolCalls => FinishReason::Stop,
                    other => other,
                };
                return self.finish(reason).await;
            }

            if let Some(status) = self
                .dispatch_calls(idx, calls, &ResumeInputs::default())
                .await
            {
                return status;
            }
        }
    }

    /// Resolve calls a previous exchange left suspended.
    async fn resume_outstanding(&mut self, resume: &ResumeInputs) -> Option<RunStatus> {
        let outstanding = self.conversation.outstanding_tool_calls();
        let Some(idx) = self.conversation.last_tool_turn().filter(|_| !outstanding.is_empty())
        else {
            if !resume.is_empty() {
                warn!(
                    conversation_id = %self.conversation.id,
                    "Ignoring approvals and tool results: no outstanding tool calls"
                );
            }
            return None;
        };

        info!(
            conversation_id = %self.conversation.id,
            outstanding = outstanding.len(),
            "Resuming outstanding tool calls"
        );
        self.dispatch_calls(idx, outstanding, resume).await
    }

    /// One model invocation. Deltas are forwarded as they arrive; the
    /// assistant message is appended once the turn's `done` is seen.
    async fn model_turn(&mut self) -> TurnEnd {
        self.invocations += 1;
        let message_id = Uuid::new_v4().to_string();
        debug!(
            conversation_id = %self.conversation.id,
            iteration = self.invocations,
            "Invoking model"
        );

        let request = ChatRequest {
            messages: self.conversation.messages.clone(),
            tools: self.agent.tools.schemas(),
            options: self.agent.options.clone(),
        };
        let mut stream = match self
            .agent
            .adapter
            .chat_stream(request, self.cancel.clone())
            .await
        {
            Ok(stream) => stream,
            Err(e) => return self.fail(&message_id, e.to_string()).await,
        };

        let mut text = String::new();
        let mut arguments = ArgumentBuffer::new();
        let reason = loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return TurnEnd::Halted(RunStatus::Cancelled),
                _ = self.emitter.tx.closed() => {
                    self.cancel.cancel();
                    return TurnEnd::Halted(RunStatus::Cancelled);
                }
                next = stream.recv() => next,
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return self.fail(&message_id, e.to_string()).await,
                None => {
                    let message = ProtocolError::MissingTerminal.to_string();
                    return self.fail(&message_id, message).await;
                }
            };

            match &chunk {
                StreamChunk::ContentDelta { delta } => text.push_str(delta),
                StreamChunk::ToolCallDelta {
                    call_id,
                    tool_name,
                    arguments_delta,
                } => arguments.push(call_id, tool_name.as_deref(), arguments_delta),
                StreamChunk::ToolProgress { .. } => {}
                StreamChunk::Done {
                    finish_reason,
                    usage,
                    ..
                } => {
                    if let Some(usage) = usage {
                        self.usage += *usage;
                    }
                    break *finish_reason;
                }
                StreamChunk::Error { message } => {
                    let message = message.clone();
                    return self.fail(&message_id, message).await;
                }
                other => {
                    debug!(event = other.event_type(), "Dropping event the model cannot produce");
                    continue;
                }
            }

            if !self.emitter.emit(&message_id, chunk).await {
                return TurnEnd::Halted(RunStatus::Cancelled);
            }
        };

        let mut message = Message::assistant(text).with_id(message_id);
        message.tool_calls = arguments.finish();
        debug!(
            conversation_id = %self.conversation.id,
            ?reason,
            tool_calls = message.tool_calls.len(),
            "Model turn finished"
        );
        self.conversation.push(message);
        TurnEnd::Finished {
            reason,
            assistant_idx: self.conversation.messages.len() - 1,
        }
    }

    /// Dispatch `calls` of the assistant message at `idx`, forwarding
    /// progress while tools run. Returns a status when the run must stop.
    async fn dispatch_calls(
        &mut self,
        idx: usize,
        calls: Vec<ToolCallRef>,
        resume: &ResumeInputs,
    ) -> Option<RunStatus> {
        let message_id = self.conversation.messages[idx].id.clone();
        debug!(
            conversation_id = %self.conversation.id,
            calls = calls.len(),
            "Dispatching tool calls"
        );

        let (progress_tx, mut progress_rx) = mpsc::channel(self.agent.channel_capacity);
        let ctx = DispatchContext::new(self.cancel.clone()).with_progress(progress_tx);
        let tools = self.agent.tools.clone();

        let outcome = {
            let running = dispatch(calls, &tools, resume, &ctx);
            tokio::pin!(running);
            loop {
                tokio::select! {
                    biased;
                    outcome = &mut running => break outcome,
                    Some(chunk) = progress_rx.recv() => {
                        self.emitter.emit(&message_id, chunk).await;
                    }
                }
            }
        };
        while let Ok(chunk) = progress_rx.try_recv() {
            self.emitter.emit(&message_id, chunk).await;
        }

        // Tools were joined either way; a cancelled run discards what they produced.
        if self.cancel.is_cancelled() {
            return Some(RunStatus::Cancelled);
        }

        self.apply(idx, &message_id, outcome).await
    }

    /// Record outcomes in the conversation and announce them in call order.
    async fn apply(
        &mut self,
        idx: usize,
        message_id: &str,
        outcome: DispatchOutcome,
    ) -> Option<RunStatus> {
        for call_outcome in &outcome.outcomes {
            let call = call_outcome.call();
            if let Some(slot) = self.conversation.messages[idx].find_call_mut(&call.id)
                && let Err(e) = slot.transition(call.state)
            {
                warn!(error = %e, "Tool call state out of sync");
            }

            let Some(chunk) = call_outcome.chunk() else {
                continue;
            };
            let delivered = match call_outcome {
                CallOutcome::Resolved {
                    call,
                    output,
                    is_error,
                } => {
                    let result = Message::tool_result(&call.id, &call.name, output, *is_error);
                    let result_id = result.id.clone();
                    self.conversation.push(result);
                    self.emitter.emit(&result_id, chunk).await
                }
                CallOutcome::Suspended { .. } => self.emitter.emit(message_id, chunk).await,
            };
            if !delivered {
                return Some(RunStatus::Cancelled);
            }
        }
        self.conversation.order_tool_results(idx);

        let pending = outcome.pending();
        if pending.is_empty() {
            return None;
        }

        let done = StreamChunk::Done {
            finish_reason: FinishReason::ToolCalls,
            usage: self.total_usage(),
            pending: pending.clone(),
        };
        if !self.emitter.emit(message_id, done).await {
            return Some(RunStatus::Cancelled);
        }
        Some(RunStatus::Suspended(pending))
    }

    async fn finish(&mut self, reason: FinishReason) -> RunStatus {
        let message_id = self
            .conversation
            .messages
            .last()
            .map_or_else(|| Uuid::new_v4().to_string(), |m| m.id.clone());
        let done = StreamChunk::done(reason, self.total_usage());
        if !self.emitter.emit(&message_id, done).await {
            return RunStatus::Cancelled;
        }
        RunStatus::Completed(reason)
    }

    async fn fail(&mut self, message_id: &str, message: String) -> TurnEnd {
        if self.cancel.is_cancelled() {
            return TurnEnd::Halted(RunStatus::Cancelled);
        }
        warn!(
            conversation_id = %self.conversation.id,
            iteration = self.invocations,
            error = %message,
            "Model turn failed"
        );
        if !self
            .emitter
            .emit(message_id, StreamChunk::error(message.clone()))
            .await
        {
            return TurnEnd::Halted(RunStatus::Cancelled);
        }
        TurnEnd::Halted(RunStatus::Failed(message))
    }

    fn total_usage(&self) -> Option<Usage> {
        (self.invocations > 0).then_some(self.usage)
    }
}
