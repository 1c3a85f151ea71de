//! The reconciliation state machine.
//!
//! [`reduce`] is a pure function from a snapshot and an [`Action`] to the
//! next snapshot. Every protocol event, user decision and locally produced
//! tool result goes through it, so replaying a log rebuilds the same view.
//!
//! Messages are only ever created from events (plus the user's own
//! prompts). Local tool results and approval decisions are recorded as
//! *unsent* and travel to the server in the next continuation; the server
//! echoes them back as `tool-result` events, which is when the tool message
//! appears.

use agentflux_core::chunk::{
    FinishReason, PendingCall, PendingKind, StreamChunk, StreamEvent, Usage,
};
use agentflux_core::message::{Conversation, Message, Role, ToolCallRef, ToolCallState};
use agentflux_core::resume::{ApprovalDecision, ClientToolResult};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Where the conversation stands, as a UI would render it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChatStatus {
    #[default]
    Idle,
    /// A request is on the wire; nothing streamed back yet.
    Submitting,
    Streaming,
    /// The turn suspended on approvals or client-side tools.
    AwaitingInput,
    Done,
    Failed,
    /// The stream ended without a terminal event.
    Closed,
}

#[derive(Debug, Clone, Default)]
pub struct ChatState {
    pub conversation: Conversation,
    pub status: ChatStatus,
    /// Highest sequence number applied
    pub last_seq: u64,
    /// Calls still waiting on the user or a local tool
    pub pending: Vec<PendingCall>,
    /// Decisions not yet sent to the server
    pub decisions: Vec<ApprovalDecision>,
    /// Local tool results not yet sent to the server
    pub results: Vec<ClientToolResult>,
    /// Latest progress message per call id
    pub progress: BTreeMap<String, String>,
    /// Summed over every terminal `done`
    pub usage: Usage,
    pub finish_reason: Option<FinishReason>,
    pub error: Option<String>,
}

impl ChatState {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            ..Self::default()
        }
    }

    /// Every pending call is answered and there is something to send.
    pub fn ready_to_continue(&self) -> bool {
        self.status == ChatStatus::AwaitingInput
            && self.pending.is_empty()
            && (!self.decisions.is_empty() || !self.results.is_empty())
    }

    pub fn pending_of(&self, kind: PendingKind) -> impl Iterator<Item = &PendingCall> {
        self.pending.iter().filter(move |p| p.kind == kind)
    }

    pub fn find_call(&self, call_id: &str) -> Option<&ToolCallRef> {
        self.conversation
            .messages
            .iter()
            .rev()
            .find_map(|m| m.find_call(call_id))
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    /// The user typed a prompt.
    UserMessage(Message),
    /// A request left; the status line is not in yet.
    Submitting,
    /// The server accepted the request; unsent inputs went with it.
    Accepted,
    /// One event off the wire.
    Event(StreamEvent),
    /// The user answered an approval request.
    Decide { call_id: String, approved: bool },
    /// A local tool finished.
    ClientResult(ClientToolResult),
    /// The transport stream ended.
    StreamClosed,
    /// The request failed before or while streaming.
    Failed(String),
}

/// Apply `action` to `state`.
pub fn reduce(mut state: ChatState, action: &Action) -> ChatState {
    match action {
        Action::UserMessage(message) => {
            state.conversation.push(message.clone());
            state.finish_reason = None;
            state.error = None;
        }
        Action::Submitting => {
            state.status = ChatStatus::Submitting;
            state.error = None;
        }
        Action::Accepted => {
            state.decisions.clear();
            state.results.clear();
        }
        Action::Event(event) => apply_event(&mut state, event),
        Action::Decide { call_id, approved } => {
            let Some(index) = state
                .pending
                .iter()
                .position(|p| &p.call_id == call_id && p.kind == PendingKind::Approval)
            else {
                warn!(call_id, "Decision for a call that is not awaiting approval");
                return state;
            };
            state.pending.remove(index);
            state.decisions.retain(|d| &d.call_id != call_id);
            state.decisions.push(ApprovalDecision {
                call_id: call_id.clone(),
                approved: *approved,
            });
        }
        Action::ClientResult(result) => {
            let Some(index) = state.pending.iter().position(|p| {
                p.call_id == result.call_id && p.kind == PendingKind::ClientExecution
            }) else {
                warn!(call_id = %result.call_id, "Local result for a call nobody is waiting on");
                return state;
            };
            state.pending.remove(index);
            let (_, is_error) = result.payload();
            set_call_state(
                &mut state.conversation,
                &result.call_id,
                if is_error {
                    ToolCallState::Error
                } else {
                    ToolCallState::Complete
                },
            );
            state.results.retain(|r| r.call_id != result.call_id);
            state.results.push(result.clone());
        }
        Action::StreamClosed => {
            if matches!(state.status, ChatStatus::Submitting | ChatStatus::Streaming) {
                state.status = ChatStatus::Closed;
            }
        }
        Action::Failed(message) => {
            state.status = ChatStatus::Failed;
            state.error = Some(message.clone());
        }
    }
    state
}

fn apply_event(state: &mut ChatState, event: &StreamEvent) {
    if event.seq <= state.last_seq {
        debug!(seq = event.seq, last = state.last_seq, "Skipping already applied event");
        return;
    }
    state.last_seq = event.seq;
    if state.status == ChatStatus::Submitting {
        state.status = ChatStatus::Streaming;
    }

    let conversation = &mut state.conversation;
    match &event.chunk {
        StreamChunk::ContentDelta { delta } => {
            assistant(conversation, &event.message_id)
                .content
                .push_text(delta);
        }
        StreamChunk::ToolCallDelta {
            call_id,
            tool_name,
            arguments_delta,
        } => {
            let message = assistant(conversation, &event.message_id);
            let call = match message.tool_calls.iter().position(|c| &c.id == call_id) {
                Some(index) => &mut message.tool_calls[index],
                None => {
                    message
                        .tool_calls
                        .push(ToolCallRef::new(call_id.clone(), String::new()));
                    let last = message.tool_calls.len() - 1;
                    &mut message.tool_calls[last]
                }
            };
            if call.name.is_empty()
                && let Some(name) = tool_name
            {
                call.name = name.clone();
            }
            call.arguments.push_str(arguments_delta);
        }
        StreamChunk::ToolProgress {
            call_id, message, ..
        } => {
            if let Some(message) = message {
                state.progress.insert(call_id.clone(), message.clone());
            }
        }
        StreamChunk::ApprovalRequest {
            call_id,
            tool_name,
            arguments,
        } => {
            if conversation.find_call_mut(call_id).is_none() {
                // The deltas went to an earlier exchange we never saw.
                let mut call = ToolCallRef::new(call_id.clone(), tool_name.clone());
                call.arguments = arguments.to_string();
                assistant(conversation, &event.message_id).tool_calls.push(call);
            }
            set_call_state(conversation, call_id, ToolCallState::AwaitingApproval);
        }
        StreamChunk::ToolResult {
            call_id,
            tool_name,
            output,
            is_error,
        } => {
            let exists = conversation.messages.iter().any(|m| m.id == event.message_id);
            if !exists {
                let message =
                    Message::tool_result(call_id.clone(), tool_name.clone(), output, *is_error)
                        .with_id(event.message_id.clone());
                conversation.push(message);
            }
            set_call_state(
                conversation,
                call_id,
                if *is_error {
                    ToolCallState::Error
                } else {
                    ToolCallState::Complete
                },
            );
            if let Some(idx) = conversation
                .messages
                .iter()
                .position(|m| m.find_call(call_id).is_some())
            {
                conversation.order_tool_results(idx);
            }
            state.progress.remove(call_id);
        }
        StreamChunk::Done {
            finish_reason,
            usage,
            pending,
        } => {
            if let Some(usage) = usage {
                state.usage += *usage;
            }
            state.finish_reason = Some(*finish_reason);
            for call in pending {
                let next = match call.kind {
                    PendingKind::Approval => ToolCallState::AwaitingApproval,
                    PendingKind::ClientExecution => ToolCallState::PendingExecution,
                };
                set_call_state(conversation, &call.call_id, next);
            }
            state.pending = pending.clone();
            state.status = if pending.is_empty() {
                ChatStatus::Done
            } else {
                ChatStatus::AwaitingInput
            };
        }
        StreamChunk::Error { message } => {
            state.status = ChatStatus::Failed;
            state.error = Some(message.clone());
        }
    }
}

/// The assistant message `id`, created at the end if it is new.
fn assistant<'a>(conversation: &'a mut Conversation, id: &str) -> &'a mut Message {
    let index = match conversation.messages.iter().position(|m| m.id == id) {
        Some(index) => index,
        None => {
            conversation.push(Message::assistant(String::new()).with_id(id));
            conversation.messages.len() - 1
        }
    };
    &mut conversation.messages[index]
}

fn set_call_state(conversation: &mut Conversation, call_id: &str, next: ToolCallState) {
    let Some(call) = conversation.find_call_mut(call_id) else {
        warn!(call_id, "Event for an unknown tool call");
        return;
    };
    if let Err(e) = call.transition(next) {
        debug!(error = %e, "Ignoring stale tool call state");
    }
}

/// Convenience for tests and tools: the text of every assistant message.
pub fn assistant_text(state: &ChatState) -> String {
    state
        .conversation
        .messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .map(Message::text)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(seq: u64, message_id: &str, chunk: StreamChunk) -> Action {
        Action::Event(StreamEvent {
            seq,
            message_id: message_id.into(),
            chunk,
        })
    }

    fn run(actions: &[Action]) -> ChatState {
        actions.iter().fold(ChatState::default(), reduce)
    }

    fn cart_log() -> Vec<Action> {
        vec![
            event(
                1,
                "a1",
                StreamChunk::ToolCallDelta {
                    call_id: "c1".into(),
                    tool_name: Some("addToCart".into()),
                    arguments_delta: r#"{"itemId":"#.into(),
                },
            ),
            event(
                2,
                "a1",
                StreamChunk::ToolCallDelta {
                    call_id: "c1".into(),
                    tool_name: None,
                    arguments_delta: r#""sku-1","qty":2}"#.into(),
                },
            ),
            event(
                3,
                "a1",
                StreamChunk::ApprovalRequest {
                    call_id: "c1".into(),
                    tool_name: "addToCart".into(),
                    arguments: json!({"itemId": "sku-1", "qty": 2}),
                },
            ),
            event(
                4,
                "a1",
                StreamChunk::Done {
                    finish_reason: FinishReason::ToolCalls,
                    usage: None,
                    pending: vec![PendingCall {
                        call_id: "c1".into(),
                        tool_name: "addToCart".into(),
                        kind: PendingKind::Approval,
                        arguments: json!({"itemId": "sku-1", "qty": 2}),
                    }],
                },
            ),
        ]
    }

    #[test]
    fn content_deltas_build_one_message() {
        let state = run(&[
            Action::Submitting,
            event(1, "a1", StreamChunk::content("Hel")),
            event(2, "a1", StreamChunk::content("lo")),
            event(3, "a1", StreamChunk::done(FinishReason::Stop, None)),
        ]);
        assert_eq!(state.conversation.messages.len(), 1);
        assert_eq!(assistant_text(&state), "Hello");
        assert_eq!(state.status, ChatStatus::Done);
        assert_eq!(state.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn first_event_moves_submitting_to_streaming() {
        let state = run(&[Action::Submitting, event(1, "a1", StreamChunk::content("x"))]);
        assert_eq!(state.status, ChatStatus::Streaming);
    }

    #[test]
    fn argument_fragments_concatenate() {
        let state = run(&cart_log());
        let call = state.find_call("c1").unwrap();
        assert_eq!(call.name, "addToCart");
        assert_eq!(
            call.parsed_arguments().unwrap(),
            json!({"itemId": "sku-1", "qty": 2})
        );
        assert_eq!(call.state, ToolCallState::AwaitingApproval);
        assert_eq!(state.status, ChatStatus::AwaitingInput);
    }

    #[test]
    fn replayed_events_are_ignored() {
        let mut log = cart_log();
        log.extend(cart_log());
        let replayed = run(&log);
        let live = run(&cart_log());
        assert_eq!(replayed.conversation.messages, live.conversation.messages);
        assert_eq!(replayed.last_seq, 4);
    }

    #[test]
    fn approval_is_never_auto_resolved() {
        let state = run(&cart_log());
        assert!(!state.ready_to_continue());
        assert!(state.decisions.is_empty());
    }

    #[test]
    fn decision_unblocks_continuation() {
        let mut log = cart_log();
        log.push(Action::Decide {
            call_id: "c1".into(),
            approved: true,
        });
        let state = run(&log);
        assert!(state.pending.is_empty());
        assert!(state.ready_to_continue());

        let state = reduce(state, &Action::Accepted);
        assert!(state.decisions.is_empty());
    }

    #[test]
    fn decision_for_unknown_call_is_ignored() {
        let mut log = cart_log();
        log.push(Action::Decide {
            call_id: "ghost".into(),
            approved: true,
        });
        let state = run(&log);
        assert_eq!(state.pending.len(), 1);
        assert!(state.decisions.is_empty());
    }

    #[test]
    fn echoed_tool_result_becomes_a_tool_message() {
        let mut log = cart_log();
        log.push(event(
            5,
            "t1",
            StreamChunk::ToolResult {
                call_id: "c1".into(),
                tool_name: "addToCart".into(),
                output: json!({"itemId": "sku-1", "qty": 2}),
                is_error: false,
            },
        ));
        let state = run(&log);
        let tool = state.conversation.messages.last().unwrap();
        assert_eq!(tool.role, Role::Tool);
        assert_eq!(tool.id, "t1");
        assert_eq!(tool.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(state.find_call("c1").unwrap().state, ToolCallState::Complete);
    }

    #[test]
    fn local_result_is_queued_not_materialized() {
        let state = run(&[
            event(
                1,
                "a1",
                StreamChunk::ToolCallDelta {
                    call_id: "l1".into(),
                    tool_name: Some("getLocation".into()),
                    arguments_delta: "{}".into(),
                },
            ),
            event(
                2,
                "a1",
                StreamChunk::Done {
                    finish_reason: FinishReason::ToolCalls,
                    usage: None,
                    pending: vec![PendingCall {
                        call_id: "l1".into(),
                        tool_name: "getLocation".into(),
                        kind: PendingKind::ClientExecution,
                        arguments: json!({}),
                    }],
                },
            ),
            Action::ClientResult(ClientToolResult::success("l1", json!({"city": "Porto"}))),
        ]);
        assert_eq!(state.conversation.messages.len(), 1);
        assert_eq!(state.results.len(), 1);
        assert_eq!(state.find_call("l1").unwrap().state, ToolCallState::Complete);
        assert!(state.ready_to_continue());
    }

    #[test]
    fn stream_without_terminal_is_closed() {
        let state = run(&[
            Action::Submitting,
            event(1, "a1", StreamChunk::content("par")),
            Action::StreamClosed,
        ]);
        assert_eq!(state.status, ChatStatus::Closed);
    }

    #[test]
    fn close_after_terminal_keeps_the_terminal_status() {
        let state = run(&[
            event(1, "a1", StreamChunk::done(FinishReason::Stop, None)),
            Action::StreamClosed,
        ]);
        assert_eq!(state.status, ChatStatus::Done);
    }

    #[test]
    fn error_event_fails_the_chat() {
        let state = run(&[event(1, "a1", StreamChunk::error("boom"))]);
        assert_eq!(state.status, ChatStatus::Failed);
        assert_eq!(state.error.as_deref(), Some("boom"));
    }

    #[test]
    fn usage_sums_across_exchanges() {
        let usage = Usage {
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
        };
        let state = run(&[
            event(1, "a1", StreamChunk::done(FinishReason::Stop, Some(usage))),
            event(2, "a2", StreamChunk::done(FinishReason::Stop, Some(usage))),
        ]);
        assert_eq!(state.usage.total_tokens, 6);
    }
}
