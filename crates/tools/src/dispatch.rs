//! Tool dispatch and approval engine.
//!
//! Given the calls a model turn produced, [`dispatch`] decides for each one
//! whether it resolves now (server execution, a client-supplied result, a
//! denial, or a validation failure) or suspends until a continuation brings
//! an approval decision or a client result.
//!
//! Server calls run concurrently as separate tasks so a panicking tool only
//! takes its own call down. Outcomes always come back in call order.

use agentflux_core::chunk::{PendingCall, PendingKind, StreamChunk};
use agentflux_core::error::ToolError;
use agentflux_core::message::{ToolCallRef, ToolCallState};
use agentflux_core::resume::ResumeInputs;
use agentflux_core::tool::{ToolContext, ToolDefinition, ToolRegistry};
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::schema;

/// Per-dispatch runtime handles.
#[derive(Debug, Clone, Default)]
pub struct DispatchContext {
    /// Handed to every executor; dispatch still joins tools that ignore it.
    pub cancel: CancellationToken,

    /// Where executors report progress.
    pub progress: Option<mpsc::Sender<StreamChunk>>,
}

impl DispatchContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: mpsc::Sender<StreamChunk>) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// What happened to one call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// The call reached a terminal state; `output` is its tool-result payload.
    Resolved {
        call: ToolCallRef,
        output: Value,
        is_error: bool,
    },
    /// The call waits for a decision or a client result.
    Suspended { call: ToolCallRef, pending: PendingCall },
}

impl CallOutcome {
    pub fn call(&self) -> &ToolCallRef {
        match self {
            Self::Resolved { call, .. } | Self::Suspended { call, .. } => call,
        }
    }

    /// The protocol event announcing this outcome, if it has one.
    ///
    /// Calls waiting for client execution are only announced through the
    /// terminal `done`'s pending list.
    pub fn chunk(&self) -> Option<StreamChunk> {
        match self {
            Self::Resolved {
                call,
                output,
                is_error,
            } => Some(StreamChunk::ToolResult {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                output: output.clone(),
                is_error: *is_error,
            }),
            Self::Suspended { pending, .. } if pending.kind == PendingKind::Approval => {
                Some(StreamChunk::ApprovalRequest {
                    call_id: pending.call_id.clone(),
                    tool_name: pending.tool_name.clone(),
                    arguments: pending.arguments.clone(),
                })
            }
            Self::Suspended { .. } => None,
        }
    }
}

/// All outcomes of one dispatch, in call order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchOutcome {
    pub outcomes: Vec<CallOutcome>,
}

impl DispatchOutcome {
    /// Calls still waiting on the consumer.
    pub fn pending(&self) -> Vec<PendingCall> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                CallOutcome::Suspended { pending, .. } => Some(pending.clone()),
                CallOutcome::Resolved { .. } => None,
            })
            .collect()
    }

    pub fn is_suspended(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| matches!(o, CallOutcome::Suspended { .. }))
    }
}

enum Plan {
    Done(CallOutcome),
    Run {
        call: ToolCallRef,
        definition: Arc<ToolDefinition>,
        arguments: Value,
    },
}

/// Resolve or suspend every call in `calls`.
pub async fn dispatch(
    calls: Vec<ToolCallRef>,
    registry: &ToolRegistry,
    resume: &ResumeInputs,
    ctx: &DispatchContext,
) -> DispatchOutcome {
    let mut outcomes: Vec<Option<CallOutcome>> = Vec::with_capacity(calls.len());
    let mut running = Vec::new();
    let mut handles = Vec::new();

    for call in calls {
        match plan(call, registry, resume) {
            Plan::Done(outcome) => outcomes.push(Some(outcome)),
            Plan::Run {
                call,
                definition,
                arguments,
            } => {
                let Some(executor) = definition.executor().cloned() else {
                    outcomes.push(Some(suspend(call, PendingKind::ClientExecution, arguments)));
                    continue;
                };

                debug!(call_id = %call.id, tool = %call.name, "Executing tool");
                let mut tool_ctx = ToolContext::new(call.id.clone(), ctx.cancel.clone());
                if let Some(progress) = &ctx.progress {
                    tool_ctx = tool_ctx.with_progress(progress.clone());
                }
                handles.push(tokio::spawn(async move {
                    executor.execute(arguments, tool_ctx).await
                }));
                running.push((outcomes.len(), call, definition));
                outcomes.push(None);
            }
        }
    }

    // Always joined, even once cancellation fired; the loop discards results.
    let joined = join_all(handles).await;
    for ((slot, call, definition), result) in running.into_iter().zip(joined) {
        outcomes[slot] = Some(complete(call, &definition, result));
    }

    DispatchOutcome {
        outcomes: outcomes.into_iter().flatten().collect(),
    }
}

fn plan(mut call: ToolCallRef, registry: &ToolRegistry, resume: &ResumeInputs) -> Plan {
    let Some(definition) = registry.get(&call.name) else {
        let err = ToolError::NotFound(call.name.clone());
        return Plan::Done(fail(call, err));
    };

    let arguments = match call.parsed_arguments() {
        Ok(arguments) => arguments,
        Err(e) => {
            let err = ToolError::InvalidArguments(format!("arguments are not valid JSON: {e}"));
            return Plan::Done(fail(call, err));
        }
    };

    if let Err(err) = schema::validate(&definition.input_schema, &arguments) {
        return Plan::Done(fail(call, err));
    }

    let server = definition.is_server_executable();

    // Client results are only trusted for calls the client owns.
    if let Some(result) = resume.result(&call.id) {
        if !server {
            let (output, is_error) = result.payload();
            return Plan::Done(resolved(call, output, is_error));
        }
        warn!(call_id = %call.id, tool = %call.name, "Ignoring client result for a server tool");
    }

    if definition.needs_approval {
        let already_approved = !server && call.state == ToolCallState::PendingExecution;
        match resume.decision(&call.id) {
            Some(false) => {
                let err = ToolError::Denied {
                    tool_name: call.name.clone(),
                };
                return Plan::Done(fail(call, err));
            }
            None if !already_approved => {
                return Plan::Done(suspend(call, PendingKind::Approval, arguments));
            }
            _ => {}
        }
    }

    if !server {
        return Plan::Done(suspend(call, PendingKind::ClientExecution, arguments));
    }

    settle(&mut call, ToolCallState::Executing);
    Plan::Run {
        call,
        definition,
        arguments,
    }
}

fn complete(
    call: ToolCallRef,
    definition: &ToolDefinition,
    result: Result<Result<Value, ToolError>, JoinError>,
) -> CallOutcome {
    match result {
        Ok(Ok(output)) => match &definition.output_schema {
            Some(schema) => match schema::validate(schema, &output) {
                Ok(()) => resolved(call, output, false),
                Err(e) => {
                    let reason = format!("output failed validation: {e}");
                    let err = ToolError::ExecutionFailed {
                        tool_name: call.name.clone(),
                        reason,
                    };
                    fail(call, err)
                }
            },
            None => resolved(call, output, false),
        },
        Ok(Err(err)) => fail(call, err),
        Err(join) => {
            let reason = if join.is_panic() {
                "tool panicked".to_string()
            } else {
                "tool task was aborted".to_string()
            };
            let err = ToolError::ExecutionFailed {
                tool_name: call.name.clone(),
                reason,
            };
            fail(call, err)
        }
    }
}

fn resolved(mut call: ToolCallRef, output: Value, is_error: bool) -> CallOutcome {
    let next = if is_error {
        ToolCallState::Error
    } else {
        ToolCallState::Complete
    };
    settle(&mut call, next);
    CallOutcome::Resolved {
        call,
        output,
        is_error,
    }
}

fn fail(call: ToolCallRef, err: ToolError) -> CallOutcome {
    warn!(call_id = %call.id, tool = %call.name, error = %err, "Tool call failed");
    resolved(call, Value::String(err.to_string()), true)
}

fn suspend(mut call: ToolCallRef, kind: PendingKind, arguments: Value) -> CallOutcome {
    let state = match kind {
        PendingKind::Approval => ToolCallState::AwaitingApproval,
        PendingKind::ClientExecution => ToolCallState::PendingExecution,
    };
    settle(&mut call, state);
    debug!(call_id = %call.id, tool = %call.name, ?kind, "Tool call suspended");
    let pending = PendingCall {
        call_id: call.id.clone(),
        tool_name: call.name.clone(),
        kind,
        arguments,
    };
    CallOutcome::Suspended { call, pending }
}

fn settle(call: &mut ToolCallRef, next: ToolCallState) {
    if let Err(e) = call.transition(next) {
        warn!(error = %e, "Rejected tool call transition");
    }
}
