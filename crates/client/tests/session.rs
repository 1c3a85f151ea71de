//! Sessions against a real gateway on a loopback port.

use agentflux_agent::AgentLoop;
use agentflux_client::{ChatSession, ChatStatus, ClientError, ClientToolRegistry};
use agentflux_config::AppConfig;
use agentflux_core::chunk::{PendingKind, StreamChunk};
use agentflux_core::error::ToolError;
use agentflux_core::message::{Role, ToolCallState};
use agentflux_core::resume::ClientToolResult;
use agentflux_core::testing::{ScriptStep, ScriptedAdapter, text_turn, tool_turn};
use agentflux_core::tool::{Tool, ToolContext, ToolDefinition, ToolRegistry};
use agentflux_gateway::{GatewayState, build_router};
use agentflux_tools::cart::{AddToCartTool, Cart};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

struct Locate;

/// Waits for cancellation and records that it saw it.
struct StuckLocate {
    started: Arc<Notify>,
    saw_cancel: Arc<AtomicBool>,
}

#[async_trait]
impl Tool for StuckLocate {
    fn name(&self) -> &str {
        "getLocation"
    }
    fn description(&self) -> &str {
        "Where the device is, eventually"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _arguments: Value, ctx: ToolContext) -> Result<Value, ToolError> {
        self.started.notify_one();
        ctx.cancel.cancelled().await;
        self.saw_cancel.store(true, Ordering::SeqCst);
        Err(ToolError::ExecutionFailed {
            tool_name: "getLocation".into(),
            reason: "cancelled".into(),
        })
    }
}

#[async_trait]
impl Tool for Locate {
    fn name(&self) -> &str {
        "getLocation"
    }
    fn description(&self) -> &str {
        "Where the device is"
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _arguments: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
        Ok(json!({"city": "Porto"}))
    }
}

struct Server {
    endpoint: String,
    adapter: Arc<ScriptedAdapter>,
    cart: Cart,
}

async fn serve(steps: Vec<ScriptStep>) -> Server {
    let adapter = Arc::new(ScriptedAdapter::new(steps));
    let cart = Cart::new();
    let mut registry = ToolRegistry::new();
    registry.register_tool(AddToCartTool::new(cart.clone()));
    registry.register(ToolDefinition::client(
        "getLocation",
        "Read the user's location",
        json!({"type": "object"}),
    ));

    let agent = AgentLoop::new(adapter.clone(), Arc::new(registry));
    let state = Arc::new(GatewayState::new(AppConfig::default(), agent));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });

    Server {
        endpoint: format!("http://{addr}"),
        adapter,
        cart,
    }
}

fn add_two() -> ScriptStep {
    tool_turn(&[("call_1", "addToCart", json!({"itemId": "sku-1", "qty": 2}))])
}

#[tokio::test]
async fn approved_cart_call_runs_once_and_conversation_completes() {
    let server = serve(vec![add_two(), text_turn("Added two of sku-1.")]).await;
    let session = ChatSession::new(&server.endpoint);

    let state = session.send("Add two of sku-1").await.unwrap();
    assert_eq!(state.status, ChatStatus::AwaitingInput);
    assert_eq!(state.pending.len(), 1);
    assert_eq!(state.pending[0].kind, PendingKind::Approval);
    assert_eq!(
        state.find_call("call_1").unwrap().state,
        ToolCallState::AwaitingApproval
    );
    assert!(server.cart.snapshot().is_empty());

    let state = session.decide("call_1", true).await.unwrap();
    assert_eq!(state.status, ChatStatus::Done);
    assert_eq!(server.cart.snapshot().get("sku-1"), Some(&2));
    assert_eq!(server.adapter.call_count(), 2);

    let roles: Vec<Role> = state.conversation.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
    assert_eq!(
        state.find_call("call_1").unwrap().state,
        ToolCallState::Complete
    );
    assert!(state.decisions.is_empty());
    assert_eq!(state.conversation.messages[3].text(), "Added two of sku-1.");

    // The second invocation saw the tool result.
    let second = &server.adapter.requests()[1];
    assert!(second.messages.iter().any(|m| m.role == Role::Tool));
}

#[tokio::test]
async fn denied_call_never_touches_the_cart() {
    let server = serve(vec![add_two(), text_turn("Okay, I left it.")]).await;
    let session = ChatSession::new(&server.endpoint);

    session.send("Add two of sku-1").await.unwrap();
    let state = session.decide("call_1", false).await.unwrap();

    assert_eq!(state.status, ChatStatus::Done);
    assert!(server.cart.snapshot().is_empty());
    let tool = state
        .conversation
        .tool_result_for("call_1")
        .expect("denial recorded as a tool message");
    assert!(tool.is_error);
}

#[tokio::test]
async fn local_tool_result_continues_automatically() {
    let server = serve(vec![
        tool_turn(&[("loc", "getLocation", json!({}))]),
        text_turn("You are in Porto."),
    ])
    .await;
    let mut tools = ClientToolRegistry::new();
    tools.register(Locate);
    let session = ChatSession::new(&server.endpoint).with_tools(tools);

    let state = session.send("Where am I?").await.unwrap();

    assert_eq!(state.status, ChatStatus::Done);
    assert_eq!(server.adapter.call_count(), 2);
    assert!(state.results.is_empty());
    let tool = state.conversation.tool_result_for("loc").unwrap();
    assert!(!tool.is_error);
    assert!(format!("{:?}", tool.content).contains("Porto"));
    assert_eq!(state.conversation.messages.last().unwrap().text(), "You are in Porto.");
}

#[tokio::test]
async fn unimplemented_client_tool_waits_for_submitted_result() {
    let server = serve(vec![
        tool_turn(&[("loc", "getLocation", json!({}))]),
        text_turn("You are in Porto."),
    ])
    .await;
    let session = ChatSession::new(&server.endpoint);

    let state = session.send("Where am I?").await.unwrap();
    assert_eq!(state.status, ChatStatus::AwaitingInput);
    assert_eq!(server.adapter.call_count(), 1);
    let pending: Vec<_> = state.pending_of(PendingKind::ClientExecution).collect();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].call_id, "loc");
    assert!(state.conversation.tool_result_for("loc").is_none());

    let err = session
        .submit_result(ClientToolResult::success("nope", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NotAwaitingResult(id) if id == "nope"));
    assert_eq!(server.adapter.call_count(), 1);

    let state = session
        .submit_result(ClientToolResult::success("loc", json!({"city": "Porto"})))
        .await
        .unwrap();
    assert_eq!(state.status, ChatStatus::Done);
    assert_eq!(server.adapter.call_count(), 2);
    let tool = state.conversation.tool_result_for("loc").unwrap();
    assert!(!tool.is_error);
    assert!(format!("{:?}", tool.content).contains("Porto"));
    assert_eq!(state.conversation.messages.last().unwrap().text(), "You are in Porto.");
}

#[tokio::test]
async fn cancel_reaches_running_local_tool() {
    let server = serve(vec![
        tool_turn(&[("loc", "getLocation", json!({}))]),
        text_turn("No location then."),
    ])
    .await;
    let started = Arc::new(Notify::new());
    let saw_cancel = Arc::new(AtomicBool::new(false));
    let mut tools = ClientToolRegistry::new();
    tools.register(StuckLocate {
        started: started.clone(),
        saw_cancel: saw_cancel.clone(),
    });
    let session = ChatSession::new(&server.endpoint).with_tools(tools);

    let running = tokio::spawn({
        let session = session.clone();
        async move { session.send("Where am I?").await }
    });
    started.notified().await;

    // No server run is active while the tool runs, so the request itself may fail.
    let _ = session.cancel().await;

    let state = running.await.unwrap().unwrap();
    assert!(saw_cancel.load(Ordering::SeqCst));
    assert!(state.conversation.tool_result_for("loc").unwrap().is_error);
}

#[tokio::test]
async fn decision_for_unknown_call_is_rejected() {
    let server = serve(vec![add_two()]).await;
    let session = ChatSession::new(&server.endpoint);
    session.send("Add two of sku-1").await.unwrap();

    let err = session.decide("call_9", true).await.unwrap_err();
    assert!(matches!(err, ClientError::NotAwaitingApproval(id) if id == "call_9"));
    assert_eq!(session.snapshot().status, ChatStatus::AwaitingInput);
}

#[tokio::test]
async fn second_exchange_while_one_is_in_flight_is_refused() {
    let server = serve(vec![ScriptStep::Stall(vec![StreamChunk::content("thinking")])]).await;
    let session = ChatSession::new(&server.endpoint);

    let mut rx = session.subscribe();
    let running = tokio::spawn({
        let session = session.clone();
        async move { session.send("hi").await }
    });
    while rx.borrow_and_update().status != ChatStatus::Streaming {
        rx.changed().await.unwrap();
    }

    assert!(matches!(
        session.send("again").await,
        Err(ClientError::ContinuationInFlight)
    ));
    assert!(matches!(
        session.decide("x", true).await,
        Err(ClientError::ContinuationInFlight)
    ));

    session.cancel().await.unwrap();
    let state = running.await.unwrap().unwrap();
    assert_eq!(state.status, ChatStatus::Closed);
    assert_eq!(state.conversation.messages.last().unwrap().text(), "thinking");
}

#[tokio::test]
async fn server_rejection_surfaces_as_status_error() {
    let server = serve(vec![]).await;
    let session =
        ChatSession::new(&server.endpoint).with_tool_selection(vec!["launchRocket".into()]);

    let err = session.send("hi").await.unwrap_err();
    match err {
        ClientError::Status { status, message } => {
            assert_eq!(status, 400);
            assert!(message.contains("launchRocket"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let state = session.snapshot();
    assert_eq!(state.status, ChatStatus::Failed);
    assert!(state.error.is_some());
    assert_eq!(server.adapter.call_count(), 0);
}

#[tokio::test]
async fn unreachable_server_fails_the_session() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let session = ChatSession::new(format!("http://{addr}"));
    let err = session.send("hi").await.unwrap_err();
    assert!(matches!(err, ClientError::Http(_)));
    assert_eq!(session.snapshot().status, ChatStatus::Failed);
}
