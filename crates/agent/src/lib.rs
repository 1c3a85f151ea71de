//! The agent-loop orchestrator for agentflux.
//!
//! The loop follows a **turn → dispatch → turn** cycle:
//!
//! 1. **Resume** any tool calls a previous exchange left suspended
//! 2. **Invoke the model** through the configured [`Adapter`](agentflux_core::Adapter)
//!    and forward its deltas as they arrive
//! 3. **If tool calls**: dispatch them, emit results in call order, loop to 2
//! 4. **If a call suspends**: emit `done{tool_calls, pending}` and hand the
//!    conversation back to the caller
//! 5. **If the model stops**: emit the terminal `done`
//!
//! The iteration strategy bounds step 2; one cancellation token stops all of it.

pub mod iteration;
pub mod loop_runner;

pub use iteration::{IterationStrategy, MaxIterations};
pub use loop_runner::{AgentLoop, RunOutcome, RunStatus};
