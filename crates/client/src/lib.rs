//! Client reconciliation engine for agentflux.
//!
//! Consumes the gateway's event stream and keeps a render-ready view of the
//! conversation: messages addressed by id, tool calls by call id, the calls
//! the turn is waiting on, and a status a UI can switch on.
//!
//! - [`state`]: the pure reducer
//! - [`store`]: observable snapshots over the reducer
//! - [`session`]: HTTP exchanges, local tools, continuations

pub mod decode;
pub mod error;
pub mod session;
pub mod state;
pub mod store;
pub mod tools;

pub use decode::EventDecoder;
pub use error::ClientError;
pub use session::ChatSession;
pub use state::{Action, ChatState, ChatStatus, reduce};
pub use store::ChatStore;
pub use tools::ClientToolRegistry;
