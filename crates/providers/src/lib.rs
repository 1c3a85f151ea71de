//! Model backend adapters for agentflux.
//!
//! Every backend implements `agentflux_core::Adapter`, translating its
//! provider's streaming wire format into the normalized chunk protocol.
//! [`build_from_config`] picks the backend named by configuration.

pub mod anthropic;
pub mod backend;
pub mod openai_compat;
mod stream;

pub use anthropic::AnthropicAdapter;
pub use backend::{Backend, build_from_config};
pub use openai_compat::OpenAiCompatAdapter;
