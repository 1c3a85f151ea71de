//! Active-run registry: at most one run per conversation.
//!
//! A [`RunTicket`] is held for as long as the response stream lives;
//! dropping it frees the conversation for the next exchange.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::GatewayError;

struct ActiveRun {
    ticket_id: u64,
    cancel: CancellationToken,
}

type RunMap = Arc<Mutex<HashMap<String, ActiveRun>>>;

#[derive(Default)]
pub struct RunRegistry {
    runs: RunMap,
    next_id: AtomicU64,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `conversation_id`, or fail with a conflict if it is running.
    pub fn begin(&self, conversation_id: &str) -> Result<RunTicket, GatewayError> {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        if runs.contains_key(conversation_id) {
            return Err(GatewayError::Conflict(conversation_id.to_string()));
        }

        let ticket_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        runs.insert(
            conversation_id.to_string(),
            ActiveRun {
                ticket_id,
                cancel: cancel.clone(),
            },
        );
        debug!(conversation_id, "Run registered");

        Ok(RunTicket {
            runs: self.runs.clone(),
            conversation_id: conversation_id.to_string(),
            ticket_id,
            cancel,
        })
    }

    /// Cancel the active run. Repeating it while the run winds down is fine.
    pub fn cancel(&self, conversation_id: &str) -> Result<(), GatewayError> {
        let runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        let run = runs
            .get(conversation_id)
            .ok_or_else(|| GatewayError::NoActiveRun(conversation_id.to_string()))?;
        run.cancel.cancel();
        Ok(())
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(conversation_id)
    }
}

/// Proof of ownership of a conversation's run slot.
pub struct RunTicket {
    runs: RunMap,
    conversation_id: String,
    ticket_id: u64,
    cancel: CancellationToken,
}

impl RunTicket {
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for RunTicket {
    fn drop(&mut self) {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        if runs
            .get(&self.conversation_id)
            .is_some_and(|run| run.ticket_id == self.ticket_id)
        {
            runs.remove(&self.conversation_id);
            debug!(conversation_id = %self.conversation_id, "Run released");
        }
    }
}
