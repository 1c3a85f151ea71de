//! Observable holder of the reconciled state.

use tokio::sync::watch;

use crate::state::{Action, ChatState, reduce};

/// Publishes a fresh snapshot after every action.
#[derive(Debug)]
pub struct ChatStore {
    tx: watch::Sender<ChatState>,
}

impl ChatStore {
    pub fn new(initial: ChatState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn dispatch(&self, action: Action) {
        self.tx.send_modify(|state| {
            let current = std::mem::take(state);
            *state = reduce(current, &action);
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> ChatState {
        self.tx.borrow().clone()
    }
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new(ChatState::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ChatStatus;
    use agentflux_core::chunk::{StreamChunk, StreamEvent};
    use agentflux_core::message::Message;

    #[tokio::test]
    async fn subscribers_see_every_update() {
        let store = ChatStore::default();
        let mut rx = store.subscribe();

        store.dispatch(Action::UserMessage(Message::user("hi")));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().conversation.messages.len(), 1);

        store.dispatch(Action::Submitting);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().status, ChatStatus::Submitting);
    }

    #[test]
    fn snapshot_reflects_dispatched_events() {
        let store = ChatStore::default();
        store.dispatch(Action::Event(StreamEvent {
            seq: 1,
            message_id: "a".into(),
            chunk: StreamChunk::content("x"),
        }));
        let snapshot = store.snapshot();
        assert_eq!(snapshot.last_seq, 1);
        assert_eq!(snapshot.conversation.messages[0].text(), "x");
    }
}
