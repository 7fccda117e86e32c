//! Per-chat dialogue state for multi-step flows.
//!
//! Registration and guided conversion walk the user through several
//! messages. The current step lives in a concurrent map keyed by chat;
//! any command resets it, so a stuck dialogue never traps a chat.

use dashmap::DashMap;
use teloxide::types::ChatId;

/// Where a chat currently is in a multi-step flow.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DialogueState {
    /// No flow in progress; free-form messages get one-shot handling.
    #[default]
    Idle,
    /// /register was issued; waiting for an email address.
    RegisterAwaitingEmail,
    /// Email accepted and a code was sent; waiting for the code.
    RegisterAwaitingCode { email: String },
    /// /convert was issued; waiting for the source currency.
    ConvertAwaitingSource,
    /// Source accepted; waiting for the target currency.
    ConvertAwaitingTarget { from: String },
    /// Both currencies accepted; waiting for the amount.
    ConvertAwaitingAmount { from: String, to: String },
}

/// Concurrent per-chat dialogue states.
#[derive(Default)]
pub struct DialogueStore {
    states: DashMap<ChatId, DialogueState>,
}

impl DialogueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state for the chat; `Idle` when none is stored.
    pub fn get(&self, chat_id: ChatId) -> DialogueState {
        self.states
            .get(&chat_id)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn set(&self, chat_id: ChatId, state: DialogueState) {
        if state == DialogueState::Idle {
            self.states.remove(&chat_id);
        } else {
            self.states.insert(chat_id, state);
        }
    }

    /// Removes and returns the chat's state. The caller decides whether to
    /// store a follow-up state, so a handler crash leaves the chat idle
    /// rather than wedged mid-flow.
    pub fn take(&self, chat_id: ChatId) -> DialogueState {
        self.states
            .remove(&chat_id)
            .map(|(_, s)| s)
            .unwrap_or_default()
    }

    pub fn clear(&self, chat_id: ChatId) {
        self.states.remove(&chat_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_chat_is_idle() {
        let store = DialogueStore::new();
        assert_eq!(store.get(ChatId(1)), DialogueState::Idle);
    }

    #[test]
    fn test_set_and_get() {
        let store = DialogueStore::new();
        store.set(ChatId(1), DialogueState::RegisterAwaitingEmail);
        assert_eq!(store.get(ChatId(1)), DialogueState::RegisterAwaitingEmail);
        // Other chats are unaffected
        assert_eq!(store.get(ChatId(2)), DialogueState::Idle);
    }

    #[test]
    fn test_take_removes_state() {
        let store = DialogueStore::new();
        store.set(
            ChatId(1),
            DialogueState::ConvertAwaitingTarget {
                from: "USD".to_string(),
            },
        );
        let taken = store.take(ChatId(1));
        assert_eq!(
            taken,
            DialogueState::ConvertAwaitingTarget {
                from: "USD".to_string()
            }
        );
        assert_eq!(store.get(ChatId(1)), DialogueState::Idle);
    }

    #[test]
    fn test_setting_idle_drops_entry() {
        let store = DialogueStore::new();
        store.set(ChatId(1), DialogueState::ConvertAwaitingSource);
        store.set(ChatId(1), DialogueState::Idle);
        assert_eq!(store.take(ChatId(1)), DialogueState::Idle);
    }

    #[test]
    fn test_clear() {
        let store = DialogueStore::new();
        store.set(ChatId(1), DialogueState::RegisterAwaitingEmail);
        store.clear(ChatId(1));
        assert_eq!(store.get(ChatId(1)), DialogueState::Idle);
    }
}
