//! Conversation history for a single chat session.

use serde::{Deserialize, Serialize};

/// Speaker of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One role-tagged message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered turn history.
///
/// Turns are only ever added in user/assistant pairs, so the length is
/// always even.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    turns: Vec<Turn>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed exchange.
    pub fn append(&mut self, user_text: impl Into<String>, assistant_text: impl Into<String>) {
        self.turns.reserve(2);
        self.turns.push(Turn::user(user_text));
        self.turns.push(Turn::assistant(assistant_text));
    }

    /// Current history, oldest first.
    pub fn snapshot(&self) -> &[Turn] {
        &self.turns
    }

    pub fn reset(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_adds_user_then_assistant() {
        let mut state = ConversationState::new();
        state.append("Hi", "Hello!");

        let turns = state.snapshot();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0], Turn::user("Hi"));
        assert_eq!(turns[1], Turn::assistant("Hello!"));
    }

    #[test]
    fn history_preserves_insertion_order() {
        let mut state = ConversationState::new();
        state.append("first", "one");
        state.append("second", "two");

        let contents: Vec<&str> = state.snapshot().iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "one", "second", "two"]);
    }

    #[test]
    fn reset_empties_history() {
        let mut state = ConversationState::new();
        for i in 0..5 {
            state.append(format!("q{i}"), format!("a{i}"));
        }
        assert_eq!(state.len(), 10);

        state.reset();
        assert!(state.is_empty());
        assert!(state.snapshot().is_empty());
    }

    #[test]
    fn reset_on_empty_history_is_noop() {
        let mut state = ConversationState::new();
        state.reset();
        assert_eq!(state.len(), 0);
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Turn::assistant("ok")).unwrap();
        assert!(json.contains("\"role\":\"assistant\""));
        assert_eq!(Role::User.as_str(), "user");
    }
}
