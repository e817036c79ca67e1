//! Dialogue history
//!
//! Append-only ordered message sequence owned by a connection and read
//! by the worker to build model context. Messages are never mutated
//! after creation.

/// Speaker role for a dialogue message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The device user
    User,
    /// The assistant
    Assistant,
}

impl Role {
    /// Wire-format role name for chat-completion APIs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One turn of dialogue
#[derive(Debug, Clone)]
pub struct DialogueMessage {
    /// Who spoke
    pub role: Role,
    /// What was said
    pub content: String,
}

/// Ordered dialogue history for one connection
#[derive(Debug, Default)]
pub struct Dialogue {
    messages: Vec<DialogueMessage>,
}

impl Dialogue {
    /// Empty history
    #[must_use]
    pub const fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    /// Append one message
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(DialogueMessage {
            role,
            content: content.into(),
        });
    }

    /// All messages in creation order
    #[must_use]
    pub fn messages(&self) -> &[DialogueMessage] {
        &self.messages
    }

    /// Number of messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the history is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_preserves_order() {
        let mut dialogue = Dialogue::new();
        dialogue.push(Role::User, "hello");
        dialogue.push(Role::Assistant, "hi there");
        dialogue.push(Role::User, "how are you");

        let roles: Vec<Role> = dialogue.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(dialogue.messages()[1].content, "hi there");
    }
}
