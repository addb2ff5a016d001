//! Conversation messages and boundary validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "model")]
    Assistant,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// A single chronological turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
}

impl ConversationMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A validated, non-empty conversation whose last turn is a user question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<ConversationMessage>,
}

impl Conversation {
    /// Validate an already-typed message list.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyConversation` for an empty list,
    /// `ValidationError::InvalidMessage` when the last turn is not from the
    /// user, and `ValidationError::EmptyQuery` when it has no content.
    pub fn new(messages: Vec<ConversationMessage>) -> Result<Self, ValidationError> {
        let Some(last) = messages.last() else {
            return Err(ValidationError::EmptyConversation);
        };

        if last.role != Role::User {
            return Err(ValidationError::InvalidMessage(format!(
                "last message must come from the user, got {}",
                last.role
            )));
        }

        if last.content.trim().is_empty() {
            return Err(ValidationError::EmptyQuery);
        }

        Ok(Self { messages })
    }

    /// Validate untyped JSON received from a transport.
    pub fn from_json(value: Value) -> Result<Self, ValidationError> {
        let Value::Array(items) = value else {
            return Err(ValidationError::NotASequence(json_kind(&value).to_string()));
        };

        let messages = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                serde_json::from_value::<ConversationMessage>(item)
                    .map_err(|e| ValidationError::InvalidMessage(format!("message {i}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(messages)
    }

    /// Validate a raw request body.
    pub fn from_slice(body: &[u8]) -> Result<Self, ValidationError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ValidationError::NotASequence(format!("invalid JSON: {e}")))?;
        Self::from_json(value)
    }

    /// Content of the active question.
    pub fn query(&self) -> &str {
        // non-empty by construction
        self.messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    /// Every message before the active question, in original order.
    pub fn prior(&self) -> &[ConversationMessage] {
        &self.messages[..self.messages.len() - 1]
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
