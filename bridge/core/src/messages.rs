//! Transcript Messages
//!
//! The persisted transcript is owned by an external store. These types are
//! the read-only view the bridge works with when it prepares an outbound
//! request.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Who produced a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt
    System,
    /// End user
    User,
    /// Model output
    Assistant,
    /// Tool output fed back to the model
    Tool,
}

impl Role {
    /// Wire name of the role
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A single transcript message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced the message
    pub role: Role,
    /// Message body, passed through verbatim
    pub content: String,
    /// Position in the persisted transcript
    pub ordinal: u64,
    /// Tool call this message answers (tool messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Create a message
    pub fn new(role: Role, content: impl Into<String>, ordinal: u64) -> Self {
        Self {
            role,
            content: content.into(),
            ordinal,
            tool_call_id: None,
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>, ordinal: u64) -> Self {
        Self::new(Role::System, content, ordinal)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>, ordinal: u64) -> Self {
        Self::new(Role::User, content, ordinal)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>, ordinal: u64) -> Self {
        Self::new(Role::Assistant, content, ordinal)
    }

    /// Create a tool-output message
    pub fn tool(
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
        ordinal: u64,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content, ordinal)
        }
    }

    /// JSON object sent to the serving endpoint
    #[must_use]
    pub fn to_wire(&self) -> Value {
        let mut value = json!({
            "role": self.role.as_str(),
            "content": self.content,
        });
        if let Some(ref id) = self.tool_call_id {
            value["tool_call_id"] = json!(id);
        }
        value
    }

    /// Character count of the serialized wire object
    #[must_use]
    pub fn wire_chars(&self) -> usize {
        self.to_wire().to_string().chars().count()
    }
}
