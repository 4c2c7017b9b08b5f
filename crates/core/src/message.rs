//! Conversation history value types.
//!
//! A history is an ordered `Vec<Message>`. Its order is the conversation
//! order and is replayed to the backend verbatim on every round.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a cached conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// A fresh id: 32 lowercase hex digits.
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The abbreviated form shown in listings.
    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(7).map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (format, role preamble)
    System,
    /// The end user
    User,
    /// The model
    Assistant,
    /// Tool execution result
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

/// A single message in a conversation.
///
/// A [`Role::Tool`] message always carries the id of the call it answers;
/// [`Message::tool_result`] is the only constructor for that role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,

    pub content: String,

    /// Tool calls requested by the assistant, in index order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// If this is a tool result, which tool call it responds to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// If this is a tool result, the name of the tool that produced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a tool result message answering `call`.
    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call.id.clone()),
            tool_name: Some(call.name.clone()),
            ..Self::new(Role::Tool, content)
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Position of the call within its assistant message.
    pub index: usize,

    /// Backend-assigned id. Falls back to the decimal index when the
    /// backend supplies none.
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Raw argument bytes, JSON for every backend shipped here.
    #[serde(with = "arguments_text")]
    pub arguments: Vec<u8>,
}

impl ToolCall {
    pub fn new(index: usize, name: impl Into<String>, arguments: impl Into<Vec<u8>>) -> Self {
        Self {
            index,
            id: index.to_string(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Arguments as text for display and wire encoding.
    pub fn arguments_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.arguments)
    }
}

/// Tool call arguments are stored as text so cached conversations stay
/// readable.
mod arguments_text {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Ok(String::deserialize(deserializer)?.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors() {
        let user = Message::user("Hello");
        assert_eq!(user.role, Role::User);
        assert_eq!(user.content, "Hello");
        assert!(user.tool_call_id.is_none());

        let sys = Message::system("Be terse.");
        assert_eq!(sys.role, Role::System);
    }

    #[test]
    fn tool_result_references_its_call() {
        let call = ToolCall::new(2, "weather", br#"{"city":"Oslo"}"#.to_vec()).with_id("call_9");
        let msg = Message::tool_result(&call, "sunny");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_9"));
        assert_eq!(msg.tool_name.as_deref(), Some("weather"));
    }

    #[test]
    fn tool_call_id_defaults_to_index() {
        let call = ToolCall::new(3, "ls", Vec::new());
        assert_eq!(call.id, "3");
    }

    #[test]
    fn message_serialization_keeps_arguments_readable() {
        let msg = Message::assistant("")
            .with_tool_calls(vec![ToolCall::new(0, "ls", br#"{"path":"/tmp"}"#.to_vec())]);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""arguments":"{\"path\":\"/tmp\"}""#));
        assert!(json.contains(r#""role":"assistant""#));

        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn role_parses_wire_names() {
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert_eq!(Role::Tool.to_string(), "tool");
        assert!("robot".parse::<Role>().is_err());
    }

    #[test]
    fn conversation_id_is_hex() {
        let id = ConversationId::new();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id.short().len(), 7);
    }
}
