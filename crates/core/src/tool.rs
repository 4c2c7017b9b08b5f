//! Tool invocation gateway.
//!
//! The engine never inspects tool semantics. It hands a tool name and the
//! raw argument bytes the model produced to a [`ToolInvoker`] and threads
//! the resulting text back into the conversation.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// The callback the engine uses to execute a requested tool call.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Run `name` with the undecoded `arguments` and return its output.
    async fn invoke(&self, name: &str, arguments: &[u8]) -> Result<String, ToolError>;

    /// Tools declared to the model.
    fn definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }
}

/// An invoker with no tools. Every call fails with [`ToolError::NotFound`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTools;

#[async_trait]
impl ToolInvoker for NoTools {
    async fn invoke(&self, name: &str, _arguments: &[u8]) -> Result<String, ToolError> {
        Err(ToolError::NotFound(name.to_string()))
    }
}

/// A single named capability the model can call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "git_status").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with decoded arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools, keyed and listed by name.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    async fn invoke(&self, name: &str, arguments: &[u8]) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        // Models sometimes send an empty argument string for no-arg tools.
        let arguments = if arguments.iter().all(u8::is_ascii_whitespace) {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_slice(arguments)
                .map_err(|e| ToolError::InvalidArguments(format!("{name}: {e}")))?
        };

        tool.execute(arguments).await
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { "echo" }
        fn description(&self) -> &str { "Echoes back the input" }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
            Ok(arguments["text"].as_str().unwrap_or("").to_string())
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.names(), vec!["echo"]);
    }

    #[test]
    fn registry_definitions() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
    }

    #[tokio::test]
    async fn registry_invokes_with_raw_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        let out = registry.invoke("echo", br#"{"text":"hello world"}"#).await.unwrap();
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn registry_treats_blank_arguments_as_empty_object() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        assert_eq!(registry.invoke("echo", b"  ").await.unwrap(), "");
    }

    #[tokio::test]
    async fn registry_rejects_malformed_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let err = registry.invoke("echo", b"{not json").await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn registry_invoke_missing_tool() {
        let registry = ToolRegistry::new();
        let err = registry.invoke("nonexistent", b"{}").await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn no_tools_rejects_everything() {
        let err = NoTools.invoke("ls", b"{}").await.unwrap_err();
        assert!(err.to_string().contains("ls"));
        assert!(NoTools.definitions().is_empty());
    }
}
