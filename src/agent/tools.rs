//! Tool registry for the agent's ReAct loop. Tool names are
//! registered under a namespace and exposed to the model without it, so
//! `fetcher.get_quote` is called as `get_quote` but still traceable to its
//! owning subsystem internally.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn call(&self, args: Value) -> Result<String, ToolError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    /// Register a tool under its own `name()`, stripping any `namespace.`
    /// prefix the implementation used internally — the model only ever sees
    /// the short name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let short_name = tool.name().rsplit('.').next().unwrap_or(tool.name()).to_string();
        self.tools.insert(short_name, tool);
    }

    pub fn specs(&self) -> Vec<crate::llm::ToolSpec> {
        self.tools
            .values()
            .map(|t| crate::llm::ToolSpec {
                name: t.name().rsplit('.').next().unwrap_or(t.name()).to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub async fn call(&self, name: &str, args: Value) -> Result<String, ToolError> {
        let tool = self.tools.get(name).ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        tool.call(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamespacedTool;

    #[async_trait]
    impl Tool for NamespacedTool {
        fn name(&self) -> &str {
            "fetcher.get_quote"
        }
        fn description(&self) -> &str {
            "gets a quote"
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({})
        }
        async fn call(&self, _args: Value) -> Result<String, ToolError> {
            Ok("ok".into())
        }
    }

    #[tokio::test]
    async fn namespace_prefix_is_stripped_from_the_callable_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(NamespacedTool));
        assert!(registry.call("get_quote", serde_json::json!({})).await.is_ok());
        assert!(matches!(
            registry.call("fetcher.get_quote", serde_json::json!({})).await,
            Err(ToolError::Unknown(_))
        ));
    }

    #[tokio::test]
    async fn unknown_tool_errors() {
        let registry = ToolRegistry::new();
        assert!(matches!(registry.call("nope", serde_json::json!({})).await, Err(ToolError::Unknown(_))));
    }
}
