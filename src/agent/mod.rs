//! Agent Executor (C9)
//! Mission: a ReAct loop bounded by `AGENT_MAX_STEPS` that lets the model
//! call registered tools before producing a final answer, persisting every
//! turn including tool calls and reasoning blobs.

pub mod bindings;
pub mod strategy;
pub mod tools;

pub use tools::{Tool, ToolError, ToolRegistry};

use crate::llm::{ChatMessage, ChatRequest, LlmRouter, ToolSpec};
use crate::models::{ConversationRole, ConversationTurn};
use crate::persistence::Store;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct AgentExecutor {
    pub llm: Arc<LlmRouter>,
    pub tools: Arc<ToolRegistry>,
    pub store: Arc<Store>,
    pub max_steps: u32,
}

/// One step of agent progress, surfaced to the `/agent/chat/stream` SSE
/// endpoint.
#[derive(Debug, Clone)]
pub enum AgentProgress {
    ToolCall { name: String },
    ToolResult { name: String, ok: bool },
    Final { content: String },
}

impl AgentExecutor {
    /// Run the ReAct loop for one user turn, replaying prior turns from
    /// `session_id` as context.
    pub async fn run_chat<F>(&self, session_id: &str, user_message: &str, mut on_progress: F) -> crate::error::AppResult<String>
    where
        F: FnMut(AgentProgress),
    {
        let history = self.store.list_conversation(session_id)?;
        let mut messages: Vec<ChatMessage> = history
            .iter()
            .map(|t| ChatMessage {
                role: role_str(t.role).to_string(),
                content: t.content.clone(),
            })
            .collect();
        messages.push(ChatMessage {
            role: "user".into(),
            content: user_message.to_string(),
        });
        self.persist(session_id, ConversationRole::User, user_message, None, None)?;

        let tool_specs: Vec<ToolSpec> = self.tools.specs();
        let mut step = 0;

        loop {
            if step >= self.max_steps {
                warn!(session_id, max_steps = self.max_steps, "agent hit step budget, forcing final answer");
                messages.push(ChatMessage {
                    role: "system".into(),
                    content: "Step budget exhausted. Answer now without further tool calls.".into(),
                });
            }
            let request = ChatRequest {
                messages: messages.clone(),
                tools: if step >= self.max_steps { vec![] } else { tool_specs.clone() },
                image_urls: vec![],
            };
            let response = self
                .llm
                .complete(&request)
                .await
                .map_err(|e| crate::error::AppError::LlmInvalidResponse(e.to_string()))?;

            if response.tool_calls.is_empty() {
                self.persist(session_id, ConversationRole::Assistant, &response.content, None, response.reasoning_blob.clone())?;
                on_progress(AgentProgress::Final { content: response.content.clone() });
                return Ok(response.content);
            }

            messages.push(ChatMessage {
                role: "assistant".into(),
                content: response.content.clone(),
            });
            self.persist(
                session_id,
                ConversationRole::Assistant,
                &response.content,
                Some(serde_json::to_value(&response.tool_calls).unwrap_or_default()),
                response.reasoning_blob.clone(),
            )?;

            for call in &response.tool_calls {
                on_progress(AgentProgress::ToolCall { name: call.name.clone() });
                let result = self.tools.call(&call.name, call.arguments.clone()).await;
                let (ok, text) = match &result {
                    Ok(text) => (true, text.clone()),
                    Err(e) => (false, format!("tool error: {e}")),
                };
                on_progress(AgentProgress::ToolResult { name: call.name.clone(), ok });
                debug!(tool = call.name, ok, "tool call completed");
                messages.push(ChatMessage {
                    role: "tool".into(),
                    content: text.clone(),
                });
                self.persist(session_id, ConversationRole::Tool, &text, None, None)?;
            }
            step += 1;
        }
    }

    fn persist(
        &self,
        session_id: &str,
        role: ConversationRole,
        content: &str,
        tool_calls: Option<serde_json::Value>,
        reasoning_blob: Option<serde_json::Value>,
    ) -> crate::error::AppResult<()> {
        self.store.save_conversation_turn(&ConversationTurn {
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            tool_calls,
            reasoning_blob,
            created_at: Utc::now(),
        })
    }
}

fn role_str(role: ConversationRole) -> &'static str {
    match role {
        ConversationRole::User => "user",
        ConversationRole::Assistant => "assistant",
        ConversationRole::Tool => "tool",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatResponse, LlmError, LlmProvider, ModelEntry};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedProvider {
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn id(&self) -> &'static str {
            "scripted"
        }
        async fn complete(&self, _model: &str, _req: &ChatRequest, _key: Option<&str>) -> Result<ChatResponse, LlmError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                Ok(ChatResponse {
                    content: "calling a tool".into(),
                    tool_calls: vec![crate::llm::ToolCall {
                        name: "echo".into(),
                        arguments: serde_json::json!({"text": "hi"}),
                    }],
                    reasoning_blob: None,
                })
            } else {
                Ok(ChatResponse {
                    content: "final answer".into(),
                    tool_calls: vec![],
                    reasoning_blob: None,
                })
            }
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes text"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn call(&self, args: serde_json::Value) -> Result<String, ToolError> {
            Ok(args["text"].as_str().unwrap_or_default().to_string())
        }
    }

    #[tokio::test]
    async fn react_loop_executes_tool_then_answers() {
        let router = Arc::new(LlmRouter::new(
            vec![ModelEntry {
                provider: Arc::new(ScriptedProvider { calls: AtomicU32::new(0) }),
                model: "m1".into(),
            }],
            HashMap::new(),
            0,
        ));
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let store = Arc::new(Store::open(":memory:").unwrap());
        let executor = AgentExecutor {
            llm: router,
            tools: Arc::new(registry),
            store,
            max_steps: 4,
        };
        let mut progress = Vec::new();
        let answer = executor
            .run_chat("s1", "please echo hi", |p| progress.push(p))
            .await
            .unwrap();
        assert_eq!(answer, "final answer");
        assert!(progress.iter().any(|p| matches!(p, AgentProgress::ToolCall { name } if name == "echo")));
    }
}
