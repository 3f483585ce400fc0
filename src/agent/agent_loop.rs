//! Model-driven planner: the "tools in a loop" pattern.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{ChatMessage, LlmClient, Role, ToolCall};

use super::prompt::{build_system_prompt, build_task_prompt};
use super::{AgentError, AgentEvent, Planner, RunSession};

/// Lets a chat model choose tool calls until it answers without any.
///
/// The required tool order lives only in the prompts; the model may skip or
/// reorder calls.
pub struct LlmPlanner {
    llm: Arc<dyn LlmClient>,
    model: String,
    max_iterations: usize,
    from_currency: String,
    to_currency: String,
}

impl LlmPlanner {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        model: String,
        max_iterations: usize,
        from_currency: &str,
        to_currency: &str,
    ) -> Self {
        Self {
            llm,
            model,
            max_iterations,
            from_currency: from_currency.to_string(),
            to_currency: to_currency.to_string(),
        }
    }

    /// Execute a single tool call and render the observation for the model.
    async fn execute_tool_call(&self, tool_call: &ToolCall, session: &RunSession<'_>) -> String {
        let args = parse_arguments(&tool_call.function.arguments);
        match session.call_tool(&tool_call.function.name, args).await {
            Ok(output) => output.value.to_string(),
            Err(e) => format!("Error: {}", e),
        }
    }
}

/// Models send `""` for tools without parameters and occasionally invalid JSON.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or(Value::Null)
}

#[async_trait]
impl Planner for LlmPlanner {
    fn describe(&self) -> String {
        format!("llm (model: {})", self.model)
    }

    async fn drive(&self, session: &RunSession<'_>) -> Result<String, AgentError> {
        let system_prompt =
            build_system_prompt(session.tools(), &self.from_currency, &self.to_currency);
        let mut messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(build_task_prompt(&self.from_currency, &self.to_currency)),
        ];

        let tool_schemas = session.tools().get_tool_schemas();

        for iteration in 0..self.max_iterations {
            tracing::debug!("Agent iteration {}", iteration + 1);
            session
                .emit(AgentEvent::ModelRequest {
                    iteration: iteration + 1,
                })
                .await;

            let response = self
                .llm
                .chat_completion(&self.model, &messages, Some(&tool_schemas))
                .await?;

            if let Some(tool_calls) = response.tool_calls.filter(|calls| !calls.is_empty()) {
                if let Some(content) = &response.content {
                    session
                        .emit(AgentEvent::Thinking {
                            content: content.clone(),
                        })
                        .await;
                }

                messages.push(ChatMessage {
                    role: Role::Assistant,
                    content: response.content.clone(),
                    tool_calls: Some(tool_calls.clone()),
                    tool_call_id: None,
                });

                for tool_call in &tool_calls {
                    let observation = self.execute_tool_call(tool_call, session).await;
                    messages.push(ChatMessage::tool_result(tool_call.id.clone(), observation));
                }

                continue;
            }

            // No tool calls - this is the final response
            return response.content.ok_or(AgentError::EmptyResponse);
        }

        Err(AgentError::MaxIterations(self.max_iterations))
    }
}
