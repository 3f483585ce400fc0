//! Agent module - drives one workflow run over the tool set.
//!
//! A [`Planner`] decides which tools to call and in what order. Two ship:
//! - [`LlmPlanner`]: a chat model picks tool calls in a loop, guided by the
//!   prompts in [`prompt`]
//! - [`PipelinePlanner`]: the read → lookup → convert → report sequence as
//!   fixed control flow
//!
//! Every step is reported as an [`AgentEvent`] on the run's event channel.

mod agent_loop;
mod events;
mod pipeline;
pub mod prompt;

pub use agent_loop::LlmPlanner;
pub use events::AgentEvent;
pub use pipeline::{compose_report, PipelinePlanner};

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{Config, PlannerKind};
use crate::llm::{LlmError, OpenAiCompatibleClient};
use crate::tools::{ToolContext, ToolError, ToolOutput, ToolRegistry};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool failed: {0}")]
    Tool(#[from] ToolError),

    #[error("Model returned an empty response")]
    EmptyResponse,

    #[error("Max iterations ({0}) reached without completion")]
    MaxIterations(usize),

    #[error("Unexpected tool output from {tool}: {message}")]
    UnexpectedOutput { tool: String, message: String },

    #[error("Agent is misconfigured: {0}")]
    Config(String),
}

/// State shared between a planner and the tools for one run.
pub struct RunSession<'a> {
    tools: &'a ToolRegistry,
    ctx: ToolContext,
    events: mpsc::Sender<AgentEvent>,
}

impl<'a> RunSession<'a> {
    pub fn new(
        tools: &'a ToolRegistry,
        ctx: ToolContext,
        events: mpsc::Sender<AgentEvent>,
    ) -> Self {
        Self { tools, ctx, events }
    }

    pub fn tools(&self) -> &ToolRegistry {
        self.tools
    }

    /// Report a step. A closed receiver means nobody is listening any more,
    /// which does not stop the run.
    pub async fn emit(&self, event: AgentEvent) {
        let _ = self.events.send(event).await;
    }

    /// Execute a tool and report the call and its outcome.
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<ToolOutput, ToolError> {
        self.emit(AgentEvent::ToolCall {
            name: name.to_string(),
            args: args.clone(),
        })
        .await;

        let result = self.tools.execute(name, args, &self.ctx).await;

        let event = match &result {
            Ok(ToolOutput {
                degraded: Some(reason),
                ..
            }) => AgentEvent::ToolDegraded {
                name: name.to_string(),
                reason: reason.clone(),
            },
            Ok(output) => AgentEvent::ToolResult {
                name: name.to_string(),
                result: output.value.clone(),
            },
            Err(e) => AgentEvent::ToolFailed {
                name: name.to_string(),
                error: e.to_string(),
            },
        };
        self.emit(event).await;
        result
    }
}

/// Decides which tools to call for a run and produces the final output.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Short label for logs, e.g. `llm (model: llama3.2)`.
    fn describe(&self) -> String;

    async fn drive(&self, session: &RunSession<'_>) -> Result<String, AgentError>;
}

/// The workflow agent: a planner bound to the tool set.
pub struct Agent {
    planner: Arc<dyn Planner>,
    tools: Arc<ToolRegistry>,
}

impl Agent {
    pub fn new(planner: Arc<dyn Planner>, tools: Arc<ToolRegistry>) -> Self {
        Self { planner, tools }
    }

    /// Build the configured planner and tool backends.
    pub fn from_config(config: &Config) -> Result<Self, AgentError> {
        let tools = Arc::new(ToolRegistry::from_config(&config.services)?);
        let planner: Arc<dyn Planner> = match config.planner {
            PlannerKind::Llm => {
                let model = config.model.as_ref().ok_or_else(|| {
                    AgentError::Config("the llm planner needs a model configuration".to_string())
                })?;
                let llm = Arc::new(OpenAiCompatibleClient::new(model.openai_base_url()));
                Arc::new(LlmPlanner::new(
                    llm,
                    model.model.clone(),
                    config.max_iterations,
                    &config.from_currency,
                    &config.to_currency,
                ))
            }
            PlannerKind::Pipeline => Arc::new(PipelinePlanner::new(
                config.from_currency.clone(),
                config.to_currency.clone(),
            )),
        };
        Ok(Self::new(planner, tools))
    }

    pub fn describe(&self) -> String {
        self.planner.describe()
    }

    /// Drive the planner over `upload`, reporting each step on `events`.
    ///
    /// Planner failures are returned to the caller untouched.
    pub async fn run(
        &self,
        upload: Bytes,
        events: mpsc::Sender<AgentEvent>,
    ) -> Result<String, AgentError> {
        let session = RunSession::new(&self.tools, ToolContext::new(upload), events);
        session
            .emit(AgentEvent::Started {
                planner: self.planner.describe(),
            })
            .await;
        self.planner.drive(&session).await
    }
}
