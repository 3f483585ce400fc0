//! Tools the workflow agent can call.
//!
//! Each tool describes itself with a JSON schema and executes against the
//! [`ToolContext`] of one run. The two lookup tools never fail towards the
//! planner: a backend failure becomes an empty or absent result marked as
//! degraded, so the run log shows why the data is missing.

mod exchange;
mod product_csv;
mod regional;

pub use product_csv::{read_csv, ProductRecord, ReadCsv};
pub use exchange::{FreeCurrencyApi, GetExchangeRate, RateSource};
pub use regional::{
    GetRegionalData, PgRegionalStore, RegionalRecord, RegionalStore, SqliteRegionalStore,
};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

use crate::config::ServicesConfig;
use crate::llm::{FunctionSchema, ToolSchema};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Invalid CSV: {0}")]
    InvalidCsv(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Exchange rate lookup failed: {0}")]
    ExchangeRate(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

/// Per-run inputs every tool can read.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Raw bytes of the uploaded CSV
    pub upload: Bytes,
}

impl ToolContext {
    pub fn new(upload: impl Into<Bytes>) -> Self {
        Self {
            upload: upload.into(),
        }
    }
}

/// Result of a tool call as seen by the planner.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub value: Value,
    /// Set when `value` stands in for a failed lookup
    pub degraded: Option<String>,
}

impl ToolOutput {
    pub fn ok(value: Value) -> Self {
        Self {
            value,
            degraded: None,
        }
    }

    pub fn degraded(value: Value, reason: impl Into<String>) -> Self {
        Self {
            value,
            degraded: Some(reason.into()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError>;
}

/// Name of each registered tool, for planners that call them directly.
pub mod names {
    pub const READ_CSV: &str = "read_csv";
    pub const GET_REGIONAL_DATA: &str = "get_regional_data_from_database";
    pub const GET_EXCHANGE_RATE: &str = "get_exchange_rate";
}

/// Name/description pair for prompt rendering.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

/// The set of tools bound to a planner.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Registry with the three workflow tools over the given backends.
    pub fn new(
        regional: Option<Arc<dyn RegionalStore>>,
        rates: Option<Arc<dyn RateSource>>,
    ) -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(ReadCsv));
        registry.register(Arc::new(GetRegionalData::new(regional)));
        registry.register(Arc::new(GetExchangeRate::new(rates)));
        registry
    }

    /// Build backends from configuration.
    ///
    /// Missing endpoints leave the backend unset, so the tool degrades at call
    /// time instead of failing startup.
    pub fn from_config(services: &ServicesConfig) -> Result<Self, ToolError> {
        let regional: Option<Arc<dyn RegionalStore>> = match &services.database_url {
            Some(url) => Some(regional::connect(url)?),
            None => {
                tracing::warn!("DATABASE_URL not set; regional lookups will return no rows");
                None
            }
        };
        let rates: Option<Arc<dyn RateSource>> = match &services.currency_api_url {
            Some(url) => Some(Arc::new(FreeCurrencyApi::new(
                url.clone(),
                services.currency_api_key.clone(),
            ))),
            None => {
                tracing::warn!("FREE_CURRENCY_API_URL not set; exchange rates will be absent");
                None
            }
        };
        Ok(Self::new(regional, rates))
    }

    pub fn empty() -> Self {
        Self {
            tools: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        match self.by_name.get(&name) {
            Some(&idx) => self.tools[idx] = tool,
            None => {
                self.by_name.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect()
    }

    pub fn get_tool_schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .iter()
            .map(|t| ToolSchema {
                schema_type: "function".to_string(),
                function: FunctionSchema {
                    name: t.name().to_string(),
                    description: t.description().to_string(),
                    parameters: t.parameters_schema(),
                },
            })
            .collect()
    }

    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let idx = self
            .by_name
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tracing::info!("Tool called: {}", name);
        self.tools[*idx].execute(args, ctx).await
    }
}
