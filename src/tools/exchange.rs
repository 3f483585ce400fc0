//! Exchange rate tool backed by the freecurrencyapi.com `latest` endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{names, Tool, ToolContext, ToolError, ToolOutput};

/// Source of spot exchange rates.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Units of `to` per one unit of `from`.
    async fn latest(&self, from: &str, to: &str) -> Result<f64, ToolError>;
}

/// Client for `GET {base}/v1/latest?base_currency=..&currencies=..`.
pub struct FreeCurrencyApi {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl FreeCurrencyApi {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LatestResponse {
    data: std::collections::HashMap<String, f64>,
}

#[async_trait]
impl RateSource for FreeCurrencyApi {
    async fn latest(&self, from: &str, to: &str) -> Result<f64, ToolError> {
        let mut request = self
            .http
            .get(format!("{}/v1/latest", self.base_url))
            .query(&[("base_currency", from), ("currencies", to)]);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ToolError::ExchangeRate(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::ExchangeRate(format!("HTTP error: {}", status)));
        }

        let body: LatestResponse = response
            .json()
            .await
            .map_err(|e| ToolError::ExchangeRate(e.to_string()))?;
        body.data
            .get(to)
            .copied()
            .ok_or_else(|| ToolError::ExchangeRate(format!("no rate for {} in response", to)))
    }
}

/// Looks up the exchange rate between two currencies.
pub struct GetExchangeRate {
    source: Option<Arc<dyn RateSource>>,
}

impl GetExchangeRate {
    pub fn new(source: Option<Arc<dyn RateSource>>) -> Self {
        Self { source }
    }

    /// Fetch the rate, surfacing backend failures. Negative or non-finite
    /// rates are rejected.
    pub async fn lookup(&self, from: &str, to: &str) -> Result<f64, ToolError> {
        let source = self
            .source
            .as_ref()
            .ok_or(ToolError::NotConfigured("currency API"))?;
        let rate = source.latest(from, to).await?;
        if rate.is_finite() && rate >= 0.0 {
            Ok(rate)
        } else {
            Err(ToolError::ExchangeRate(format!("invalid rate {}", rate)))
        }
    }
}

fn currency_arg(args: &Value, key: &str) -> Result<String, ToolError> {
    args[key]
        .as_str()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{}' argument", key)))
}

#[async_trait]
impl Tool for GetExchangeRate {
    fn name(&self) -> &str {
        names::GET_EXCHANGE_RATE
    }

    fn description(&self) -> &str {
        "Get the exchange rate from one currency to another. Returns the number of to_currency units per from_currency unit, or null when unavailable."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "from_currency": {
                    "type": "string",
                    "description": "ISO currency code to convert from, e.g. USD"
                },
                "to_currency": {
                    "type": "string",
                    "description": "ISO currency code to convert to, e.g. EUR"
                }
            },
            "required": ["from_currency", "to_currency"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let from = currency_arg(&args, "from_currency")?;
        let to = currency_arg(&args, "to_currency")?;
        match self.lookup(&from, &to).await {
            Ok(rate) => Ok(ToolOutput::ok(json!(rate))),
            Err(e) => {
                tracing::warn!("Error getting exchange rate: {}", e);
                Ok(ToolOutput::degraded(Value::Null, e.to_string()))
            }
        }
    }
}
