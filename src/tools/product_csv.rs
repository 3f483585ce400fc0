//! CSV reading tool.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{names, Tool, ToolContext, ToolError, ToolOutput};

/// One data row of the uploaded CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub product: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub sales: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub amount: Option<f64>,
}

/// Parse delimited text with a header row into product records.
///
/// Requires a `product` column; `sales` and `amount` are optional and read as
/// absent when a cell is not numeric. Product names are kept byte-for-byte.
pub fn read_csv(raw: &[u8]) -> Result<Vec<ProductRecord>, ToolError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(raw);

    let headers = reader
        .headers()
        .map_err(|e| ToolError::InvalidCsv(e.to_string()))?;
    if !headers.iter().any(|h| h == "product") {
        return Err(ToolError::InvalidCsv(
            "no `product` column in header row".to_string(),
        ));
    }

    reader
        .deserialize::<ProductRecord>()
        .map(|row| row.map_err(|e| ToolError::InvalidCsv(e.to_string())))
        .collect()
}

/// Reads the CSV uploaded for this run.
pub struct ReadCsv;

#[async_trait]
impl Tool for ReadCsv {
    fn name(&self) -> &str {
        names::READ_CSV
    }

    fn description(&self) -> &str {
        "Read the uploaded CSV file. Returns a list of rows with the keys product (string), sales (number) and amount (number). Takes no arguments."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let records = read_csv(&ctx.upload)?;
        tracing::debug!(rows = records.len(), "Parsed uploaded CSV");
        let value = serde_json::to_value(&records)
            .map_err(|e| ToolError::InvalidCsv(e.to_string()))?;
        Ok(ToolOutput::ok(value))
    }
}
