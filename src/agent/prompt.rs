//! Prompt templates for the workflow agent.

use crate::tools::{names, ToolRegistry};

/// Build the system prompt with tool definitions.
pub fn build_system_prompt(tools: &ToolRegistry, from_currency: &str, to_currency: &str) -> String {
    let tool_descriptions = tools
        .list_tools()
        .iter()
        .map(|t| format!("- **{}**: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a helpful assistant that can read CSV files, query the database and get the exchange rate.

## Your Tools

{tool_descriptions}

## Required Procedure

When reading a CSV file, you should:
1. First read the CSV file using the {read_csv} tool
2. Extract a list of product names from the CSV data
3. Use those product names to query the database using the {regional} tool
4. Get the exchange rate from {from} to {to} using the {rate} tool
5. Return the regional data in a table format with the exchange rate applied

If the CSV doesn't contain product data, inform the user that they need to upload a CSV with product information."#,
        tool_descriptions = tool_descriptions,
        read_csv = names::READ_CSV,
        regional = names::GET_REGIONAL_DATA,
        rate = names::GET_EXCHANGE_RATE,
        from = from_currency,
        to = to_currency,
    )
}

/// Build the task message that starts every run.
pub fn build_task_prompt(from_currency: &str, to_currency: &str) -> String {
    format!(
        r#"Read the CSV file with a tool and extract a list of products, get the regional data for those products from the database with a tool, then get the exchange rate from {from} to {to} with a tool, and finally return the regional data in a table format with the exchange rate applied.

IMPORTANT: You MUST call all three tools in sequence:
1. {read_csv} - to read the CSV file
2. {regional} - to get regional data for the products
3. {rate} - to get the {from} to {to} exchange rate

If the CSV doesn't contain product names, inform the user they need to upload a CSV with product data."#,
        read_csv = names::READ_CSV,
        regional = names::GET_REGIONAL_DATA,
        rate = names::GET_EXCHANGE_RATE,
        from = from_currency,
        to = to_currency,
    )
}
