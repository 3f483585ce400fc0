//! Deterministic planner: the mandated tool order as plain control flow.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::tools::{names, ProductRecord, RegionalRecord, ToolOutput};

use super::{AgentError, AgentEvent, Planner, RunSession};

const MISSING: &str = "n/a";

const NO_PRODUCT_DATA: &str =
    "The uploaded CSV doesn't contain product data. Please upload a CSV with product information (a `product` column).";

pub struct PipelinePlanner {
    from_currency: String,
    to_currency: String,
}

impl PipelinePlanner {
    pub fn new(from_currency: String, to_currency: String) -> Self {
        Self {
            from_currency,
            to_currency,
        }
    }
}

fn decode<T: DeserializeOwned>(tool: &str, output: ToolOutput) -> Result<T, AgentError> {
    serde_json::from_value(output.value).map_err(|e| AgentError::UnexpectedOutput {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

/// Distinct non-blank product names in first-seen order.
fn distinct_products(records: &[ProductRecord]) -> Vec<String> {
    let mut seen = Vec::new();
    for record in records {
        if !record.product.trim().is_empty() && !seen.contains(&record.product) {
            seen.push(record.product.clone());
        }
    }
    seen
}

#[async_trait]
impl Planner for PipelinePlanner {
    fn describe(&self) -> String {
        format!("pipeline ({} -> {})", self.from_currency, self.to_currency)
    }

    async fn drive(&self, session: &RunSession<'_>) -> Result<String, AgentError> {
        let read = session.call_tool(names::READ_CSV, json!({})).await;
        let records: Vec<ProductRecord> = match read {
            Ok(output) => decode(names::READ_CSV, output)?,
            Err(e) => {
                session
                    .emit(AgentEvent::Note {
                        content: format!("CSV could not be used: {}", e),
                    })
                    .await;
                return Ok(NO_PRODUCT_DATA.to_string());
            }
        };

        let products = distinct_products(&records);
        if products.is_empty() {
            return Ok(NO_PRODUCT_DATA.to_string());
        }
        session
            .emit(AgentEvent::Note {
                content: format!("Products found: {}", products.join(", ")),
            })
            .await;

        let output = session
            .call_tool(names::GET_REGIONAL_DATA, json!({ "products": products }))
            .await?;
        let mut regional: Vec<RegionalRecord> = decode(names::GET_REGIONAL_DATA, output)?;
        regional.sort_by(|a, b| {
            let pos = |p: &str| products.iter().position(|x| x == p).unwrap_or(usize::MAX);
            pos(&a.product)
                .cmp(&pos(&b.product))
                .then_with(|| a.region.cmp(&b.region))
        });

        let output = session
            .call_tool(
                names::GET_EXCHANGE_RATE,
                json!({ "from_currency": self.from_currency, "to_currency": self.to_currency }),
            )
            .await?;
        let rate = match output.value {
            Value::Null => None,
            other => Some(decode::<f64>(names::GET_EXCHANGE_RATE, ToolOutput::ok(other))?),
        };

        Ok(compose_report(
            &products,
            &regional,
            rate,
            &self.from_currency,
            &self.to_currency,
        ))
    }
}

/// Render regional rows as a Markdown table with converted amounts.
pub fn compose_report(
    products: &[String],
    regional: &[RegionalRecord],
    rate: Option<f64>,
    from_currency: &str,
    to_currency: &str,
) -> String {
    let mut out = String::new();

    match rate {
        Some(rate) => out.push_str(&format!(
            "Exchange rate: 1 {} = {:.4} {}\n\n",
            from_currency, rate, to_currency
        )),
        None => out.push_str(&format!(
            "Exchange rate {} -> {} is unavailable; converted amounts are shown as n/a.\n\n",
            from_currency, to_currency
        )),
    }

    if regional.is_empty() {
        out.push_str(&format!(
            "No regional data was found for the products: {}.\n",
            products.join(", ")
        ));
        return out;
    }

    out.push_str(&format!(
        "| Region | Product | Sales | Amount ({from}) | Amount ({to}) |\n|---|---|---|---|---|\n",
        from = from_currency,
        to = to_currency
    ));
    for row in regional {
        let amount = row.amount.map(|a| format!("{:.2}", a));
        let converted = rate.zip(row.amount).map(|(r, a)| format!("{:.2}", a * r));
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            row.region.as_deref().map(escape_cell).as_deref().unwrap_or(MISSING),
            escape_cell(&row.product),
            row.sales.map(format_quantity).as_deref().unwrap_or(MISSING),
            amount.as_deref().unwrap_or(MISSING),
            converted.as_deref().unwrap_or(MISSING)
        ));
    }
    out
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn format_quantity(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use crate::tools::{RateSource, RegionalStore, ToolContext, ToolError, ToolRegistry};

    struct FixedRegional(Vec<RegionalRecord>);

    #[async_trait]
    impl RegionalStore for FixedRegional {
        async fn regional_data(
            &self,
            products: &BTreeSet<String>,
        ) -> Result<Vec<RegionalRecord>, ToolError> {
            Ok(self
                .0
                .iter()
                .filter(|r| products.contains(&r.product))
                .cloned()
                .collect())
        }
    }

    struct FixedRate(f64);

    #[async_trait]
    impl RateSource for FixedRate {
        async fn latest(&self, _from: &str, _to: &str) -> Result<f64, ToolError> {
            Ok(self.0)
        }
    }

    fn record(region: &str, product: &str, sales: f64, amount: f64) -> RegionalRecord {
        RegionalRecord {
            region: Some(region.to_string()),
            product: product.to_string(),
            sales: Some(sales),
            amount: Some(amount),
        }
    }

    async fn run(tools: ToolRegistry, csv: &'static [u8]) -> (String, Vec<AgentEvent>) {
        let planner = PipelinePlanner::new("USD".to_string(), "EUR".to_string());
        let (tx, mut rx) = mpsc::channel(64);
        let session = RunSession::new(&tools, ToolContext::new(csv), tx);
        let output = planner.drive(&session).await.expect("pipeline output");
        drop(session);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (output, events)
    }

    #[tokio::test]
    async fn composes_converted_table_in_csv_order() {
        let tools = ToolRegistry::new(
            Some(Arc::new(FixedRegional(vec![
                record("South", "Widget", 4.0, 40.0),
                record("North", "Gadget", 2.0, 12.0),
                record("North", "Widget", 10.0, 100.0),
                record("East", "Sprocket", 7.0, 70.0),
            ]))),
            Some(Arc::new(FixedRate(0.5))),
        );

        let (report, events) =
            run(tools, b"product,sales,amount\nWidget,1,2\nGadget,3,4\nWidget,5,6\n").await;

        assert!(report.starts_with("Exchange rate: 1 USD = 0.5000 EUR"));
        let rows: Vec<&str> = report
            .lines()
            .filter(|l| l.starts_with("| ") && !l.starts_with("| Region"))
            .collect();
        assert_eq!(
            rows,
            vec![
                "| North | Widget | 10 | 100.00 | 50.00 |",
                "| South | Widget | 4 | 40.00 | 20.00 |",
                "| North | Gadget | 2 | 12.00 | 6.00 |",
            ]
        );
        let regional_args = events.iter().find_map(|e| match e {
            AgentEvent::ToolCall { name, args } if name == names::GET_REGIONAL_DATA => {
                Some(args.clone())
            }
            _ => None,
        });
        assert_eq!(regional_args, Some(json!({"products": ["Widget", "Gadget"]})));
    }

    #[tokio::test]
    async fn missing_rate_marks_conversion_unavailable() {
        let tools = ToolRegistry::new(
            Some(Arc::new(FixedRegional(vec![record("North", "Widget", 1.5, 10.0)]))),
            None,
        );

        let (report, events) = run(tools, b"product\nWidget\n").await;

        assert!(report.contains("unavailable"));
        assert!(report.contains("| North | Widget | 1.50 | 10.00 | n/a |"));
        assert!(events.iter().any(|e| matches!(
            e,
            AgentEvent::ToolDegraded { name, .. } if name == names::GET_EXCHANGE_RATE
        )));
    }

    #[tokio::test]
    async fn csv_without_products_asks_for_product_data() {
        let tools = ToolRegistry::new(None, None);

        let (report, events) = run(tools, b"name,sales\nWidget,1\n").await;

        assert_eq!(report, NO_PRODUCT_DATA);
        assert!(!events.iter().any(|e| matches!(
            e,
            AgentEvent::ToolCall { name, .. } if name == names::GET_REGIONAL_DATA
        )));
    }

    #[test]
    fn empty_lookup_says_so() {
        let report = compose_report(&["Widget".to_string()], &[], Some(0.9), "USD", "EUR");
        assert!(report.contains("No regional data was found for the products: Widget."));
    }

    #[test]
    fn null_columns_render_as_missing() {
        let row = RegionalRecord {
            region: None,
            product: "Widget".to_string(),
            sales: None,
            amount: None,
        };
        let report = compose_report(&["Widget".to_string()], &[row], Some(0.9), "USD", "EUR");
        assert!(report.contains("| n/a | Widget | n/a | n/a | n/a |"));
    }

    #[test]
    fn pipes_in_cells_are_escaped() {
        let report = compose_report(
            &["A|B".to_string()],
            &[record("North", "A|B", 1.0, 1.0)],
            Some(1.0),
            "USD",
            "EUR",
        );
        assert!(report.contains("| North | A\\|B | 1 | 1.00 | 1.00 |"));
    }
}
