//! Regional data lookup tool and its database backends.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::Row;

use super::{names, Tool, ToolContext, ToolError, ToolOutput};

/// One `regional_data` row. Nullable columns come back as `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionalRecord {
    pub region: Option<String>,
    pub product: String,
    pub sales: Option<f64>,
    pub amount: Option<f64>,
}

/// A store holding the `regional_data` table.
#[async_trait]
pub trait RegionalStore: Send + Sync {
    /// Rows whose `product` is one of `products`. `products` is never empty.
    async fn regional_data(
        &self,
        products: &BTreeSet<String>,
    ) -> Result<Vec<RegionalRecord>, ToolError>;
}

/// Pick a backend from the connection string scheme.
pub(super) fn connect(url: &str) -> Result<Arc<dyn RegionalStore>, ToolError> {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        Ok(Arc::new(PgRegionalStore::connect_lazy(url)?))
    } else if let Some(path) = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
    {
        Ok(Arc::new(SqliteRegionalStore::new(path)))
    } else {
        Err(ToolError::Database(format!(
            "unsupported DATABASE_URL scheme (expected postgres:// or sqlite:): {}",
            redact(url)
        )))
    }
}

/// Hide credentials before a connection string reaches a log line.
fn redact(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("****"));
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}

/// PostgreSQL backend. The pool connects on first use so an unreachable
/// database surfaces at lookup time, not at startup.
pub struct PgRegionalStore {
    pool: sqlx::Pool<sqlx::Postgres>,
}

impl PgRegionalStore {
    pub fn connect_lazy(url: &str) -> Result<Self, ToolError> {
        Self::connect_lazy_with_timeout(url, Duration::from_secs(10))
    }

    pub fn connect_lazy_with_timeout(
        url: &str,
        acquire_timeout: Duration,
    ) -> Result<Self, ToolError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(acquire_timeout)
            .connect_lazy(url)
            .map_err(|e| ToolError::Database(e.to_string()))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl RegionalStore for PgRegionalStore {
    async fn regional_data(
        &self,
        products: &BTreeSet<String>,
    ) -> Result<Vec<RegionalRecord>, ToolError> {
        let products: Vec<String> = products.iter().cloned().collect();
        let rows = sqlx::query(
            "SELECT region, product, \
                    CAST(sales AS DOUBLE PRECISION) AS sales, \
                    CAST(amount AS DOUBLE PRECISION) AS amount \
             FROM regional_data WHERE product = ANY($1)",
        )
        .bind(products)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ToolError::Database(e.to_string()))?;

        rows.iter()
            .map(|row| {
                Ok(RegionalRecord {
                    region: row.try_get("region")?,
                    product: row.try_get("product")?,
                    sales: row.try_get("sales")?,
                    amount: row.try_get("amount")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| ToolError::Database(e.to_string()))
    }
}

/// SQLite backend, opened read-only per lookup.
pub struct SqliteRegionalStore {
    path: PathBuf,
}

impl SqliteRegionalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn query_blocking(
        path: &PathBuf,
        products: &[String],
    ) -> Result<Vec<RegionalRecord>, rusqlite::Error> {
        let conn = rusqlite::Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let placeholders = vec!["?"; products.len()].join(", ");
        let sql = format!(
            "SELECT region, product, CAST(sales AS REAL), CAST(amount AS REAL) \
             FROM regional_data WHERE product IN ({})",
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(products.iter()), |row| {
            Ok(RegionalRecord {
                region: row.get(0)?,
                product: row.get(1)?,
                sales: row.get(2)?,
                amount: row.get(3)?,
            })
        })?;
        rows.collect()
    }
}

#[async_trait]
impl RegionalStore for SqliteRegionalStore {
    async fn regional_data(
        &self,
        products: &BTreeSet<String>,
    ) -> Result<Vec<RegionalRecord>, ToolError> {
        let path = self.path.clone();
        let products: Vec<String> = products.iter().cloned().collect();
        tokio::task::spawn_blocking(move || Self::query_blocking(&path, &products))
            .await
            .map_err(|e| ToolError::Database(format!("lookup task failed: {}", e)))?
            .map_err(|e| ToolError::Database(e.to_string()))
    }
}

/// Looks up regional rows for a set of product names.
pub struct GetRegionalData {
    store: Option<Arc<dyn RegionalStore>>,
}

impl GetRegionalData {
    pub fn new(store: Option<Arc<dyn RegionalStore>>) -> Self {
        Self { store }
    }

    /// Fetch rows for `products`, surfacing backend failures.
    pub async fn lookup(
        &self,
        products: &BTreeSet<String>,
    ) -> Result<Vec<RegionalRecord>, ToolError> {
        if products.is_empty() {
            return Ok(Vec::new());
        }
        let store = self
            .store
            .as_ref()
            .ok_or(ToolError::NotConfigured("regional data store"))?;
        let mut rows = store.regional_data(products).await?;
        rows.retain(|r| products.contains(&r.product));
        Ok(rows)
    }
}

fn parse_products(args: &Value) -> Result<BTreeSet<String>, ToolError> {
    let list = args["products"]
        .as_array()
        .ok_or_else(|| ToolError::InvalidArguments("Missing 'products' argument".to_string()))?;
    list.iter()
        .map(|p| {
            p.as_str()
                .map(str::to_string)
                .ok_or_else(|| {
                    ToolError::InvalidArguments(format!(
                        "product name must be a string, got {}",
                        p
                    ))
                })
        })
        .collect()
}

#[async_trait]
impl Tool for GetRegionalData {
    fn name(&self) -> &str {
        names::GET_REGIONAL_DATA
    }

    fn description(&self) -> &str {
        "Query the database for the regional data of the given products. Returns a list of rows with the keys region, product, sales and amount."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "products": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Product names to look up"
                }
            },
            "required": ["products"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let products = parse_products(&args)?;
        match self.lookup(&products).await {
            Ok(rows) => {
                let value = serde_json::to_value(&rows)
                    .map_err(|e| ToolError::Database(e.to_string()))?;
                Ok(ToolOutput::ok(value))
            }
            Err(e) => {
                tracing::warn!("Error getting regional data from database: {}", e);
                Ok(ToolOutput::degraded(json!([]), e.to_string()))
            }
        }
    }
}
