//! Configuration management for csv-agent.
//!
//! Configuration can be set via environment variables (a `.env` file in the
//! working directory is loaded first when present):
//! - `OLLAMA_MODEL` - Required for the `llm` planner. The model identifier.
//! - `OLLAMA_BASE_URL` - Required for the `llm` planner. Model-serving base URL.
//! - `DATABASE_URL` - Optional. `postgres://...` or `sqlite:...` regional data store.
//! - `FREE_CURRENCY_API_URL` - Optional. Currency API base URL.
//! - `FREE_CURRENCY_API_KEY` - Optional. Currency API key.
//! - `PLANNER` - Optional. `llm` or `pipeline`. Defaults to `llm`.
//! - `PULL_MODEL_ON_START` - Optional. Pull the model before serving. Defaults to `true`.
//! - `UPLOAD_DIR` - Optional. Where uploads and logs live. Defaults to `uploads`.
//! - `HOST` - Optional. Server host. Defaults to `0.0.0.0`.
//! - `PORT` - Optional. Server port. Defaults to `8000`.
//! - `MAX_ITERATIONS` - Optional. LLM planner loop bound. Defaults to `10`.
//! - `RUN_TIMEOUT_SECS` - Optional. Deadline for a single workflow run.
//! - `MAX_UPLOAD_BYTES` - Optional. Upload size limit. Defaults to 10 MiB.
//! - `FROM_CURRENCY` / `TO_CURRENCY` - Optional. Defaults to `USD` / `EUR`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Which planner drives a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerKind {
    /// A chat model chooses the tool calls.
    Llm,
    /// Fixed read → lookup → convert → report sequence.
    Pipeline,
}

impl FromStr for PlannerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "llm" | "model" => Ok(Self::Llm),
            "pipeline" | "deterministic" => Ok(Self::Pipeline),
            other => Err(format!("expected `llm` or `pipeline`, got: {}", other)),
        }
    }
}

impl fmt::Display for PlannerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Llm => write!(f, "llm"),
            Self::Pipeline => write!(f, "pipeline"),
        }
    }
}

/// Model-serving configuration (Ollama or any OpenAI-compatible server).
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Model identifier, e.g. `llama3.2`
    pub model: String,

    /// Base URL of the serving runtime, without the `/v1` suffix
    pub base_url: String,

    /// Pull the model through the Ollama API before serving
    pub pull_on_start: bool,
}

impl ModelConfig {
    /// Chat-completions root (`{base_url}/v1`).
    pub fn openai_base_url(&self) -> String {
        format!("{}/v1", self.base_url.trim_end_matches('/'))
    }
}

/// External lookup services used by the tools.
#[derive(Debug, Clone, Default)]
pub struct ServicesConfig {
    /// Regional data store connection string
    pub database_url: Option<String>,

    /// Currency API base URL
    pub currency_api_url: Option<String>,

    /// Currency API key
    pub currency_api_key: Option<String>,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Planner used for workflow runs
    pub planner: PlannerKind,

    /// Model configuration; present whenever `planner` is `Llm`
    pub model: Option<ModelConfig>,

    /// Database and currency API endpoints
    pub services: ServicesConfig,

    /// Directory holding uploads and their progress logs
    pub upload_dir: PathBuf,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Maximum iterations for the LLM planner loop
    pub max_iterations: usize,

    /// Optional deadline for one workflow run
    pub run_timeout: Option<Duration>,

    /// Largest accepted upload body
    pub max_upload_bytes: usize,

    /// Currency the CSV amounts are expressed in
    pub from_currency: String,

    /// Currency the report converts into
    pub to_currency: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if the `llm` planner is selected
    /// and `OLLAMA_MODEL` or `OLLAMA_BASE_URL` is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let planner = optional_env("PLANNER")
            .map(|v| {
                v.parse::<PlannerKind>()
                    .map_err(|e| ConfigError::InvalidValue("PLANNER".to_string(), e))
            })
            .transpose()?
            .unwrap_or(PlannerKind::Llm);

        let model = match planner {
            PlannerKind::Llm => {
                let model = optional_env("OLLAMA_MODEL")
                    .ok_or_else(|| ConfigError::MissingEnvVar("OLLAMA_MODEL".to_string()))?;
                let base_url = optional_env("OLLAMA_BASE_URL")
                    .ok_or_else(|| ConfigError::MissingEnvVar("OLLAMA_BASE_URL".to_string()))?;
                validate_url("OLLAMA_BASE_URL", &base_url)?;
                let pull_on_start = optional_env("PULL_MODEL_ON_START")
                    .map(|v| {
                        parse_bool(&v).map_err(|e| {
                            ConfigError::InvalidValue("PULL_MODEL_ON_START".to_string(), e)
                        })
                    })
                    .transpose()?
                    .unwrap_or(true);
                Some(ModelConfig {
                    model,
                    base_url,
                    pull_on_start,
                })
            }
            PlannerKind::Pipeline => None,
        };

        let currency_api_url = optional_env("FREE_CURRENCY_API_URL");
        if let Some(url) = &currency_api_url {
            validate_url("FREE_CURRENCY_API_URL", url)?;
        }
        let services = ServicesConfig {
            database_url: optional_env("DATABASE_URL"),
            currency_api_url,
            currency_api_key: optional_env("FREE_CURRENCY_API_KEY"),
        };

        let upload_dir = optional_env("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("uploads"));

        let host = optional_env("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = parse_env("PORT", 8000u16)?;
        let max_iterations = parse_env("MAX_ITERATIONS", 10usize)?;
        let max_upload_bytes = parse_env("MAX_UPLOAD_BYTES", 10 * 1024 * 1024usize)?;

        let run_timeout = optional_env("RUN_TIMEOUT_SECS")
            .map(|v| {
                v.parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|e| {
                        ConfigError::InvalidValue("RUN_TIMEOUT_SECS".to_string(), e.to_string())
                    })
            })
            .transpose()?;

        let from_currency = currency_code("FROM_CURRENCY", "USD")?;
        let to_currency = currency_code("TO_CURRENCY", "EUR")?;

        Ok(Self {
            planner,
            model,
            services,
            upload_dir,
            host,
            port,
            max_iterations,
            run_timeout,
            max_upload_bytes,
            from_currency,
            to_currency,
        })
    }

    /// Create a pipeline-planner config rooted at `upload_dir` (useful for testing).
    pub fn new(upload_dir: PathBuf) -> Self {
        Self {
            planner: PlannerKind::Pipeline,
            model: None,
            services: ServicesConfig::default(),
            upload_dir,
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_iterations: 10,
            run_timeout: None,
            max_upload_bytes: 10 * 1024 * 1024,
            from_currency: "USD".to_string(),
            to_currency: "EUR".to_string(),
        }
    }

    /// Human-readable model label for logs.
    pub fn model_label(&self) -> &str {
        self.model.as_ref().map(|m| m.model.as_str()).unwrap_or("none")
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match optional_env(key) {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}

fn validate_url(key: &str, value: &str) -> Result<(), ConfigError> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}

fn currency_code(key: &str, default: &str) -> Result<String, ConfigError> {
    let code = optional_env(key).unwrap_or_else(|| default.to_string());
    let code = code.trim().to_uppercase();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(code)
    } else {
        Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("expected a three-letter currency code, got: {}", code),
        ))
    }
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Ok(false),
        other => Err(format!("expected boolean-like value, got: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planner_kind_parses_aliases() {
        assert_eq!("LLM".parse::<PlannerKind>(), Ok(PlannerKind::Llm));
        assert_eq!(" pipeline ".parse::<PlannerKind>(), Ok(PlannerKind::Pipeline));
        assert!("magic".parse::<PlannerKind>().is_err());
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("Yes"), Ok(true));
        assert_eq!(parse_bool("off"), Ok(false));
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn openai_base_url_appends_v1_once() {
        let model = ModelConfig {
            model: "llama3.2".to_string(),
            base_url: "http://localhost:11434/".to_string(),
            pull_on_start: false,
        };
        assert_eq!(model.openai_base_url(), "http://localhost:11434/v1");
    }

    #[test]
    fn test_config_uses_pipeline_and_usd_eur() {
        let config = Config::new(PathBuf::from("/tmp/uploads"));
        assert_eq!(config.planner, PlannerKind::Pipeline);
        assert_eq!(config.from_currency, "USD");
        assert_eq!(config.to_currency, "EUR");
        assert_eq!(config.model_label(), "none");
    }
}
