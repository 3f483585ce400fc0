//! # CSV Agent
//!
//! A small web service that enriches an uploaded product CSV with regional
//! sales data and a live exchange rate.
//!
//! This library provides:
//! - An HTTP API for uploading CSV files and following their processing
//! - Tools for reading the CSV, querying regional data and fetching rates
//! - Two planners driving those tools: an LLM tool-calling loop and a fixed pipeline
//! - An append-only progress log per run that the browser polls
//!
//! ## Architecture
//!
//! 1. The browser uploads a CSV and receives an opaque identifier
//! 2. Processing starts a supervised background run for that identifier
//! 3. The planner calls tools; every step lands in the run's progress log
//! 4. The log ends with a single `=== run ...` marker when the run stops
//!
//! ## Example
//!
//! ```rust,ignore
//! use csv_agent::{api, config::Config};
//!
//! let config = Config::from_env()?;
//! api::serve(config).await?;
//! ```

pub mod agent;
pub mod api;
pub mod config;
pub mod llm;
pub mod progress;
pub mod tools;
pub mod uploads;

pub use config::Config;
