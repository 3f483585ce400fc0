//! Pull a model through the Ollama API before serving.
//!
//! Ollama streams newline-delimited JSON progress objects while it downloads
//! each layer. Progress is reported through `tracing` in 10% steps per layer.

use std::collections::HashMap;

use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;

use super::LlmError;

/// One progress object from `POST /api/pull`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PullProgress {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub completed: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Tracks the last reported decile per layer digest.
#[derive(Default)]
struct ProgressReporter {
    reported: HashMap<String, u64>,
}

impl ProgressReporter {
    fn observe(&mut self, progress: &PullProgress) {
        let digest = match progress.digest.as_deref().filter(|d| !d.is_empty()) {
            Some(d) => d,
            None => {
                tracing::info!("{}", progress.status);
                return;
            }
        };
        let (Some(total), Some(completed)) = (progress.total, progress.completed) else {
            return;
        };
        if total == 0 {
            return;
        }
        let decile = (completed.min(total) * 10 / total) * 10;
        let last = self.reported.entry(digest.to_string()).or_insert(u64::MAX);
        if *last != decile {
            *last = decile;
            tracing::info!(
                "pulling {}: {}% ({} / {} bytes)",
                short_digest(digest),
                decile,
                completed,
                total
            );
        }
    }
}

fn short_digest(digest: &str) -> &str {
    let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
    &hex[..hex.len().min(12)]
}

/// Pull `model` from the Ollama server at `base_url` (without `/v1`).
pub async fn pull_model(base_url: &str, model: &str) -> Result<(), LlmError> {
    let url = format!("{}/api/pull", base_url.trim_end_matches('/'));
    tracing::info!(
        "Pulling {} model (this may take a while if not already present)...",
        model
    );

    let response = reqwest::Client::new()
        .post(&url)
        .json(&json!({ "model": model, "stream": true }))
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let mut reporter = ProgressReporter::default();
    let mut buffer: Vec<u8> = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            handle_line(&line, &mut reporter)?;
        }
    }
    if !buffer.is_empty() {
        handle_line(&buffer, &mut reporter)?;
    }

    tracing::info!("{} model ready.", model);
    Ok(())
}

fn handle_line(line: &[u8], reporter: &mut ProgressReporter) -> Result<(), LlmError> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(());
    }
    let progress: PullProgress =
        serde_json::from_str(text).map_err(|e| LlmError::Malformed(e.to_string()))?;
    if let Some(error) = progress.error {
        return Err(LlmError::Malformed(format!("pull failed: {}", error)));
    }
    reporter.observe(&progress);
    Ok(())
}
