//! API request and response types.

use serde::{Deserialize, Serialize};

/// Form posted to `/process`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessForm {
    /// Identifier returned by `/upload`
    pub filename: String,
}

/// Style of the message banner on the upload page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Success,
    Danger,
    Info,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Danger => "danger",
            Self::Info => "info",
        }
    }
}

/// Banner shown above the upload form.
#[derive(Debug, Clone)]
pub struct Message {
    pub kind: MessageKind,
    pub text: String,
}

/// Everything the upload page can display.
#[derive(Debug, Clone, Default)]
pub struct PageView {
    pub message: Option<Message>,
    /// Identifier of the stored upload, enabling the process button
    pub filename: Option<String>,
    /// Show the log panel and poll `/log/{filename}`
    pub show_log: bool,
}

impl PageView {
    pub fn message(kind: MessageKind, text: impl Into<String>) -> Self {
        Self {
            message: Some(Message {
                kind,
                text: text.into(),
            }),
            ..Self::default()
        }
    }

    pub fn danger(text: impl Into<String>) -> Self {
        Self::message(MessageKind::Danger, text)
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_log(mut self) -> Self {
        self.show_log = true;
        self
    }
}

/// Response of `POST /runs/{id}/cancel`.
#[derive(Debug, Clone, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,

    /// Planner serving workflow runs
    pub planner: String,
}
