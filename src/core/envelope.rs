//! The canonical response envelope every downstream consumer depends on.
//!
//! An [`Envelope`] is built exactly once per upstream call, successful or
//! not, and is never mutated after it leaves the gateway. Terminal envelopes
//! for failure paths are produced by the constructors in this module so the
//! user-facing wording lives in one place.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub const TIMEOUT_MESSAGE: &str =
    "The fact-checking service took too long to respond. Please try again.";
pub const NETWORK_ERROR_MESSAGE: &str =
    "Unable to reach the fact-checking service. Please check your connection and try again.";
pub const UPSTREAM_ERROR_MESSAGE: &str =
    "The fact-checking service reported an error while handling this request.";
pub const CANCELLED_MESSAGE: &str = "The request was cancelled before a response arrived.";
pub const EMPTY_CONTENT_MESSAGE: &str = "The service returned an empty response.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    Success,
    Error,
    Timeout,
    NetworkError,
    Unknown,
}

impl EnvelopeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeStatus::Success => "success",
            EnvelopeStatus::Error => "error",
            EnvelopeStatus::Timeout => "timeout",
            EnvelopeStatus::NetworkError => "network_error",
            EnvelopeStatus::Unknown => "unknown",
        }
    }

    /// Maps an upstream status string onto the closed set. Anything
    /// unrecognized becomes [`EnvelopeStatus::Unknown`].
    pub fn from_upstream(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" | "ok" => EnvelopeStatus::Success,
            "error" | "failed" | "failure" => EnvelopeStatus::Error,
            "timeout" => EnvelopeStatus::Timeout,
            "network_error" => EnvelopeStatus::NetworkError,
            _ => EnvelopeStatus::Unknown,
        }
    }

    pub fn is_success(self) -> bool {
        self == EnvelopeStatus::Success
    }
}

impl fmt::Display for EnvelopeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedContent {
    pub concise: String,
    pub detailed: String,
}

impl FormattedContent {
    /// Uses the same text for both renditions.
    pub fn uniform(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            concise: text.clone(),
            detailed: text,
        }
    }
}

/// An image that can be placed straight into an `src` attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub src: String,
    pub mime: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedMedia {
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub original_query: String,
    pub session_id: String,
    pub formatted_content: FormattedContent,
    pub generated_media: GeneratedMedia,
    pub proof: Vec<String>,
    pub processing_timestamp: f64,
    pub status: EnvelopeStatus,
}

impl Envelope {
    /// Envelope for an upstream reply that carried plain text only.
    pub fn from_text(original_query: &str, text: &str) -> Self {
        let body = if text.trim().is_empty() {
            EMPTY_CONTENT_MESSAGE
        } else {
            text
        };
        Self::terminal(
            original_query,
            EnvelopeStatus::Success,
            FormattedContent::uniform(body),
        )
    }

    pub fn timeout(original_query: &str) -> Self {
        Self::terminal(
            original_query,
            EnvelopeStatus::Timeout,
            FormattedContent::uniform(TIMEOUT_MESSAGE),
        )
    }

    /// The failure detail is only exposed in the detailed rendition.
    pub fn network_error(original_query: &str, detail: &str) -> Self {
        Self::terminal(
            original_query,
            EnvelopeStatus::NetworkError,
            FormattedContent {
                concise: NETWORK_ERROR_MESSAGE.to_string(),
                detailed: format!("{NETWORK_ERROR_MESSAGE}\n\nDetails: {}", detail.trim()),
            },
        )
    }

    pub fn upstream_error(original_query: &str, detail: &str) -> Self {
        Self::terminal(
            original_query,
            EnvelopeStatus::Error,
            FormattedContent {
                concise: UPSTREAM_ERROR_MESSAGE.to_string(),
                detailed: format!("{UPSTREAM_ERROR_MESSAGE}\n\n{}", detail.trim()),
            },
        )
    }

    pub fn cancelled(original_query: &str) -> Self {
        Self::terminal(
            original_query,
            EnvelopeStatus::Error,
            FormattedContent::uniform(CANCELLED_MESSAGE),
        )
    }

    fn terminal(original_query: &str, status: EnvelopeStatus, content: FormattedContent) -> Self {
        Self {
            original_query: original_query.to_string(),
            session_id: String::new(),
            formatted_content: content,
            generated_media: GeneratedMedia::default(),
            proof: Vec::new(),
            processing_timestamp: now_timestamp(),
            status,
        }
    }

    pub fn images(&self) -> &[ImageRef] {
        &self.generated_media.images
    }
}

/// Seconds since the Unix epoch with sub-second precision.
pub fn now_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}
