//! Converts whatever the upstream service returned into an [`Envelope`].
//!
//! The upstream contract is unversioned, so nothing here assumes a schema.
//! Each envelope field is resolved through a fixed chain of JSON pointers and
//! the first usable value wins; every chain ends in an explicit default.
//! [`normalize`] is total: any input, however malformed, yields an envelope
//! with non-empty content and a status from the closed set.

use serde_json::Value;
use tracing::debug;

use crate::core::envelope::{
    now_timestamp, Envelope, EnvelopeStatus, FormattedContent, GeneratedMedia, ImageRef,
    EMPTY_CONTENT_MESSAGE,
};
use crate::media::sniff::collect_images;

/// Wrapper key under which an already-shaped envelope arrives.
pub const WRAPPER_KEY: &str = "justifyai_response";

pub const UNSERIALIZABLE_PLACEHOLDER: &str = "[unserializable upstream payload]";

const SESSION_POINTERS: &[&str] = &["/session_id"];
const QUERY_POINTERS: &[&str] = &["/original_query"];
const CONCISE_POINTERS: &[&str] = &[
    "/formatted_content/concise",
    "/response",
    "/content",
    "/answer",
];
const DETAILED_POINTERS: &[&str] = &[
    "/formatted_content/detailed",
    "/detailed_response",
    "/detailed",
];
const IMAGE_POINTERS: &[&str] = &["/generated_media/images", "/images", "/generated_images"];
const PROOF_POINTERS: &[&str] = &["/sources", "/proof", "/references"];
const TIMESTAMP_POINTERS: &[&str] = &["/processing_timestamp", "/timestamp"];
const STATUS_POINTERS: &[&str] = &["/status"];

/// Normalizes a payload from a call that completed successfully.
pub fn normalize(raw: &Value, original_query: &str) -> Envelope {
    normalize_with_status(raw, original_query, EnvelopeStatus::Success)
}

/// Normalizes a payload, using `default_status` when the payload carries no
/// status of its own.
pub fn normalize_with_status(
    raw: &Value,
    original_query: &str,
    default_status: EnvelopeStatus,
) -> Envelope {
    let (source, shaped) = match raw.get(WRAPPER_KEY) {
        Some(inner @ Value::Object(_)) => (inner, true),
        _ => (raw, false),
    };
    debug!(shaped, "Normalizing upstream payload");

    let concise = first_text(source, CONCISE_POINTERS)
        .or_else(|| source.as_str().filter(|text| !text.trim().is_empty()))
        .map(str::to_string)
        .unwrap_or_else(|| serialize_fallback(raw));
    let detailed = first_text(source, DETAILED_POINTERS)
        .map(str::to_string)
        .unwrap_or_else(|| concise.clone());

    Envelope {
        original_query: first_string(source, QUERY_POINTERS)
            .unwrap_or(original_query)
            .to_string(),
        session_id: first_string(source, SESSION_POINTERS)
            .map(str::to_string)
            .unwrap_or_else(synthesize_session_id),
        formatted_content: FormattedContent { concise, detailed },
        generated_media: GeneratedMedia {
            images: resolve_images(source),
        },
        proof: resolve_proof(source),
        processing_timestamp: TIMESTAMP_POINTERS
            .iter()
            .find_map(|pointer| source.pointer(pointer).and_then(Value::as_f64))
            .unwrap_or_else(now_timestamp),
        status: first_string(source, STATUS_POINTERS)
            .map(EnvelopeStatus::from_upstream)
            .unwrap_or(default_status),
    }
}

/// First string at any pointer, empty strings included.
fn first_string<'a>(source: &'a Value, pointers: &[&str]) -> Option<&'a str> {
    pointers
        .iter()
        .find_map(|pointer| source.pointer(pointer).and_then(Value::as_str))
}

/// First string with visible content.
fn first_text<'a>(source: &'a Value, pointers: &[&str]) -> Option<&'a str> {
    pointers.iter().find_map(|pointer| {
        source
            .pointer(pointer)
            .and_then(Value::as_str)
            .filter(|text| !text.trim().is_empty())
    })
}

/// First location that yields a usable image; failed generations recorded
/// under an earlier key do not hide later ones.
fn resolve_images(source: &Value) -> Vec<ImageRef> {
    IMAGE_POINTERS
        .iter()
        .filter_map(|pointer| source.pointer(pointer))
        .map(collect_images)
        .find(|images| !images.is_empty())
        .unwrap_or_default()
}

fn resolve_proof(source: &Value) -> Vec<String> {
    let Some(entries) = PROOF_POINTERS
        .iter()
        .find_map(|pointer| source.pointer(pointer).and_then(Value::as_array))
    else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(url) => Some(url.trim()),
            Value::Object(map) => ["url", "uri", "link"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .map(str::trim),
            _ => None,
        })
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect()
}

fn serialize_fallback(raw: &Value) -> String {
    match raw {
        Value::Null => EMPTY_CONTENT_MESSAGE.to_string(),
        Value::String(text) if text.trim().is_empty() => EMPTY_CONTENT_MESSAGE.to_string(),
        other => serde_json::to_string(other)
            .unwrap_or_else(|_| UNSERIALIZABLE_PLACEHOLDER.to_string()),
    }
}

fn synthesize_session_id() -> String {
    format!("session_{}", uuid::Uuid::new_v4().simple())
}
