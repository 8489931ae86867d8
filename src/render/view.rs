use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::core::envelope::{Envelope, EnvelopeStatus, ImageRef};
use crate::media::sniff::{strip_inline_images, ImageCollector};
use crate::render::markdown;

static HYPERLINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s)]+").expect("HYPERLINK_RE"));

/// Render-ready view of one finished turn.
///
/// `images` holds the envelope's own images followed by any payloads found
/// inline in the text; those payloads are removed from the rendered HTML.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedTurn {
    pub status: EnvelopeStatus,
    pub concise_html: String,
    pub detailed_html: String,
    pub images: Vec<ImageRef>,
    pub proof: Vec<String>,
    pub links: Vec<String>,
}

impl RenderedTurn {
    pub fn from_envelope(envelope: &Envelope) -> Self {
        let content = &envelope.formatted_content;

        let mut collector = ImageCollector::new();
        for image in envelope.images() {
            collector.push(image.clone());
        }
        collector.scan_text(&content.detailed);
        collector.scan_text(&content.concise);

        let detailed = strip_inline_images(&content.detailed);
        let concise = strip_inline_images(&content.concise);

        Self {
            status: envelope.status,
            concise_html: markdown::render(&concise),
            links: extract_hyperlinks(&detailed),
            detailed_html: markdown::render(&detailed),
            images: collector.finish(),
            proof: envelope.proof.clone(),
        }
    }
}

/// Ordered, deduplicated `http(s)` URLs found in free text.
pub fn extract_hyperlinks(text: &str) -> Vec<String> {
    let mut links: Vec<String> = Vec::new();
    for found in HYPERLINK_RE.find_iter(text) {
        let url = found.as_str();
        if !links.iter().any(|existing| existing == url) {
            links.push(url.to_string());
        }
    }
    links
}
