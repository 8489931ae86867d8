//! Image recovery from upstream payloads.
//!
//! Upstream replies carry images in three shapes: proper data URIs, bare
//! base64 blobs with no framing at all, and either of those buried inside
//! nested JSON. Everything found here is returned as an [`ImageRef`] whose
//! `src` is a well-formed data URI, deduplicated by exact `src`.
//!
//! Bare base64 is only accepted when its leading characters match a known
//! image signature and the decoded leading bytes carry the matching magic
//! number. Short incidental matches are rejected by [`MIN_BARE_BASE64_LEN`].

use std::collections::HashSet;
use std::ops::Range;
use std::sync::LazyLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use regex::Regex;
use serde_json::{Map, Value};

use crate::core::envelope::ImageRef;

/// Shortest bare base64 run (after whitespace removal) treated as an image.
pub const MIN_BARE_BASE64_LEN: usize = 64;

/// Sixteen characters decode to the twelve bytes the WEBP brand check needs.
const SIGNATURE_HEAD_LEN: usize = 16;

const MAX_DEPTH: usize = 32;

/// Keys whose string values may hold an image payload, in visit order.
const PAYLOAD_KEYS: &[&str] = &[
    "src",
    "base64_data",
    "b64",
    "base64",
    "image_base64",
    "data",
    "image",
    "content",
];

/// Keys that hold further image-bearing nodes.
const CONTAINER_KEYS: &[&str] = &[
    "images",
    "generated_media",
    "media",
    "items",
    "results",
    "outputs",
];

/// Followed at most once on any path from the root.
const NESTED_PAYLOAD_KEY: &str = "payload";

struct Signature {
    prefix: &'static str,
    mime: &'static str,
    magic: &'static [u8],
    /// Container formats name the payload kind at a fixed offset.
    brand: Option<(usize, &'static [u8])>,
}

impl Signature {
    fn matches_bytes(&self, bytes: &[u8]) -> bool {
        if !bytes.starts_with(self.magic) {
            return false;
        }
        match self.brand {
            Some((offset, brand)) => bytes.get(offset..offset + brand.len()) == Some(brand),
            None => true,
        }
    }
}

const SIGNATURES: &[Signature] = &[
    Signature {
        prefix: "iVBORw0KGgo",
        mime: "image/png",
        magic: &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A],
        brand: None,
    },
    Signature {
        prefix: "/9j/",
        mime: "image/jpeg",
        magic: &[0xFF, 0xD8, 0xFF],
        brand: None,
    },
    Signature {
        prefix: "R0lGOD",
        mime: "image/gif",
        magic: b"GIF8",
        brand: None,
    },
    Signature {
        prefix: "UklGR",
        mime: "image/webp",
        magic: b"RIFF",
        brand: Some((8, b"WEBP" as &[u8])),
    },
];

/// Matches the first line of the payload; wrapped continuation lines are
/// picked up by `extend_wrapped_payload`.
static DATA_URI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)data:image/(png|jpe?g|webp|gif);base64,([A-Za-z0-9+/]+={0,2})")
        .expect("DATA_URI_RE")
});

static BASE64_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9+/]+={0,2}").expect("BASE64_RUN_RE"));

static EMPTY_MARKDOWN_IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[[^\]\n]*\]\(\s*\)").expect("EMPTY_MARKDOWN_IMAGE_RE"));

/// Ordered, deduplicating accumulator shared by the structural walk and the
/// inline text scan. The first occurrence of a `src` keeps its position.
#[derive(Debug, Default)]
pub struct ImageCollector {
    images: Vec<ImageRef>,
    seen: HashSet<String>,
}

impl ImageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when an image with the same `src` is already present.
    pub fn push(&mut self, image: ImageRef) -> bool {
        if self.seen.contains(&image.src) {
            return false;
        }
        self.seen.insert(image.src.clone());
        self.images.push(image);
        true
    }

    pub fn collect_value(&mut self, value: &Value) {
        self.walk(value, 0, false);
    }

    pub fn scan_text(&mut self, text: &str) {
        for (_, image) in find_inline_images(text) {
            self.push(image);
        }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn finish(self) -> Vec<ImageRef> {
        self.images
    }

    fn walk(&mut self, value: &Value, depth: usize, inside_payload: bool) {
        if depth > MAX_DEPTH {
            return;
        }
        match value {
            Value::String(raw) => {
                if let Some(image) = recognize_image_string(raw) {
                    self.push(image);
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.walk(item, depth + 1, inside_payload);
                }
            }
            Value::Object(map) => {
                if is_marked_unusable(map) {
                    return;
                }
                for key in PAYLOAD_KEYS.iter().chain(CONTAINER_KEYS) {
                    if let Some(nested) = map.get(*key) {
                        self.walk(nested, depth + 1, inside_payload);
                    }
                }
                if !inside_payload {
                    if let Some(nested) = map.get(NESTED_PAYLOAD_KEY) {
                        self.walk(nested, depth + 1, true);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Walks an arbitrary JSON value through the allow-listed keys and returns
/// every recognizable image, deduplicated in first-seen order.
pub fn collect_images(value: &Value) -> Vec<ImageRef> {
    let mut collector = ImageCollector::new();
    collector.collect_value(value);
    collector.finish()
}

/// Extracts data URIs and signature-matched bare base64 appearing inline in
/// free text, in order of appearance.
pub fn scan_text(text: &str) -> Vec<ImageRef> {
    let mut collector = ImageCollector::new();
    collector.scan_text(text);
    collector.finish()
}

/// Removes every payload [`scan_text`] would extract, along with markdown
/// image wrappers left empty by the removal.
pub fn strip_inline_images(text: &str) -> String {
    let found = find_inline_images(text);
    if found.is_empty() {
        return text.to_string();
    }

    let mut stripped = String::with_capacity(text.len());
    let mut cursor = 0;
    for (range, _) in found {
        stripped.push_str(&text[cursor..range.start]);
        cursor = range.end;
    }
    stripped.push_str(&text[cursor..]);

    EMPTY_MARKDOWN_IMAGE_RE
        .replace_all(&stripped, "")
        .into_owned()
}

/// Accepts `data:image/<png|jpeg|jpg|webp|gif>;base64,<payload>`.
///
/// Whitespace inside the payload is removed. The subtype is lowercased and
/// `jpg` reports the `image/jpeg` MIME type.
pub fn parse_data_uri(raw: &str) -> Option<ImageRef> {
    let trimmed = raw.trim();
    let (meta, payload) = trimmed.split_once(',')?;
    let meta = meta.to_ascii_lowercase();
    let rest = meta.strip_prefix("data:image/")?;

    let mut params = rest.split(';');
    let subtype = params.next()?.trim();
    if !params.any(|param| param.trim() == "base64") {
        return None;
    }
    let mime = match subtype {
        "png" => "image/png",
        "jpeg" | "jpg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => return None,
    };

    let payload = strip_whitespace(payload);
    if payload.is_empty() || !is_base64_body(&payload) {
        return None;
    }

    Some(ImageRef {
        src: format!("data:image/{subtype};base64,{payload}"),
        mime: mime.to_string(),
    })
}

/// Recognizes an unframed base64 image by its leading characters and wraps
/// it into a data URI.
pub fn sniff_base64(raw: &str) -> Option<ImageRef> {
    let payload = strip_whitespace(raw);
    if payload.len() < MIN_BARE_BASE64_LEN || !is_base64_body(&payload) {
        return None;
    }

    let signature = SIGNATURES
        .iter()
        .find(|signature| payload.starts_with(signature.prefix))?;

    let head = BASE64.decode(&payload[..SIGNATURE_HEAD_LEN]).ok()?;
    if sniff_image_bytes(&head) != Some(signature.mime) {
        return None;
    }

    Some(ImageRef {
        src: format!("data:{};base64,{payload}", signature.mime),
        mime: signature.mime.to_string(),
    })
}

/// Magic-number check over raw bytes.
pub fn sniff_image_bytes(bytes: &[u8]) -> Option<&'static str> {
    SIGNATURES
        .iter()
        .find(|signature| signature.matches_bytes(bytes))
        .map(|signature| signature.mime)
}

fn recognize_image_string(raw: &str) -> Option<ImageRef> {
    let framed = raw
        .trim_start()
        .get(..5)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:"));
    if framed {
        return parse_data_uri(raw);
    }
    sniff_base64(raw)
}

fn is_marked_unusable(map: &Map<String, Value>) -> bool {
    let has_error = match map.get("error") {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(message)) => !message.trim().is_empty(),
        Some(_) => true,
    };
    let error_format = map
        .get("format")
        .and_then(Value::as_str)
        .is_some_and(|format| format.eq_ignore_ascii_case("error"));
    let zero_sized = ["size_bytes", "size"]
        .iter()
        .filter_map(|key| map.get(*key))
        .any(|size| size.as_f64() == Some(0.0));

    has_error || error_format || zero_sized
}

fn find_inline_images(text: &str) -> Vec<(Range<usize>, ImageRef)> {
    let mut found = Vec::new();
    let mut cursor = 0;

    for captures in DATA_URI_RE.captures_iter(text) {
        let (Some(uri), Some(payload)) = (captures.get(0), captures.get(2)) else {
            continue;
        };
        scan_bare_runs(text, cursor..uri.start(), &mut found);
        let end = extend_wrapped_payload(text, payload.start(), payload.end(), text.len());
        if let Some(image) = parse_data_uri(&text[uri.start()..end]) {
            found.push((uri.start()..end, image));
        }
        cursor = end;
    }
    scan_bare_runs(text, cursor..text.len(), &mut found);

    found
}

fn scan_bare_runs(text: &str, span: Range<usize>, found: &mut Vec<(Range<usize>, ImageRef)>) {
    let offset = span.start;
    let mut consumed = span.start;
    for run in BASE64_RUN_RE.find_iter(&text[span.clone()]) {
        let start = offset + run.start();
        if start < consumed {
            continue;
        }
        let end = extend_wrapped_payload(text, start, offset + run.end(), span.end);
        if end - start < MIN_BARE_BASE64_LEN {
            continue;
        }
        if let Some(image) = sniff_base64(&text[start..end]) {
            found.push((start..end, image));
            consumed = end;
        } else if starts_line(text, start) {
            // Lines wrapped onto a rejected block are not images of their own.
            consumed = end;
        }
    }
}

/// Extends a base64 payload at `start..end` over following lines that hold
/// nothing but base64, the way encoders wrap at a fixed column.
///
/// Every continuation line except the last must be as wide as the widest of
/// the first two lines. A payload that starts its own line fixes the width,
/// so a wider line after it is never joined. A trailing line that would
/// leave the payload length misaligned to four characters is treated as
/// prose and left out.
fn extend_wrapped_payload(text: &str, start: usize, end: usize, limit: usize) -> usize {
    let mut ends = vec![end];
    let mut width = starts_line(text, start).then_some(end - start);

    loop {
        let current = ends[ends.len() - 1];
        if text[..current].ends_with('=') {
            break;
        }
        let Some(segment) = next_base64_line(text, current, limit) else {
            break;
        };
        let len = segment.len();
        ends.push(segment.end);

        let padded = text[segment].ends_with('=');
        match width {
            None => {
                let first = len.max(end - start);
                width = Some(first);
                if len < first {
                    break;
                }
            }
            Some(width) if len > width => {
                ends.pop();
                break;
            }
            Some(width) if len < width => break,
            Some(_) => {}
        }
        if padded {
            break;
        }
    }

    let full = ends[ends.len() - 1];
    if base64_len(&text[start..full]) % 4 == 0 {
        return full;
    }
    ends.iter()
        .rev()
        .copied()
        .find(|&candidate| base64_len(&text[start..candidate]) % 4 == 0)
        .unwrap_or(full)
}

/// The base64 body of the line after `from`, when the rest of the current
/// line is blank and the next line is base64 alone.
fn next_base64_line(text: &str, from: usize, limit: usize) -> Option<Range<usize>> {
    let rest = text[from..limit].trim_start_matches([' ', '\t']);
    let next = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))?;
    let line = next.trim_start_matches([' ', '\t']);
    let line_start = limit - line.len();

    let body = line.bytes().take_while(|&b| is_base64_byte(b)).count();
    if body == 0 {
        return None;
    }
    let padding = line[body..].bytes().take_while(|&b| b == b'=').count();
    if padding > 2 {
        return None;
    }
    let segment_end = body + padding;
    let tail = line[segment_end..].trim_start_matches([' ', '\t']);
    if !(tail.is_empty() || tail.starts_with('\n') || tail.starts_with("\r\n")) {
        return None;
    }

    Some(line_start..line_start + segment_end)
}

fn starts_line(text: &str, at: usize) -> bool {
    let before = text[..at].trim_end_matches([' ', '\t']);
    before.is_empty() || before.ends_with('\n')
}

fn base64_len(payload: &str) -> usize {
    payload.bytes().filter(|b| !b.is_ascii_whitespace()).count()
}

fn is_base64_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/'
}

fn strip_whitespace(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_ascii_whitespace()).collect()
}

/// Standard alphabet with at most two trailing `=`.
fn is_base64_body(payload: &str) -> bool {
    let body = payload.trim_end_matches('=');
    payload.len() - body.len() <= 2
        && body.bytes().all(is_base64_byte)
}
