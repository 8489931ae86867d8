//! Recovery of embedded image payloads from upstream replies.

pub mod sniff;

pub use sniff::{collect_images, scan_text, strip_inline_images, ImageCollector};
