//! A deliberately small Markdown subset rendered to an HTML fragment.
//!
//! This is not a Markdown engine. [`render`] runs a fixed sequence of pure
//! string rewrites and the order is part of the contract: later rules must
//! never re-process markup emitted by earlier ones.
//!
//! 0. [`escape_html`] neutralizes markup already present in the text.
//! 1. [`render_inline_links`] turns `[label](http(s)://url)` into anchors.
//! 2. [`autolink_bare_urls`] links remaining URLs outside existing anchors.
//! 3. [`render_tables`] turns pipe rows into one table per run of rows.
//! 4. [`render_emphasis_and_blocks`] handles bold, `#`–`###` headings and
//!    `* `/`- ` bullets, wrapping each run of bullets in one list.
//! 5. [`render_paragraphs`] splits on blank lines and wraps the result.
//!
//! Running the pipeline over its own output is unsupported.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static INLINE_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\]\n]+)\]\((https?://[^\s)]+)\)").expect("INLINE_LINK_RE")
});

static ANCHOR_SPAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<a\s[^>]*>.*?</a>").expect("ANCHOR_SPAN_RE"));

/// Runs over escaped text, where every `&` opens an entity. Only `&amp;`
/// belongs to a URL; `&quot;`, `&lt;` and `&gt;` end it.
static BARE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(?:[^\s<&]|&amp;)+").expect("BARE_URL_RE")
});

static TABLE_ROW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\|(.*)\|\s*$").expect("TABLE_ROW_RE"));

static TABLE_SEPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\|(?:\s*:?-+:?\s*\|)+\s*$").expect("TABLE_SEPARATOR_RE")
});

static BOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^\n]+?)\*\*").expect("BOLD_RE"));

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,3})\s+(.+?)\s*$").expect("HEADING_RE"));

static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[*-]\s+(.+?)\s*$").expect("BULLET_RE"));

static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n\s*").expect("BLANK_LINES_RE"));

const BLOCK_OPENERS: &[&str] = &["<h1>", "<h2>", "<h3>", "<ul>", "<table>"];
const BLOCK_CLOSERS: &[&str] = &["</h1>", "</h2>", "</h3>", "</ul>", "</table>"];

/// Renders the supported subset. Blank input renders to an empty string.
pub fn render(text: &str) -> String {
    if text.trim().is_empty() {
        return String::new();
    }

    let text = escape_html(text);
    let text = render_inline_links(&text);
    let text = autolink_bare_urls(&text);
    let text = render_tables(&text);
    let text = render_emphasis_and_blocks(&text);
    render_paragraphs(&text)
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}

pub fn render_inline_links(text: &str) -> String {
    INLINE_LINK_RE
        .replace_all(text, |caps: &Captures| anchor(&caps[2], &caps[1]))
        .into_owned()
}

/// Links bare URLs in escaped text, leaving anchor spans untouched. Trailing
/// sentence punctuation and quoting entities stay outside the link.
pub fn autolink_bare_urls(text: &str) -> String {
    let mut linked = String::with_capacity(text.len());
    let mut cursor = 0;
    for span in ANCHOR_SPAN_RE.find_iter(text) {
        linked.push_str(&link_urls(&text[cursor..span.start()]));
        linked.push_str(span.as_str());
        cursor = span.end();
    }
    linked.push_str(&link_urls(&text[cursor..]));
    linked
}

/// Rewrites `| a | b |` rows. A row directly above a `|---|---|` separator
/// becomes a header row; the separator itself emits nothing.
pub fn render_tables(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut rows: Vec<String> = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        if TABLE_SEPARATOR_RE.is_match(line) {
            continue;
        }
        if let Some(caps) = TABLE_ROW_RE.captures(line) {
            let is_header = lines
                .get(index + 1)
                .is_some_and(|next| TABLE_SEPARATOR_RE.is_match(next));
            rows.push(table_row(&caps[1], is_header));
            continue;
        }
        flush_table(&mut rows, &mut out);
        out.push((*line).to_string());
    }
    flush_table(&mut rows, &mut out);

    out.join("\n")
}

pub fn render_emphasis_and_blocks(text: &str) -> String {
    let text = BOLD_RE.replace_all(text, "<strong>$1</strong>");

    let mut out: Vec<String> = Vec::new();
    let mut items: Vec<String> = Vec::new();
    for line in text.split('\n') {
        if let Some(caps) = BULLET_RE.captures(line) {
            items.push(format!("<li>{}</li>", &caps[1]));
            continue;
        }
        flush_list(&mut items, &mut out);
        match HEADING_RE.captures(line) {
            Some(caps) => {
                let level = caps[1].len();
                out.push(format!("<h{level}>{}</h{level}>", &caps[2]));
            }
            None => out.push(line.to_string()),
        }
    }
    flush_list(&mut items, &mut out);

    out.join("\n")
}

/// Blank lines become paragraph boundaries; remaining single newlines become
/// `<br>` except next to block elements.
pub fn render_paragraphs(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let paragraphs: Vec<String> = BLANK_LINES_RE
        .split(trimmed)
        .map(join_paragraph_lines)
        .collect();
    format!("<p>{}</p>", paragraphs.join("</p><p>"))
}

fn anchor(href: &str, label: &str) -> String {
    format!(r#"<a href="{href}" target="_blank" rel="noopener noreferrer">{label}</a>"#)
}

fn link_urls(segment: &str) -> String {
    BARE_URL_RE
        .replace_all(segment, |caps: &Captures| {
            let matched = &caps[0];
            let mut url = matched.trim_end_matches(['.', ',', ';', ':', '!', '?', ')']);
            if url.ends_with("&amp") {
                url = &matched[..url.len() + 1];
            }
            let trailing = &matched[url.len()..];
            format!("{}{trailing}", anchor(url, url))
        })
        .into_owned()
}

fn table_row(inner: &str, is_header: bool) -> String {
    let tag = if is_header { "th" } else { "td" };
    let cells: String = inner
        .split('|')
        .map(|cell| format!("<{tag}>{}</{tag}>", cell.trim()))
        .collect();
    format!("<tr>{cells}</tr>")
}

fn flush_table(rows: &mut Vec<String>, out: &mut Vec<String>) {
    if rows.is_empty() {
        return;
    }
    out.push(format!("<table><tbody>{}</tbody></table>", rows.concat()));
    rows.clear();
}

fn flush_list(items: &mut Vec<String>, out: &mut Vec<String>) {
    if items.is_empty() {
        return;
    }
    out.push(format!("<ul>{}</ul>", items.concat()));
    items.clear();
}

fn join_paragraph_lines(paragraph: &str) -> String {
    let mut joined = String::with_capacity(paragraph.len());
    let mut previous: Option<&str> = None;
    for line in paragraph.split('\n') {
        if let Some(prev) = previous {
            let block_edge = BLOCK_CLOSERS.iter().any(|tag| prev.ends_with(tag))
                || BLOCK_OPENERS.iter().any(|tag| line.starts_with(tag));
            if !block_edge {
                joined.push_str("<br>");
            }
        }
        joined.push_str(line);
        previous = Some(line);
    }
    joined
}
