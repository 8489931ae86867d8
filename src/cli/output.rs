//! Formatting a finished turn for the terminal.

use clap::ValueEnum;
use serde::Serialize;

use crate::api::ChatResponse;
use crate::render::markdown::escape_html;
use crate::render::RenderedTurn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// The answer as written by the service, with sources listed below
    #[default]
    Text,
    /// A self-contained HTML fragment
    Html,
    /// The full response envelope plus its rendered view
    Json,
}

#[derive(Serialize)]
struct JsonTurn<'a> {
    #[serde(flatten)]
    response: &'a ChatResponse,
    view: &'a RenderedTurn,
}

pub fn format_turn(
    response: &ChatResponse,
    view: &RenderedTurn,
    format: OutputFormat,
    concise: bool,
) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Text => Ok(format_text(response, view, concise)),
        OutputFormat::Html => Ok(format_html(view, concise)),
        OutputFormat::Json => serde_json::to_string_pretty(&JsonTurn { response, view }),
    }
}

fn format_text(response: &ChatResponse, view: &RenderedTurn, concise: bool) -> String {
    let envelope = &response.justifyai_response;
    let content = if concise {
        &envelope.formatted_content.concise
    } else {
        &envelope.formatted_content.detailed
    };

    let mut out = content.trim_end().to_string();
    if !envelope.proof.is_empty() {
        out.push_str("\n\nSources:");
        for (index, url) in envelope.proof.iter().enumerate() {
            out.push_str(&format!("\n  {}. {url}", index + 1));
        }
    }
    if !view.images.is_empty() {
        let noun = if view.images.len() == 1 { "image" } else { "images" };
        out.push_str(&format!(
            "\n\n[{} {noun} generated; use --format html to view]",
            view.images.len()
        ));
    }
    if !envelope.status.is_success() {
        out.push_str(&format!("\n\n[status: {}]", envelope.status));
    }
    out
}

fn format_html(view: &RenderedTurn, concise: bool) -> String {
    let body = if concise {
        &view.concise_html
    } else {
        &view.detailed_html
    };

    let mut out = format!(
        "<div class=\"justify-turn\" data-status=\"{}\">\n{body}\n",
        view.status
    );
    for (index, image) in view.images.iter().enumerate() {
        out.push_str(&format!(
            "<img src=\"{}\" alt=\"Generated image {}\">\n",
            escape_html(&image.src),
            index + 1
        ));
    }
    if !view.proof.is_empty() {
        out.push_str("<ol class=\"proof\">");
        for url in &view.proof {
            let url = escape_html(url);
            out.push_str(&format!(
                "<li><a href=\"{url}\" target=\"_blank\" rel=\"noopener noreferrer\">{url}</a></li>"
            ));
        }
        out.push_str("</ol>\n");
    }
    out.push_str("</div>");
    out
}
