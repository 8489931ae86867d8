//! Justify is a client for the JustifyAI fact-checking agent service.
//!
//! The upstream service answers in whatever shape it likes, so the crate is
//! built around one stable record, the response [`core::envelope::Envelope`]:
//! - [`core::gateway`] performs the bounded outbound call and turns every
//!   outcome, failures included, into an envelope.
//! - [`core::normalize`] maps arbitrary upstream JSON onto the envelope.
//! - [`media`] finds embedded images in payloads and free text.
//! - [`render`] turns envelope text into HTML for display.
//! - [`core::orchestrator`] sequences turns and hands finished ones to
//!   [`core::persistence`].
//!
//! The `justify` binary routes through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod logging;
pub mod media;
pub mod render;
pub mod utils;
