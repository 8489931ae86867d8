//! One-shot `ask` command

use std::error::Error;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::QueryRequest;
use crate::cli::open_history;
use crate::cli::output::{format_turn, OutputFormat};
use crate::core::config::Config;
use crate::core::gateway::UpstreamGateway;
use crate::core::orchestrator::ChatOrchestrator;
use crate::core::persistence::TurnStore;

pub struct AskOptions {
    pub message: String,
    pub generate_image: bool,
    pub format: OutputFormat,
    pub concise: bool,
    pub record_history: bool,
}

/// Returns whether the service produced a successful answer.
pub async fn run_ask(
    config: &Config,
    client: reqwest::Client,
    options: AskOptions,
) -> Result<bool, Box<dyn Error>> {
    let message = options.message.trim();
    if message.is_empty() {
        eprintln!("Usage: justify ask <question>");
        std::process::exit(1);
    }

    let gateway =
        UpstreamGateway::new(client, config.endpoint()).with_timeout(config.timeout());
    let mut orchestrator = ChatOrchestrator::new(gateway);
    if options.record_history {
        if let Some(store) = open_history(config) {
            debug!(path = %store.path().display(), "Recording turn history");
            orchestrator = orchestrator.with_store(store as Arc<dyn TurnStore>);
        }
    }

    // Ctrl+C abandons the request instead of killing the process mid-write.
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let request =
        QueryRequest::new(message, config.user_id()).with_generate_image(options.generate_image);
    let turn = orchestrator.submit_with_cancel(request, &cancel).await?;
    interrupt.abort();

    println!(
        "{}",
        format_turn(&turn.response, &turn.view, options.format, options.concise)?
    );

    // The answer is already shown; give the history write a chance to land.
    if let Some(persistence) = turn.persistence {
        let _ = persistence.await;
    }

    Ok(turn.response.justifyai_response.status.is_success())
}
