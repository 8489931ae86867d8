//! Command-line interface parsing and handling

pub mod ask;
pub mod output;

use std::error::Error;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::cli::ask::{run_ask, AskOptions};
use crate::cli::output::OutputFormat;
use crate::core::config::{Config, CONFIG_KEYS};
use crate::core::gateway::UpstreamGateway;
use crate::core::normalize::normalize;
use crate::core::persistence::JsonlTurnStore;
use crate::logging::init_tracing;
use crate::render::markdown;

const VERSION: &str = match option_env!("VERGEN_GIT_DESCRIBE") {
    Some(describe) => describe,
    None => env!("CARGO_PKG_VERSION"),
};

#[derive(Parser)]
#[command(name = "justify")]
#[command(version = VERSION)]
#[command(about = "Ask the JustifyAI fact-checking service and render its answers")]
#[command(
    long_about = "Justify sends questions to a JustifyAI agent service, normalizes whatever it \
returns into a stable response envelope, and renders the answer as text, HTML, or JSON.\n\n\
Environment Variables:\n\
  JUSTIFY_ENDPOINT      Agent service URL (overrides the config file)\n\
  JUSTIFY_TIMEOUT_SECS  Request timeout in seconds (default 120)\n\
  JUSTIFY_LOG           Diagnostic log filter, e.g. 'debug' (falls back to RUST_LOG)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Agent service URL; either the service root or its /query route
    #[arg(short = 'e', long, global = true, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Request timeout in seconds
    #[arg(short = 't', long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Identity sent with each request
    #[arg(short = 'u', long, global = true, value_name = "ID")]
    pub user: Option<String>,

    /// Log debug diagnostics to stderr
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ask the service a question
    Ask {
        /// The question (multiple words are joined with spaces)
        #[arg(required = true)]
        message: Vec<String>,
        /// Do not ask the service to generate an image
        #[arg(long)]
        no_image: bool,
        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Show the concise answer instead of the detailed one
        #[arg(short = 'c', long)]
        concise: bool,
        /// Do not record this turn in the history file
        #[arg(long)]
        no_history: bool,
    },
    /// Render Markdown-subset text from a file (or stdin) to HTML
    Render {
        file: Option<PathBuf>,
    },
    /// Normalize a raw upstream JSON payload from a file (or stdin) into an envelope
    Normalize {
        file: Option<PathBuf>,
        /// Query text recorded in the envelope when the payload has none
        #[arg(short = 'q', long, default_value = "")]
        query: String,
    },
    /// Check whether the agent service is up
    Health,
    /// Show recorded turns
    History {
        /// Only show the most recent N turns
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Inspect or change configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration (default)
    Show,
    /// Set a configuration value
    Set {
        key: String,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Reset a configuration value to its default
    Unset { key: String },
    /// Print the configuration file location
    Path,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    let file_config = Config::load()?;
    init_tracing(file_config.log_level.as_deref(), args.verbose);
    let config = effective_config(file_config.clone(), &args)?;

    match args.command {
        Commands::Ask {
            message,
            no_image,
            format,
            concise,
            no_history,
        } => {
            let options = AskOptions {
                message: message.join(" "),
                generate_image: config.generate_image() && !no_image,
                format,
                concise,
                record_history: config.persist() && !no_history,
            };
            let succeeded = run_ask(&config, build_client()?, options).await?;
            if !succeeded {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Render { file } => {
            println!("{}", markdown::render(&read_input(file)?));
            Ok(())
        }
        Commands::Normalize { file, query } => {
            let raw = read_input(file)?;
            let payload = serde_json::from_str(&raw)
                .unwrap_or_else(|_| serde_json::Value::String(raw.clone()));
            println!("{}", serde_json::to_string_pretty(&normalize(&payload, &query))?);
            Ok(())
        }
        Commands::Health => {
            let gateway = UpstreamGateway::new(build_client()?, config.endpoint())
                .with_timeout(config.timeout().min(Duration::from_secs(10)));
            let report = gateway.health().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.reachable {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::History { limit } => {
            let Some(path) = config.history_path() else {
                eprintln!("❌ No history location is available on this system");
                std::process::exit(1);
            };
            let records = JsonlTurnStore::new(path).load_all().await?;
            let skip = limit.map_or(0, |limit| records.len().saturating_sub(limit));
            for record in &records[skip..] {
                println!("{}", serde_json::to_string(record)?);
            }
            Ok(())
        }
        Commands::Config { command } => {
            run_config(file_config, command.unwrap_or(ConfigCommands::Show))
        }
    }
}

fn run_config(mut config: Config, command: ConfigCommands) -> Result<(), Box<dyn Error>> {
    match command {
        ConfigCommands::Show => config.print_all(),
        ConfigCommands::Path => println!("{}", Config::config_path().display()),
        ConfigCommands::Set { key, value } => match config.set_value(&key, &value.join(" ")) {
            Ok(message) => {
                config.save()?;
                println!("✅ {message}");
            }
            Err(err) => {
                eprintln!("❌ {err}");
                std::process::exit(1);
            }
        },
        ConfigCommands::Unset { key } => match config.unset_value(&key) {
            Ok(message) => {
                config.save()?;
                println!("✅ {message}");
            }
            Err(err) => {
                eprintln!("❌ {err}");
                eprintln!("Known keys: {}", CONFIG_KEYS.join(", "));
                std::process::exit(1);
            }
        },
    }
    Ok(())
}

/// File settings, then `JUSTIFY_*` variables, then command-line flags.
fn effective_config(mut config: Config, args: &Args) -> Result<Config, Box<dyn Error>> {
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = Some(endpoint.clone());
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = Some(timeout.max(1));
    }
    if let Some(user) = &args.user {
        config.user_id = Some(user.clone());
    }
    Ok(config)
}

fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(concat!("justify/", env!("CARGO_PKG_VERSION")))
        .build()
}

fn read_input(file: Option<PathBuf>) -> Result<String, std::io::Error> {
    match file {
        Some(path) => std::fs::read_to_string(path),
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            Ok(buffer)
        }
    }
}

pub(crate) fn open_history(config: &Config) -> Option<Arc<JsonlTurnStore>> {
    config.history_path().map(|path| Arc::new(JsonlTurnStore::new(path)))
}

#[cfg(test)]
mod tests;
