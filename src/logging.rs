//! Diagnostic logging setup.
//!
//! Diagnostics go to stderr so `justify ask --format json` output on stdout
//! stays machine-readable. The filter comes from `JUSTIFY_LOG`, then
//! `RUST_LOG`, then the `log-level` config key, then `warn`.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "JUSTIFY_LOG";
const DEFAULT_DIRECTIVE: &str = "warn";

pub fn init_tracing(config_level: Option<&str>, verbose: bool) {
    let directive = resolve_directive(
        std::env::var(LOG_ENV).ok(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        config_level,
        verbose,
    );
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    // A subscriber may already be installed when embedded; keep it.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn resolve_directive(
    justify_log: Option<String>,
    rust_log: Option<String>,
    config_level: Option<&str>,
    verbose: bool,
) -> String {
    [justify_log, rust_log, config_level.map(str::to_string)]
        .into_iter()
        .flatten()
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| {
            if verbose {
                "debug".to_string()
            } else {
                DEFAULT_DIRECTIVE.to_string()
            }
        })
}
