use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::DEFAULT_USER_ID;
use crate::core::gateway::DEFAULT_TIMEOUT;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8000";

pub const ENDPOINT_ENV: &str = "JUSTIFY_ENDPOINT";
pub const TIMEOUT_ENV: &str = "JUSTIFY_TIMEOUT_SECS";

/// Every key accepted by `justify config set`/`unset`, in display order.
pub const CONFIG_KEYS: &[&str] = &[
    "endpoint",
    "timeout-secs",
    "user-id",
    "generate-image",
    "persist",
    "history-file",
    "log-level",
];

/// On-disk settings. Every field is optional; accessors supply the defaults.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    /// Base URL of the agent service, or its `/query` route.
    pub endpoint: Option<String>,
    pub timeout_secs: Option<u64>,
    pub user_id: Option<String>,
    /// Ask the service to generate an illustrative image with each answer
    pub generate_image: Option<bool>,
    /// Record each turn to the history file
    pub persist: Option<bool>,
    pub history_file: Option<PathBuf>,
    /// Tracing filter directive, e.g. `info` or `justify=debug`
    pub log_level: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SettingError {
    UnknownKey(String),
    InvalidBoolean(String),
    InvalidNumber { key: String, input: String },
    MissingValue(&'static str),
}

impl fmt::Display for SettingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingError::UnknownKey(key) => write!(
                f,
                "Unknown config key: {key} (expected one of: {})",
                CONFIG_KEYS.join(", ")
            ),
            SettingError::InvalidBoolean(input) => write!(
                f,
                "Invalid boolean value: {input}. Use 'on' or 'off' (also accepts true/false, yes/no)"
            ),
            SettingError::InvalidNumber { key, input } => {
                write!(f, "Invalid value for {key}: {input} (expected a positive whole number)")
            }
            SettingError::MissingValue(key) => write!(f, "A value is required for {key}"),
        }
    }
}

impl std::error::Error for SettingError {}

impl Config {
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn user_id(&self) -> &str {
        self.user_id.as_deref().unwrap_or(DEFAULT_USER_ID)
    }

    pub fn generate_image(&self) -> bool {
        self.generate_image.unwrap_or(true)
    }

    pub fn persist(&self) -> bool {
        self.persist.unwrap_or(true)
    }

    /// The configured history file, else the platform data directory.
    pub fn history_path(&self) -> Option<PathBuf> {
        self.history_file.clone().or_else(Self::default_history_path)
    }

    /// Applies `JUSTIFY_*` overrides on top of the file settings.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), SettingError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENDPOINT_ENV).filter(|value| !value.trim().is_empty()) {
            self.endpoint = Some(endpoint.trim().to_string());
        }
        if let Some(raw) = lookup(TIMEOUT_ENV).filter(|value| !value.trim().is_empty()) {
            self.timeout_secs = Some(parse_timeout(TIMEOUT_ENV, &raw)?);
        }
        Ok(())
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<String, SettingError> {
        let value = value.trim();
        match key {
            "endpoint" => self.endpoint = Some(require(value, "endpoint")?),
            "timeout-secs" => self.timeout_secs = Some(parse_timeout(key, value)?),
            "user-id" => self.user_id = Some(require(value, "user-id")?),
            "generate-image" => self.generate_image = Some(parse_bool_setting(value)?),
            "persist" => self.persist = Some(parse_bool_setting(value)?),
            "history-file" => self.history_file = Some(PathBuf::from(require(value, "history-file")?)),
            "log-level" => self.log_level = Some(require(value, "log-level")?),
            other => return Err(SettingError::UnknownKey(other.to_string())),
        }
        Ok(format!("Set {key} to: {}", self.format_value(key)))
    }

    pub fn unset_value(&mut self, key: &str) -> Result<String, SettingError> {
        match key {
            "endpoint" => self.endpoint = None,
            "timeout-secs" => self.timeout_secs = None,
            "user-id" => self.user_id = None,
            "generate-image" => self.generate_image = None,
            "persist" => self.persist = None,
            "history-file" => self.history_file = None,
            "log-level" => self.log_level = None,
            other => return Err(SettingError::UnknownKey(other.to_string())),
        }
        Ok(format!("Unset {key}"))
    }

    /// Effective value of `key` for display; defaults are marked as such.
    pub fn format_value(&self, key: &str) -> String {
        match key {
            "endpoint" => with_default_marker(self.endpoint(), self.endpoint.is_none()),
            "timeout-secs" => with_default_marker(
                &self.timeout().as_secs().to_string(),
                self.timeout_secs.is_none(),
            ),
            "user-id" => with_default_marker(self.user_id(), self.user_id.is_none()),
            "generate-image" => with_default_marker(
                format_bool(self.generate_image()),
                self.generate_image.is_none(),
            ),
            "persist" => with_default_marker(format_bool(self.persist()), self.persist.is_none()),
            "history-file" => match self.history_path() {
                Some(path) => with_default_marker(&path_display(path), self.history_file.is_none()),
                None => "(unavailable)".to_string(),
            },
            "log-level" => self.log_level.clone().unwrap_or_else(|| "(unset)".to_string()),
            _ => "(unknown key)".to_string(),
        }
    }

    pub fn print_all(&self) {
        println!("Current configuration:");
        for key in CONFIG_KEYS {
            println!("  {key}: {}", self.format_value(key));
        }
    }
}

/// Accepts on/off, true/false, yes/no and 1/0, case-insensitively.
pub fn parse_bool(input: &str) -> Option<bool> {
    match input.to_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Some(true),
        "off" | "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

pub fn format_bool(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

/// Shortens paths under `$HOME` to `~/...` on Unix-like systems.
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}

fn parse_bool_setting(input: &str) -> Result<bool, SettingError> {
    parse_bool(input).ok_or_else(|| SettingError::InvalidBoolean(input.to_string()))
}

fn parse_timeout(key: &str, input: &str) -> Result<u64, SettingError> {
    input
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs > 0)
        .ok_or_else(|| SettingError::InvalidNumber {
            key: key.to_string(),
            input: input.to_string(),
        })
}

fn require(value: &str, key: &'static str) -> Result<String, SettingError> {
    if value.is_empty() {
        Err(SettingError::MissingValue(key))
    } else {
        Ok(value.to_string())
    }
}

fn with_default_marker(value: &str, is_default: bool) -> String {
    if is_default {
        format!("{value} (default)")
    } else {
        value.to_string()
    }
}
