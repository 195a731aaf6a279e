use serde::Deserialize;

use crate::policy::{Action, RuleSet};

/// One configured rule
#[derive(Debug, Deserialize, Clone)]
pub struct RuleConfig {
    /// Unique rule name, used in verdicts and logs
    pub name: String,
    /// Match options in save form
    /// Example: "--unit 1:10 ! --fc 5:16"
    /// Empty string matches every packet that carries a Modbus envelope
    #[serde(rename = "match")]
    pub matches: String,
    /// Action taken when this rule is the first to match
    pub action: Action,
}

/// Logging configuration
/// Controls application-level structured logging (stderr)
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    /// Default: "info"
    /// Can be overridden at runtime via RUST_LOG environment variable
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Show module path (target) in log messages
    /// Default: false
    #[serde(default = "default_false")]
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), show_target: default_false() }
    }
}

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Action for packets no rule matches, including packets without a Modbus envelope
    /// Default: "drop"
    #[serde(default)]
    pub default_action: Action,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Rules, evaluated in order, first match wins
    /// At least one rule is required
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    /// Rules compiled by the loader
    #[serde(skip)]
    pub(crate) compiled: Option<RuleSet>,
}

fn default_false() -> bool {
    false
}

fn default_log_level() -> String {
    "info".to_string()
}
