mod loader;
mod types;

pub use loader::{load_from_path, load_rule_set};
pub use types::{Config, LoggingConfig, RuleConfig};
