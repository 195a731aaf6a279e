use std::collections::HashSet;
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{MatchError, Result};
use crate::policy::{NamedRule, RuleSet};
use crate::rule::CompiledRule;

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)
        .map_err(|e| MatchError::Config(format!("Failed to read config file: {e}")))?;
    let mut cfg: Config = toml::from_str(&txt)
        .map_err(|e| MatchError::Config(format!("Failed to parse config: {e}")))?;

    cfg.compiled = Some(validate_config(&cfg)?);

    Ok(cfg)
}

/// Check the rule list and compile every rule in one pass.
fn validate_config(cfg: &Config) -> Result<RuleSet> {
    if cfg.rules.is_empty() {
        return Err(MatchError::NoRules);
    }

    let mut names = HashSet::new();
    let mut rules = Vec::with_capacity(cfg.rules.len());
    for r in &cfg.rules {
        if r.name.trim().is_empty() {
            return Err(MatchError::Config("rule name cannot be empty".into()));
        }
        if !names.insert(r.name.as_str()) {
            return Err(MatchError::Config(format!("Duplicate rule name: {}", r.name)));
        }
        let rule = CompiledRule::parse(&r.matches).map_err(|e| {
            warn!(rule = %r.name, error = %e, "rejecting rule");
            MatchError::Config(format!("Rule '{}': {e}", r.name))
        })?;
        debug!(name = %r.name, rule = %rule, action = %r.action, "compiled rule");
        rules.push(NamedRule { name: r.name.clone(), rule, action: r.action });
    }

    Ok(RuleSet::new(rules, cfg.default_action))
}

impl Config {
    /// Compile the configured rules into a rule set ready to install.
    ///
    /// A config returned by [`load_from_path`] hands out the rules compiled while loading.
    pub fn compile(&self) -> Result<RuleSet> {
        match &self.compiled {
            Some(set) => Ok(set.clone()),
            None => validate_config(self),
        }
    }
}

/// Load, validate and compile a rule configuration file.
pub fn load_rule_set<P: AsRef<Path>>(p: P) -> Result<RuleSet> {
    let mut cfg = load_from_path(p)?;
    match cfg.compiled.take() {
        Some(set) => Ok(set),
        None => validate_config(&cfg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

    const TWO_RULES: &str = r#"
[[rules]]
name = "reads"
match = "--fc 3"
action = "accept"

[[rules]]
name = "rest"
match = ""
action = "drop"
"#;

    #[test]
    fn test_validation_keeps_compiled_rules() -> TestResult {
        let cfg: Config = toml::from_str(TWO_RULES)?;
        assert!(cfg.compiled.is_none());
        let set = validate_config(&cfg)?;
        assert_eq!(set.rules().len(), 2);
        assert_eq!(set.rules()[0].rule, CompiledRule::parse("--fc 3")?);

        let loaded = Config { compiled: Some(set.clone()), ..cfg };
        assert_eq!(loaded.compile()?, set);
        Ok(())
    }

    #[test]
    fn test_compile_validates_unloaded_config() -> TestResult {
        let cfg: Config = toml::from_str(&TWO_RULES.replace("\"rest\"", "\"reads\""))?;
        let err = cfg.compile().err().ok_or("duplicate names accepted")?;
        assert!(err.to_string().contains("Duplicate rule name: reads"), "{err}");

        let cfg: Config = toml::from_str(&TWO_RULES.replace("--fc 3", "--fc 3:1"))?;
        assert!(matches!(cfg.compile(), Err(MatchError::Config(msg)) if msg.contains("Rule 'reads'")));
        Ok(())
    }
}
