#![forbid(unsafe_code)]

use clap::Parser;
use modbus_match_lib::config::{load_from_path, LoggingConfig};
use modbus_match_lib::rule::OPTIONS_HELP;
use modbus_match_lib::telemetry::init_tracing;
use modbus_match_lib::{
    Action, CompiledRule, MatchError, NamedRule, PolicyHandle, RuleFormat, RuleSet,
};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Classify captured packets by their Modbus/TCP header",
    after_help = OPTIONS_HELP
)]
struct Cli {
    /// Path to rule configuration TOML file
    #[arg(short, long, value_name = "FILE", required_unless_present = "rule")]
    config: Option<PathBuf>,

    /// Single rule in option form, e.g. "--unit 1:10 ! --fc 5"; matching packets are accepted
    #[arg(short, long, value_name = "OPTIONS", allow_hyphen_values = true, conflicts_with = "config")]
    rule: Option<String>,

    /// Packet files hold the TCP/UDP payload instead of a raw IP packet
    #[arg(long)]
    payload: bool,

    /// List the loaded rules before classifying
    #[arg(long)]
    print: bool,

    /// Packet files to classify
    #[arg(value_name = "PACKET")]
    packets: Vec<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let config = match cli.config.as_deref().map(load_from_path).transpose() {
        Ok(config) => config,
        Err(err) => {
            init_logging(&LoggingConfig::default());
            error!(%err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    init_logging(config.as_ref().map(|c| &c.logging).unwrap_or(&LoggingConfig::default()));

    let rules = match (&config, &cli.rule) {
        (Some(config), _) => config.compile(),
        (None, Some(text)) => single_rule(text),
        (None, None) => Err(MatchError::NoRules),
    };
    let rules = match rules {
        Ok(rules) => rules,
        Err(err) => {
            error!(%err, "failed to compile rules");
            std::process::exit(1);
        }
    };
    info!(rules = rules.rules().len(), default = %rules.default_action(), "rules loaded");

    if cli.print {
        for named in rules.rules() {
            println!("{}: {} -> {}", named.name, named.rule.display(RuleFormat::Print), named.action);
        }
    }

    let policy = PolicyHandle::new(rules);
    let mut failed = false;
    for path in &cli.packets {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to read packet");
                failed = true;
                continue;
            }
        };
        let rules = policy.load();
        let verdict = if cli.payload {
            rules.classify_payload(&bytes, 0)
        } else {
            rules.classify_ip_packet(&bytes)
        };
        let name = verdict.rule.map_or("-", |r| r.name.as_str());
        println!("{}: {} {}", path.display(), name, verdict.action);
    }

    if failed {
        std::process::exit(1);
    }
}

fn single_rule(text: &str) -> modbus_match_lib::Result<RuleSet> {
    let rule = CompiledRule::parse(text)?;
    let named = NamedRule { name: "rule".to_string(), rule, action: Action::Accept };
    Ok(RuleSet::new(vec![named], Action::Drop))
}

fn init_logging(logging: &LoggingConfig) {
    if let Err(err) = init_tracing(logging) {
        eprintln!("failed to initialize logging: {err}");
    }
}
