use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Deserialize;
use tracing::{debug, info};

use crate::envelope::Envelope;
use crate::evaluator::evaluate;
use crate::rule::CompiledRule;
use crate::transport::locate_payload;

/// What the host should do with a packet.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Accept,
    #[default]
    Drop,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Accept => f.write_str("accept"),
            Action::Drop => f.write_str("drop"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedRule {
    pub name: String,
    pub rule: CompiledRule,
    pub action: Action,
}

/// Outcome of classifying one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict<'a> {
    /// First matching rule, `None` when the default action applied
    pub rule: Option<&'a NamedRule>,
    pub action: Action,
}

/// Ordered rules; the first rule that matches decides the action.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleSet {
    rules: Vec<NamedRule>,
    default_action: Action,
}

impl RuleSet {
    pub fn new(rules: Vec<NamedRule>, default_action: Action) -> Self {
        Self { rules, default_action }
    }

    pub fn rules(&self) -> &[NamedRule] {
        &self.rules
    }

    pub fn default_action(&self) -> Action {
        self.default_action
    }

    /// Classify an already extracted envelope.
    pub fn classify_envelope(&self, envelope: &Envelope) -> Verdict<'_> {
        match self.rules.iter().find(|r| evaluate(envelope, &r.rule)) {
            Some(rule) => Verdict { rule: Some(rule), action: rule.action },
            None => Verdict { rule: None, action: self.default_action },
        }
    }

    /// Classify a transport payload that starts at `transport_header_end`.
    ///
    /// A packet without a Modbus envelope gets the default action.
    pub fn classify_payload(&self, packet: &[u8], transport_header_end: usize) -> Verdict<'_> {
        match Envelope::extract(packet, transport_header_end) {
            Ok(envelope) => self.classify_envelope(&envelope),
            Err(short) => {
                debug!(available = short.available, "no Modbus envelope, default action");
                Verdict { rule: None, action: self.default_action }
            }
        }
    }

    /// Classify a raw IPv4 or IPv6 packet.
    pub fn classify_ip_packet(&self, packet: &[u8]) -> Verdict<'_> {
        match locate_payload(packet) {
            Some(payload) => self.classify_payload(payload.datagram(packet), payload.offset),
            None => Verdict { rule: None, action: self.default_action },
        }
    }
}

/// Shared handle to the active rule set.
///
/// Readers take a snapshot without locking; [`PolicyHandle::replace`] installs a new set
/// atomically, so a rule is never edited while a packet is being matched against it.
#[derive(Debug)]
pub struct PolicyHandle {
    current: ArcSwap<RuleSet>,
}

impl PolicyHandle {
    pub fn new(rules: RuleSet) -> Self {
        Self { current: ArcSwap::from_pointee(rules) }
    }

    /// Snapshot of the active rule set.
    pub fn load(&self) -> Arc<RuleSet> {
        self.current.load_full()
    }

    /// Install `rules`, returning the set it replaced.
    pub fn replace(&self, rules: RuleSet) -> Arc<RuleSet> {
        info!(rules = rules.rules.len(), default = %rules.default_action, "installing rule set");
        self.current.swap(Arc::new(rules))
    }

    /// Classify a raw IP packet against the active rule set.
    pub fn classify_ip_packet(&self, packet: &[u8]) -> Action {
        self.current.load().classify_ip_packet(packet).action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::{ipv4_tcp, ipv4_udp, MODBUS_READ};

    type TestResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

    fn named(name: &str, text: &str, action: Action) -> Result<NamedRule, crate::RuleError> {
        Ok(NamedRule { name: name.to_string(), rule: CompiledRule::parse(text)?, action })
    }

    #[test]
    fn test_first_match_wins() -> TestResult {
        let set = RuleSet::new(
            vec![
                named("writes", "--fc 5:16", Action::Drop)?,
                named("reads", "--fc 3", Action::Accept)?,
                named("all", "", Action::Drop)?,
            ],
            Action::Drop,
        );
        let verdict = set.classify_payload(&MODBUS_READ, 0);
        assert_eq!(verdict.action, Action::Accept);
        assert_eq!(verdict.rule.map(|r| r.name.as_str()), Some("reads"));
        Ok(())
    }

    #[test]
    fn test_default_action_without_match() -> TestResult {
        let set = RuleSet::new(vec![named("unit9", "--unit 9", Action::Drop)?], Action::Accept);
        let verdict = set.classify_ip_packet(&ipv4_tcp(&MODBUS_READ, 0));
        assert_eq!(verdict, Verdict { rule: None, action: Action::Accept });

        // no envelope at all
        let verdict = set.classify_payload(&MODBUS_READ[..4], 0);
        assert_eq!(verdict.action, Action::Accept);
        assert!(set.classify_ip_packet(&[0x45]).rule.is_none());
        Ok(())
    }

    #[test]
    fn test_padding_gets_default_action() -> TestResult {
        let set = RuleSet::new(vec![named("all", "", Action::Accept)?], Action::Drop);
        let mut packet = ipv4_udp(&[]);
        packet.extend_from_slice(&[0u8; 18]);
        assert_eq!(set.classify_ip_packet(&packet), Verdict { rule: None, action: Action::Drop });
        Ok(())
    }

    #[test]
    fn test_replace_swaps_whole_set() -> TestResult {
        let handle = PolicyHandle::new(RuleSet::new(
            vec![named("reads", "--fc 3", Action::Accept)?],
            Action::Drop,
        ));
        let packet = ipv4_tcp(&MODBUS_READ, 0);
        let before = handle.load();
        assert_eq!(handle.classify_ip_packet(&packet), Action::Accept);

        let old = handle.replace(RuleSet::new(vec![], Action::Drop));
        assert_eq!(old.rules().len(), 1);
        assert_eq!(handle.classify_ip_packet(&packet), Action::Drop);

        // a snapshot taken earlier is unaffected
        assert_eq!(before.classify_ip_packet(&packet).action, Action::Accept);
        Ok(())
    }
}
