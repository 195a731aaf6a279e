#![forbid(unsafe_code)]
//! Modbus/TCP and Modbus-over-UDP packet matching.
//!
//! [`Envelope::extract`] reads the Modbus header after a transport boundary and
//! [`evaluate`] checks it against a [`CompiledRule`]. Truncated payloads never match.
//! Rules come from the text front-end ([`CompiledRule::parse`]), from fixed-size records
//! ([`ModbusMatchInfo`]) or from a TOML configuration ([`config::load_rule_set`]).

pub mod config;
pub mod envelope;
pub mod error;
pub mod evaluator;
pub mod policy;
pub mod rule;
pub mod telemetry;
pub mod transport;

pub use config::{load_from_path, load_rule_set, Config};
pub use envelope::{Envelope, RegisterSpan, TooShort};
pub use error::{MatchError, Result, RuleError};
pub use evaluator::{evaluate, match_payload};
pub use modbus_match_common::{flag_bits, ModbusMatchInfo};
pub use policy::{Action, NamedRule, PolicyHandle, RuleSet, Verdict};
pub use rule::{Bound, CompiledRule, Criterion, Field, FieldSpec, RuleFormat, RuleSpec, Span};
pub use transport::{locate_payload, match_ip_packet, TransportPayload, TransportProtocol};
