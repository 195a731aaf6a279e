use tracing::trace;

use crate::envelope::Envelope;
use crate::rule::CompiledRule;

/// Evaluate every set criterion of `rule` against `envelope`.
///
/// Each criterion compares its field against its bound and XORs the result with its own
/// invert flag. The packet matches when all set criteria hold; unset criteria add no
/// constraint. Evaluation stops at the first failing criterion.
pub fn evaluate(envelope: &Envelope, rule: &CompiledRule) -> bool {
    let checks: [&dyn Fn() -> bool; 6] = [
        &|| rule.function_code.admits(envelope.function_code),
        &|| rule.unit_id.admits(envelope.unit_id),
        &|| rule.transaction_id.admits(envelope.transaction_id),
        &|| rule.protocol_id.admits(envelope.protocol_id),
        &|| rule.length.admits(envelope.length),
        &|| rule.registers.admits_registers(envelope.registers),
    ];
    checks.iter().all(|check| check())
}

/// Match a packet whose TCP or UDP header ends at `transport_header_end`.
///
/// A payload too short for the envelope is a non-match.
pub fn match_payload(packet: &[u8], transport_header_end: usize, rule: &CompiledRule) -> bool {
    match Envelope::extract(packet, transport_header_end) {
        Ok(envelope) => evaluate(&envelope, rule),
        Err(short) => {
            trace!(available = short.available, "no Modbus envelope; packet does not match");
            false
        }
    }
}
