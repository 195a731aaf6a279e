use modbus_match_common::{ENVELOPE_LEN, REGISTER_EXT_LEN};
use thiserror::Error;

use crate::rule::Span;

/// Fixed Modbus header fields decoded from the start of a TCP or UDP payload.
///
/// All multi-byte fields are converted from network byte order on extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Remaining byte count as declared by the MBAP header (not checked against the payload)
    pub length: u16,
    pub unit_id: u8,
    pub function_code: u8,
    /// Start register and count, present only when the payload carries them
    pub registers: Option<RegisterSpan>,
}

/// Register interval addressed by a request: `start ..= start + count - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSpan {
    pub start: u16,
    pub count: u16,
}

impl RegisterSpan {
    /// Does the addressed interval intersect `span`?
    ///
    /// A zero count addresses nothing and never overlaps. The interval end is computed in
    /// 32 bits, so a request running past register 65535 is not wrapped back to low addresses.
    pub fn overlaps(&self, span: Span<u16>) -> bool {
        if self.count == 0 {
            return false;
        }
        let last = u32::from(self.start) + u32::from(self.count) - 1;
        u32::from(span.min()) <= last && self.start <= span.max()
    }
}

/// The payload after the transport boundary is shorter than the Modbus envelope.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("payload too short for Modbus envelope: {available} of 8 bytes")]
pub struct TooShort {
    pub available: usize,
}

impl Envelope {
    /// Read the envelope that starts at `transport_header_end` in `packet`.
    ///
    /// `transport_header_end` must be the offset right after a TCP or UDP header; this function
    /// does not look at transport headers itself. An offset past the end of `packet` behaves
    /// like an empty payload.
    pub fn extract(packet: &[u8], transport_header_end: usize) -> Result<Self, TooShort> {
        let payload = packet.get(transport_header_end..).unwrap_or_default();
        Self::parse(payload)
    }

    /// Read the envelope from a payload that starts at the Modbus header.
    pub fn parse(payload: &[u8]) -> Result<Self, TooShort> {
        let Some((head, rest)) = payload.split_first_chunk::<ENVELOPE_LEN>() else {
            return Err(TooShort { available: payload.len() });
        };
        let [id_hi, id_lo, proto_hi, proto_lo, len_hi, len_lo, unit_id, function_code] = *head;

        let registers = rest.first_chunk::<REGISTER_EXT_LEN>().map(|&[a, b, c, d]| RegisterSpan {
            start: u16::from_be_bytes([a, b]),
            count: u16::from_be_bytes([c, d]),
        });

        Ok(Self {
            transaction_id: u16::from_be_bytes([id_hi, id_lo]),
            protocol_id: u16::from_be_bytes([proto_hi, proto_lo]),
            length: u16::from_be_bytes([len_hi, len_lo]),
            unit_id,
            function_code,
            registers,
        })
    }
}
