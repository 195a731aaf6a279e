//! Types shared between the Modbus match engine and whatever stores or transports its rules.
//!
//! This crate is `no_std` so the record layout can be reused by constrained targets
//! (for example a packet-path program) as well as by the userspace engine in `modbus-match-lib`.
#![no_std]

/// Size of the fixed Modbus/TCP envelope: MBAP header (7 bytes) plus the function code.
pub const ENVELOPE_LEN: usize = 8;

/// Size of the register extension that follows the envelope (start register, register count).
pub const REGISTER_EXT_LEN: usize = 4;

/// Criterion bitmask constants used by the `set` and `invert` fields of [`ModbusMatchInfo`].
pub mod flag_bits {
    pub const ID: u8 = 1 << 0; // transaction identifier
    pub const PROTOCOL: u8 = 1 << 1; // protocol identifier
    pub const LENGTH: u8 = 1 << 2; // MBAP length
    pub const UNIT: u8 = 1 << 3; // unit identifier
    pub const FC: u8 = 1 << 4; // function code
    pub const REG: u8 = 1 << 5; // register range
    pub const MASK: u8 = ID | PROTOCOL | LENGTH | UNIT | FC | REG;
}

/// Compiled rule in its fixed-size record form.
///
/// Values are in host byte order. The `set` bitmask says which criteria are active and the
/// `invert` bitmask which of them are negated; both use [`flag_bits`].
///
/// ```text
/// offset  0: id        [u16; 2]  transaction id (min, max)
/// offset  4: protocol  u16       protocol id
/// offset  6: length    u16       MBAP length
/// offset  8: unit      [u8; 2]   unit id (min, max)
/// offset 10: fc        [u8; 2]   function code (min, max)
/// offset 12: reg       [u16; 2]  register range (min, max)
/// offset 16: set       u8
/// offset 17: invert    u8
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModbusMatchInfo {
    pub id: [u16; 2],
    pub protocol: u16,
    pub length: u16,
    pub unit: [u8; 2],
    pub fc: [u8; 2],
    pub reg: [u16; 2],
    pub set: u8,
    pub invert: u8,
}

const _: () = {
    use core::mem::{offset_of, size_of};
    assert!(size_of::<ModbusMatchInfo>() == ModbusMatchInfo::SIZE);
    assert!(offset_of!(ModbusMatchInfo, id) == 0);
    assert!(offset_of!(ModbusMatchInfo, protocol) == 4);
    assert!(offset_of!(ModbusMatchInfo, length) == 6);
    assert!(offset_of!(ModbusMatchInfo, unit) == 8);
    assert!(offset_of!(ModbusMatchInfo, fc) == 10);
    assert!(offset_of!(ModbusMatchInfo, reg) == 12);
    assert!(offset_of!(ModbusMatchInfo, set) == 16);
    assert!(offset_of!(ModbusMatchInfo, invert) == 17);
};

/// Every criterion unset, every range spanning its full type width.
impl Default for ModbusMatchInfo {
    fn default() -> Self {
        Self {
            id: [0, u16::MAX],
            protocol: 0,
            length: 0,
            unit: [0, u8::MAX],
            fc: [0, u8::MAX],
            reg: [0, u16::MAX],
            set: 0,
            invert: 0,
        }
    }
}

impl ModbusMatchInfo {
    /// Encoded size in bytes.
    pub const SIZE: usize = 18;

    /// Encode the record field by field in host byte order.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        put_u16(&mut out, 0, self.id[0]);
        put_u16(&mut out, 2, self.id[1]);
        put_u16(&mut out, 4, self.protocol);
        put_u16(&mut out, 6, self.length);
        out[8] = self.unit[0];
        out[9] = self.unit[1];
        out[10] = self.fc[0];
        out[11] = self.fc[1];
        put_u16(&mut out, 12, self.reg[0]);
        put_u16(&mut out, 14, self.reg[1]);
        out[16] = self.set;
        out[17] = self.invert;
        out
    }

    /// Decode a record produced by [`ModbusMatchInfo::to_bytes`].
    ///
    /// No validation happens here: flag bits outside [`flag_bits::MASK`] and inverted ranges
    /// are carried through unchanged and must be rejected by the consumer.
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            id: [get_u16(bytes, 0), get_u16(bytes, 2)],
            protocol: get_u16(bytes, 4),
            length: get_u16(bytes, 6),
            unit: [bytes[8], bytes[9]],
            fc: [bytes[10], bytes[11]],
            reg: [get_u16(bytes, 12), get_u16(bytes, 14)],
            set: bytes[16],
            invert: bytes[17],
        }
    }
}

#[inline(always)]
fn put_u16(out: &mut [u8; ModbusMatchInfo::SIZE], at: usize, value: u16) {
    let [a, b] = value.to_ne_bytes();
    out[at] = a;
    out[at + 1] = b;
}

#[inline(always)]
fn get_u16(bytes: &[u8; ModbusMatchInfo::SIZE], at: usize) -> u16 {
    u16::from_ne_bytes([bytes[at], bytes[at + 1]])
}
