//! Compiled Modbus match rules.
//!
//! A rule is six independent criteria. Each criterion is a [`Bound`] (unset, exact value or
//! inclusive range) plus an invert flag. Bitmasks only exist in the record form
//! ([`ModbusMatchInfo`]) and are validated when a record is converted into a [`CompiledRule`].

mod text;

pub use text::{Formatted, RuleFormat, OPTIONS_HELP};

use std::fmt;

use modbus_match_common::{flag_bits, ModbusMatchInfo};

use crate::envelope::{Envelope, RegisterSpan};
use crate::error::{FlagMask, RuleError};

/// The six fields a rule can constrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    TransactionId,
    ProtocolId,
    Length,
    UnitId,
    FunctionCode,
    Registers,
}

impl Field {
    /// All fields in record and display order.
    pub const ALL: [Field; 6] = [
        Field::TransactionId,
        Field::ProtocolId,
        Field::Length,
        Field::UnitId,
        Field::FunctionCode,
        Field::Registers,
    ];

    /// Option name used by the text front-end (without the leading `--`).
    pub fn option(self) -> &'static str {
        match self {
            Field::TransactionId => "id",
            Field::ProtocolId => "prot",
            Field::Length => "len",
            Field::UnitId => "unit",
            Field::FunctionCode => "fc",
            Field::Registers => "reg",
        }
    }

    pub fn from_option(name: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| f.option() == name)
    }

    /// Bit in the record's `set` and `invert` masks.
    pub fn flag(self) -> u8 {
        match self {
            Field::TransactionId => flag_bits::ID,
            Field::ProtocolId => flag_bits::PROTOCOL,
            Field::Length => flag_bits::LENGTH,
            Field::UnitId => flag_bits::UNIT,
            Field::FunctionCode => flag_bits::FC,
            Field::Registers => flag_bits::REG,
        }
    }

    /// Protocol id and length are single values in the record and the text front-end.
    pub fn single_value_only(self) -> bool {
        matches!(self, Field::ProtocolId | Field::Length)
    }

    /// Largest value the field can hold.
    pub fn max_value(self) -> u16 {
        match self {
            Field::UnitId | Field::FunctionCode => u16::from(u8::MAX),
            _ => u16::MAX,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.option())
    }
}

/// Closed interval `min ..= max` with `min <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span<T> {
    min: T,
    max: T,
}

impl<T: Copy + PartialOrd> Span<T> {
    /// Returns `None` when `min > max`.
    pub fn new(min: T, max: T) -> Option<Self> {
        (min <= max).then_some(Self { min, max })
    }

    pub fn min(&self) -> T {
        self.min
    }

    pub fn max(&self) -> T {
        self.max
    }

    #[inline]
    pub fn contains(&self, value: T) -> bool {
        self.min <= value && value <= self.max
    }
}

/// What a single criterion compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Bound<T> {
    /// Not checked
    #[default]
    Unset,
    Exact(T),
    Range(Span<T>),
}

impl<T: Copy + PartialOrd> Bound<T> {
    /// Build from a `(min, max)` pair, collapsing `min == max` to [`Bound::Exact`].
    pub fn from_pair(min: T, max: T) -> Option<Self> {
        if min == max {
            return Some(Bound::Exact(min));
        }
        Span::new(min, max).map(Bound::Range)
    }

    /// The bound as an interval; `None` when unset.
    pub fn span(&self) -> Option<Span<T>> {
        match *self {
            Bound::Unset => None,
            Bound::Exact(v) => Some(Span { min: v, max: v }),
            Bound::Range(span) => Some(span),
        }
    }

    pub fn is_set(&self) -> bool {
        !matches!(self, Bound::Unset)
    }
}

/// One field test: a bound and whether its outcome is negated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Criterion<T> {
    bound: Bound<T>,
    invert: bool,
}

impl<T: Copy + PartialOrd> Criterion<T> {
    /// An unset bound never carries an invert flag.
    pub fn new(bound: Bound<T>, invert: bool) -> Self {
        Self { bound, invert: invert && bound.is_set() }
    }

    pub fn unset() -> Self {
        Self { bound: Bound::Unset, invert: false }
    }

    pub fn exact(value: T) -> Self {
        Self::new(Bound::Exact(value), false)
    }

    /// Same criterion with the invert flag set.
    pub fn inverted(self) -> Self {
        Self::new(self.bound, true)
    }

    pub fn bound(&self) -> Bound<T> {
        self.bound
    }

    pub fn is_set(&self) -> bool {
        self.bound.is_set()
    }

    pub fn is_inverted(&self) -> bool {
        self.invert
    }

    fn state(&self) -> (bool, bool) {
        (self.is_set(), self.invert)
    }

    /// Scalar test: `value` within the bound, XOR the invert flag. Unset admits everything.
    #[inline]
    pub fn admits(&self, value: T) -> bool {
        match self.bound.span() {
            None => true,
            Some(span) => span.contains(value) ^ self.invert,
        }
    }
}

impl Criterion<u16> {
    /// Register test: the addressed interval overlaps the bound, XOR the invert flag.
    ///
    /// A packet without start register and count never satisfies a set criterion, inverted
    /// or not.
    #[inline]
    pub fn admits_registers(&self, registers: Option<RegisterSpan>) -> bool {
        let Some(span) = self.bound.span() else {
            return true;
        };
        match registers {
            Some(req) => req.overlaps(span) ^ self.invert,
            None => false,
        }
    }
}

/// Immutable, validated match rule.
///
/// Cheap to copy and `Send + Sync`; share it by reference or behind an `Arc` and replace it
/// as a whole instead of editing a rule that may be in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompiledRule {
    pub transaction_id: Criterion<u16>,
    pub protocol_id: Criterion<u16>,
    pub length: Criterion<u16>,
    pub unit_id: Criterion<u8>,
    pub function_code: Criterion<u8>,
    pub registers: Criterion<u16>,
}

/// Front-end description of one field: a value or `min:max` pair, optionally negated.
///
/// Values are carried as `u16` for every field and narrowed when the rule is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub min: u16,
    pub max: Option<u16>,
    pub invert: bool,
}

impl FieldSpec {
    pub fn value(value: u16) -> Self {
        Self { min: value, max: None, invert: false }
    }

    pub fn range(min: u16, max: u16) -> Self {
        Self { min, max: Some(max), invert: false }
    }

    pub fn negated(self) -> Self {
        Self { invert: true, ..self }
    }
}

/// Parsed field specifications for every field; `None` means not checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuleSpec {
    pub transaction_id: Option<FieldSpec>,
    pub protocol_id: Option<FieldSpec>,
    pub length: Option<FieldSpec>,
    pub unit_id: Option<FieldSpec>,
    pub function_code: Option<FieldSpec>,
    pub registers: Option<FieldSpec>,
}

impl RuleSpec {
    pub fn get(&self, field: Field) -> Option<FieldSpec> {
        *self.slot(field)
    }

    pub fn set(&mut self, field: Field, spec: FieldSpec) {
        *self.slot_mut(field) = Some(spec);
    }

    fn slot(&self, field: Field) -> &Option<FieldSpec> {
        match field {
            Field::TransactionId => &self.transaction_id,
            Field::ProtocolId => &self.protocol_id,
            Field::Length => &self.length,
            Field::UnitId => &self.unit_id,
            Field::FunctionCode => &self.function_code,
            Field::Registers => &self.registers,
        }
    }

    fn slot_mut(&mut self, field: Field) -> &mut Option<FieldSpec> {
        match field {
            Field::TransactionId => &mut self.transaction_id,
            Field::ProtocolId => &mut self.protocol_id,
            Field::Length => &mut self.length,
            Field::UnitId => &mut self.unit_id,
            Field::FunctionCode => &mut self.function_code,
            Field::Registers => &mut self.registers,
        }
    }
}

fn wide_criterion(field: Field, spec: Option<FieldSpec>) -> Result<Criterion<u16>, RuleError> {
    let Some(spec) = spec else {
        return Ok(Criterion::unset());
    };
    if spec.max.is_some() && field.single_value_only() {
        return Err(RuleError::RangeNotAllowed(field));
    }
    let max = spec.max.unwrap_or(spec.min);
    for value in [spec.min, max] {
        if value > field.max_value() {
            return Err(RuleError::InvalidValue { field, value: value.to_string() });
        }
    }
    let bound = Bound::from_pair(spec.min, max)
        .ok_or(RuleError::InvertedRange { field, min: spec.min, max })?;
    Ok(Criterion::new(bound, spec.invert))
}

fn narrow_criterion(field: Field, spec: Option<FieldSpec>) -> Result<Criterion<u8>, RuleError> {
    let wide = wide_criterion(field, spec)?;
    let narrow = |v: u16| {
        u8::try_from(v).map_err(|_| RuleError::InvalidValue { field, value: v.to_string() })
    };
    let bound = match wide.bound() {
        Bound::Unset => Bound::Unset,
        Bound::Exact(v) => Bound::Exact(narrow(v)?),
        Bound::Range(span) => Bound::Range(Span { min: narrow(span.min)?, max: narrow(span.max)? }),
    };
    Ok(Criterion::new(bound, wide.is_inverted()))
}

fn wide_pair(bound: Bound<u16>) -> [u16; 2] {
    bound.span().map_or([0, u16::MAX], |s| [s.min, s.max])
}

fn narrow_pair(bound: Bound<u8>) -> [u8; 2] {
    bound.span().map_or([0, u8::MAX], |s| [s.min, s.max])
}

fn from_record_pair<T: Copy + PartialOrd + Into<u16>>(
    info: &ModbusMatchInfo,
    field: Field,
    [min, max]: [T; 2],
) -> Result<Criterion<T>, RuleError> {
    if info.set & field.flag() == 0 {
        return Ok(Criterion::unset());
    }
    let bound = Bound::from_pair(min, max).ok_or(RuleError::InvertedRange {
        field,
        min: min.into(),
        max: max.into(),
    })?;
    Ok(Criterion::new(bound, info.invert & field.flag() != 0))
}

impl CompiledRule {
    /// A rule with no criteria; it matches every packet that carries an envelope.
    pub fn any() -> Self {
        Self::default()
    }

    /// Validate front-end field specifications and build the rule.
    pub fn from_spec(spec: &RuleSpec) -> Result<Self, RuleError> {
        Ok(Self {
            transaction_id: wide_criterion(Field::TransactionId, spec.transaction_id)?,
            protocol_id: wide_criterion(Field::ProtocolId, spec.protocol_id)?,
            length: wide_criterion(Field::Length, spec.length)?,
            unit_id: narrow_criterion(Field::UnitId, spec.unit_id)?,
            function_code: narrow_criterion(Field::FunctionCode, spec.function_code)?,
            registers: wide_criterion(Field::Registers, spec.registers)?,
        })
    }

    /// Parse the save-form option text, e.g. `--unit 1:10 ! --fc 5`.
    pub fn parse(text: &str) -> Result<Self, RuleError> {
        text.parse()
    }

    /// Does the envelope satisfy every set criterion?
    pub fn matches(&self, envelope: &Envelope) -> bool {
        crate::evaluator::evaluate(envelope, self)
    }

    /// Bitmask of set criteria in record layout.
    pub fn set_flags(&self) -> u8 {
        self.flags(|set, _| set)
    }

    /// Bitmask of inverted criteria in record layout.
    pub fn invert_flags(&self) -> u8 {
        self.flags(|_, invert| invert)
    }

    fn flags(&self, pick: impl Fn(bool, bool) -> bool) -> u8 {
        Field::ALL
            .into_iter()
            .filter(|&f| {
                let (set, invert) = self.state(f);
                pick(set, invert)
            })
            .fold(0, |acc, f| acc | f.flag())
    }

    /// `(is_set, is_inverted)` for a field.
    pub fn state(&self, field: Field) -> (bool, bool) {
        match field {
            Field::TransactionId => self.transaction_id.state(),
            Field::ProtocolId => self.protocol_id.state(),
            Field::Length => self.length.state(),
            Field::UnitId => self.unit_id.state(),
            Field::FunctionCode => self.function_code.state(),
            Field::Registers => self.registers.state(),
        }
    }

    /// The bound of a field widened to `u16`, for display.
    pub fn span(&self, field: Field) -> Option<Span<u16>> {
        let widen = |s: Span<u8>| Span { min: u16::from(s.min), max: u16::from(s.max) };
        match field {
            Field::TransactionId => self.transaction_id.bound().span(),
            Field::ProtocolId => self.protocol_id.bound().span(),
            Field::Length => self.length.bound().span(),
            Field::UnitId => self.unit_id.bound().span().map(widen),
            Field::FunctionCode => self.function_code.bound().span().map(widen),
            Field::Registers => self.registers.bound().span(),
        }
    }

    /// Encode into the fixed-size record.
    ///
    /// Fails when protocol id or length hold a true range, which the record cannot express.
    pub fn to_record(&self) -> Result<ModbusMatchInfo, RuleError> {
        let single = |field: Field, bound: Bound<u16>| match bound {
            Bound::Range(_) => Err(RuleError::RangeNotAllowed(field)),
            Bound::Exact(v) => Ok(v),
            Bound::Unset => Ok(0),
        };
        Ok(ModbusMatchInfo {
            id: wide_pair(self.transaction_id.bound()),
            protocol: single(Field::ProtocolId, self.protocol_id.bound())?,
            length: single(Field::Length, self.length.bound())?,
            unit: narrow_pair(self.unit_id.bound()),
            fc: narrow_pair(self.function_code.bound()),
            reg: wide_pair(self.registers.bound()),
            set: self.set_flags(),
            invert: self.invert_flags(),
        })
    }
}

impl TryFrom<&ModbusMatchInfo> for CompiledRule {
    type Error = RuleError;

    /// Validate a record: both masks must stay within the six criterion bits and every set
    /// range must satisfy `min <= max`. Invert bits of unset criteria are dropped.
    fn try_from(info: &ModbusMatchInfo) -> Result<Self, Self::Error> {
        let unknown = info.set & !flag_bits::MASK;
        if unknown != 0 {
            return Err(RuleError::UnknownFlagBits { mask: FlagMask::Set, bits: unknown });
        }
        let unknown = info.invert & !flag_bits::MASK;
        if unknown != 0 {
            return Err(RuleError::UnknownFlagBits { mask: FlagMask::Invert, bits: unknown });
        }

        Ok(Self {
            transaction_id: from_record_pair(info, Field::TransactionId, info.id)?,
            protocol_id: from_record_pair(info, Field::ProtocolId, [info.protocol; 2])?,
            length: from_record_pair(info, Field::Length, [info.length; 2])?,
            unit_id: from_record_pair(info, Field::UnitId, info.unit)?,
            function_code: from_record_pair(info, Field::FunctionCode, info.fc)?,
            registers: from_record_pair(info, Field::Registers, info.reg)?,
        })
    }
}

impl TryFrom<&[u8]> for CompiledRule {
    type Error = RuleError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let record: &[u8; ModbusMatchInfo::SIZE] = bytes.try_into().map_err(|_| {
            RuleError::RecordLength { expected: ModbusMatchInfo::SIZE, actual: bytes.len() }
        })?;
        CompiledRule::try_from(&ModbusMatchInfo::from_bytes(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

    #[test]
    fn test_bound_from_pair_collapses_equal() {
        assert_eq!(Bound::from_pair(3u8, 3), Some(Bound::Exact(3)));
        assert!(matches!(Bound::from_pair(1u16, 9), Some(Bound::Range(_))));
        assert_eq!(Bound::from_pair(9u16, 1), None);
    }

    #[test]
    fn test_unset_criterion_drops_invert() {
        let c = Criterion::<u16>::new(Bound::Unset, true);
        assert!(!c.is_inverted());
        assert!(c.admits(0));
        assert!(c.admits_registers(None));
    }

    #[test]
    fn test_admits_xor_invert() {
        let c = Criterion::new(Bound::from_pair(10u16, 20).unwrap_or_default(), false);
        assert!(c.admits(10));
        assert!(c.admits(20));
        assert!(!c.admits(21));
        let c = c.inverted();
        assert!(!c.admits(10));
        assert!(c.admits(21));
    }

    #[test]
    fn test_missing_registers_fail_even_when_inverted() {
        let c = Criterion::exact(5u16);
        assert!(!c.admits_registers(None));
        assert!(!c.inverted().admits_registers(None));
    }

    #[test]
    fn test_from_spec_rejects_wide_unit() {
        let spec = RuleSpec { unit_id: Some(FieldSpec::value(256)), ..RuleSpec::default() };
        assert_eq!(
            CompiledRule::from_spec(&spec),
            Err(RuleError::InvalidValue { field: Field::UnitId, value: "256".into() })
        );
    }

    #[test]
    fn test_from_spec_rejects_protocol_range() {
        let spec = RuleSpec { protocol_id: Some(FieldSpec::range(0, 1)), ..RuleSpec::default() };
        assert_eq!(CompiledRule::from_spec(&spec), Err(RuleError::RangeNotAllowed(Field::ProtocolId)));
    }

    #[test]
    fn test_from_spec_rejects_inverted_range() {
        let spec = RuleSpec { registers: Some(FieldSpec::range(20, 10)), ..RuleSpec::default() };
        assert_eq!(
            CompiledRule::from_spec(&spec),
            Err(RuleError::InvertedRange { field: Field::Registers, min: 20, max: 10 })
        );
    }

    #[test]
    fn test_record_round_trip() -> TestResult {
        let spec = RuleSpec {
            transaction_id: Some(FieldSpec::range(1, 5)),
            protocol_id: Some(FieldSpec::value(0).negated()),
            function_code: Some(FieldSpec::value(3)),
            registers: Some(FieldSpec::range(100, 200)),
            ..RuleSpec::default()
        };
        let rule = CompiledRule::from_spec(&spec)?;
        let record = rule.to_record()?;
        assert_eq!(record.set, flag_bits::ID | flag_bits::PROTOCOL | flag_bits::FC | flag_bits::REG);
        assert_eq!(record.invert, flag_bits::PROTOCOL);
        assert_eq!(record.id, [1, 5]);
        assert_eq!(record.fc, [3, 3]);
        assert_eq!(record.unit, [0, u8::MAX]);

        assert_eq!(CompiledRule::try_from(&record)?, rule);
        assert_eq!(CompiledRule::try_from(&record.to_bytes()[..])?, rule);
        Ok(())
    }

    #[test]
    fn test_record_rejects_unknown_set_bits() {
        let record = ModbusMatchInfo { set: 0xff, ..ModbusMatchInfo::default() };
        assert_eq!(
            CompiledRule::try_from(&record),
            Err(RuleError::UnknownFlagBits { mask: FlagMask::Set, bits: 0xc0 })
        );
    }

    #[test]
    fn test_record_rejects_unknown_invert_bits() {
        let record = ModbusMatchInfo { invert: 0x40, ..ModbusMatchInfo::default() };
        assert_eq!(
            CompiledRule::try_from(&record),
            Err(RuleError::UnknownFlagBits { mask: FlagMask::Invert, bits: 0x40 })
        );
    }

    #[test]
    fn test_record_rejects_inverted_range() {
        let record =
            ModbusMatchInfo { unit: [9, 2], set: flag_bits::UNIT, ..ModbusMatchInfo::default() };
        assert_eq!(
            CompiledRule::try_from(&record),
            Err(RuleError::InvertedRange { field: Field::UnitId, min: 9, max: 2 })
        );
    }

    #[test]
    fn test_record_ignores_ranges_of_unset_criteria() -> TestResult {
        let record = ModbusMatchInfo {
            reg: [500, 1],
            invert: flag_bits::REG,
            ..ModbusMatchInfo::default()
        };
        let rule = CompiledRule::try_from(&record)?;
        assert_eq!(rule, CompiledRule::any());
        Ok(())
    }

    #[test]
    fn test_record_wrong_length() {
        assert_eq!(
            CompiledRule::try_from(&[0u8; 12][..]),
            Err(RuleError::RecordLength { expected: 18, actual: 12 })
        );
    }

    #[test]
    fn test_protocol_range_not_encodable() {
        let rule = CompiledRule {
            protocol_id: Criterion::new(Bound::from_pair(0, 3).unwrap_or_default(), false),
            ..CompiledRule::any()
        };
        assert_eq!(rule.to_record(), Err(RuleError::RangeNotAllowed(Field::ProtocolId)));
    }
}
