use thiserror::Error;

use crate::rule::Field;

/// Errors that can occur while building, decoding or loading rules
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid rule: {0}")]
    Rule(#[from] RuleError),

    #[error("No rules configured")]
    NoRules,
}

pub type Result<T> = std::result::Result<T, MatchError>;

/// Which of the two record bitmasks carried an unknown bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagMask {
    Set,
    Invert,
}

impl std::fmt::Display for FlagMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlagMask::Set => f.write_str("set"),
            FlagMask::Invert => f.write_str("invert"),
        }
    }
}

/// Rejections raised when a rule is installed. Never produced on the per-packet path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("{mask} flags contain unknown bits {bits:#04x}")]
    UnknownFlagBits { mask: FlagMask, bits: u8 },

    #[error("{field} range {min}:{max} has min greater than max")]
    InvertedRange { field: Field, min: u16, max: u16 },

    #[error("rule record must be {expected} bytes, got {actual}")]
    RecordLength { expected: usize, actual: usize },

    #[error("unknown option '{0}'")]
    UnknownOption(String),

    #[error("option '--{0}' requires a value")]
    MissingValue(Field),

    #[error("invalid value '{value}' for option '--{field}'")]
    InvalidValue { field: Field, value: String },

    #[error("option '--{0}' takes a single value, not a range")]
    RangeNotAllowed(Field),

    #[error("option '--{0}' may only be specified once")]
    DuplicateOption(Field),

    #[error("'!' must be followed by an option")]
    DanglingNegation,
}
