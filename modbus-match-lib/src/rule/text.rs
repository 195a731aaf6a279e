use std::fmt;
use std::str::FromStr;

use super::{CompiledRule, Field, FieldSpec, RuleSpec};
use crate::error::RuleError;

/// Option summary for the rule text front-end.
pub const OPTIONS_HELP: &str = "\
modbus match options:
[!] --id transaction[:transaction]
                                transaction identifier(s)
[!] --prot protocol
                                protocol identifier
[!] --len length
                                number of bytes
[!] --unit addr[:addr]
                                unit identifier(s)
[!] --fc function[:function]
                                function code(s)
[!] --reg register[:register]
                                register(s)
";

/// Decimal or `0x`-prefixed hexadecimal. Signs are not accepted.
fn parse_number(field: Field, text: &str) -> Result<u16, RuleError> {
    let (digits, radix) = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (text, 10),
    };
    let invalid = || RuleError::InvalidValue { field, value: text.to_string() };
    // from_str_radix tolerates a leading '+'
    if !digits.bytes().next().is_some_and(|b| char::from(b).is_digit(radix)) {
        return Err(invalid());
    }
    u16::from_str_radix(digits, radix).map_err(|_| invalid())
}

fn parse_value(field: Field, text: &str) -> Result<FieldSpec, RuleError> {
    match text.split_once(':') {
        Some((min, max)) => {
            Ok(FieldSpec::range(parse_number(field, min)?, parse_number(field, max)?))
        }
        None => Ok(FieldSpec::value(parse_number(field, text)?)),
    }
}

impl RuleSpec {
    /// Parse option tokens such as `["!", "--fc", "5", "--reg", "0:99"]`.
    pub fn parse_args<'a, I>(args: I) -> Result<Self, RuleError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut spec = RuleSpec::default();
        let mut tokens = args.into_iter();
        let mut negate = false;

        while let Some(token) = tokens.next() {
            if token == "!" {
                if negate {
                    return Err(RuleError::DanglingNegation);
                }
                negate = true;
                continue;
            }
            let field = token
                .strip_prefix("--")
                .and_then(Field::from_option)
                .ok_or_else(|| RuleError::UnknownOption(token.to_string()))?;
            if spec.get(field).is_some() {
                return Err(RuleError::DuplicateOption(field));
            }
            let value = tokens.next().ok_or(RuleError::MissingValue(field))?;
            let mut field_spec = parse_value(field, value)?;
            field_spec.invert = std::mem::take(&mut negate);
            spec.set(field, field_spec);
        }

        if negate {
            return Err(RuleError::DanglingNegation);
        }
        Ok(spec)
    }
}

impl FromStr for RuleSpec {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleSpec::parse_args(s.split_whitespace())
    }
}

impl FromStr for CompiledRule {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CompiledRule::from_spec(&s.parse::<RuleSpec>()?)
    }
}

/// How to render a rule as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFormat {
    /// `--id 1:5 ! --fc 3`: parseable by [`CompiledRule::parse`]
    Save,
    /// `modbus id 1:5 ! fc 3`: for rule listings
    Print,
}

/// Display adapter returned by [`CompiledRule::display`].
pub struct Formatted<'a> {
    rule: &'a CompiledRule,
    format: RuleFormat,
}

impl CompiledRule {
    pub fn display(&self, format: RuleFormat) -> Formatted<'_> {
        Formatted { rule: self, format }
    }
}

impl fmt::Display for Formatted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (prefix, mut first) = match self.format {
            RuleFormat::Save => ("--", true),
            RuleFormat::Print => {
                f.write_str("modbus")?;
                ("", false)
            }
        };
        for field in Field::ALL {
            let Some(span) = self.rule.span(field) else {
                continue;
            };
            if !std::mem::take(&mut first) {
                f.write_str(" ")?;
            }
            let (_, inverted) = self.rule.state(field);
            if inverted {
                f.write_str("! ")?;
            }
            write!(f, "{prefix}{field} ")?;
            if span.min() == span.max() {
                write!(f, "{}", span.min())?;
            } else {
                write!(f, "{}:{}", span.min(), span.max())?;
            }
        }
        Ok(())
    }
}

/// Save form.
impl fmt::Display for CompiledRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.display(RuleFormat::Save), f)
    }
}
