use std::fmt;

use serde_json::Value;

// Text values matching one of these (case-insensitively) register as booleans. This check
// runs before numeric parsing, so "1" and "0" are booleans too.
const BOOLEAN_LITERALS: [&str; 8] = ["true", "false", "yes", "no", "on", "off", "1", "0"];

/// Semantic type of a property, stored as the integer code in `property_define.data_type`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum DataType {
    Numeric = 1,
    String = 2,
    Array = 3,
    Object = 4,
    Date = 5,
    Boolean = 6,
}

impl From<DataType> for i32 {
    fn from(data_type: DataType) -> i32 {
        match data_type {
            DataType::Numeric => 1,
            DataType::String => 2,
            DataType::Array => 3,
            DataType::Object => 4,
            DataType::Date => 5,
            DataType::Boolean => 6,
        }
    }
}

impl TryFrom<i32> for DataType {
    type Error = i32;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(DataType::Numeric),
            2 => Ok(DataType::String),
            3 => Ok(DataType::Array),
            4 => Ok(DataType::Object),
            5 => Ok(DataType::Date),
            6 => Ok(DataType::Boolean),
            invalid => Err(invalid),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DataType::Numeric => write!(f, "numeric"),
            DataType::String => write!(f, "string"),
            DataType::Array => write!(f, "array"),
            DataType::Object => write!(f, "object"),
            DataType::Date => write!(f, "date"),
            DataType::Boolean => write!(f, "boolean"),
        }
    }
}

/// Best-effort classification of a property value. Absent values and nulls fall back to
/// `DataType::String`.
pub fn infer_data_type(value: Option<&Value>) -> DataType {
    match value {
        Some(Value::Bool(_)) => DataType::Boolean,
        Some(Value::Number(_)) => DataType::Numeric,
        Some(Value::Array(_)) => DataType::Array,
        Some(Value::Object(_)) => DataType::Object,
        Some(Value::String(s)) => infer_text_type(s),
        Some(Value::Null) | None => DataType::String,
    }
}

fn infer_text_type(s: &str) -> DataType {
    let s = s.trim();

    if BOOLEAN_LITERALS
        .iter()
        .any(|literal| s.eq_ignore_ascii_case(literal))
    {
        return DataType::Boolean;
    }

    if is_date_shaped(s) {
        return DataType::Date;
    }

    if parses_as_number(s) {
        return DataType::Numeric;
    }

    DataType::String
}

// Digit group separators ("1_000") are accepted, but only between two digits.
fn parses_as_number(s: &str) -> bool {
    if !s.contains('_') {
        return s.parse::<f64>().is_ok();
    }

    let bytes = s.as_bytes();
    let grouped = bytes.iter().enumerate().all(|(i, &b)| {
        b != b'_'
            || (i > 0
                && bytes[i - 1].is_ascii_digit()
                && bytes.get(i + 1).is_some_and(u8::is_ascii_digit))
    });

    grouped && s.replace('_', "").parse::<f64>().is_ok()
}

// Only the YYYY-MM-DD dash positions are checked, the digits themselves are not.
fn is_date_shaped(s: &str) -> bool {
    let mut chars = s.chars();
    let dash_at_4 = chars.nth(4) == Some('-');
    let dash_at_7 = chars.nth(2) == Some('-');

    dash_at_4 && dash_at_7 && s.chars().count() >= 10
}
