//! Scheduler parameters
//!
//! Schedulers are configured with a list of column-typed values. A factory
//! declares the shape it accepts as a [`ParameterSignature`]; values are
//! checked against it before any scheduler is constructed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Column types allowed as scheduler parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParamType {
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Decimal,
    String,
    Timestamp,
    VarBinary,
}

impl ParamType {
    fn integer_rank(&self) -> Option<u8> {
        match self {
            ParamType::TinyInt => Some(0),
            ParamType::SmallInt => Some(1),
            ParamType::Integer => Some(2),
            ParamType::BigInt => Some(3),
            _ => None,
        }
    }

    /// Whether `value` may be passed where this type is declared.
    ///
    /// Integers widen to larger integer types, to FLOAT and to DECIMAL.
    /// NULL is accepted everywhere.
    pub fn accepts(&self, value: &ParamValue) -> bool {
        let Some(actual) = value.param_type() else {
            return true;
        };
        if actual == *self {
            return true;
        }
        match (actual.integer_rank(), self) {
            (Some(from), _) if self.integer_rank().is_some_and(|to| from <= to) => true,
            (Some(_), ParamType::Float | ParamType::Decimal) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::TinyInt => "TINYINT",
            ParamType::SmallInt => "SMALLINT",
            ParamType::Integer => "INTEGER",
            ParamType::BigInt => "BIGINT",
            ParamType::Float => "FLOAT",
            ParamType::Decimal => "DECIMAL",
            ParamType::String => "VARCHAR",
            ParamType::Timestamp => "TIMESTAMP",
            ParamType::VarBinary => "VARBINARY",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "UPPERCASE")]
pub enum ParamValue {
    TinyInt(i8),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Float(f64),
    /// Decimal kept in its textual form
    Decimal(String),
    String(String),
    Timestamp(DateTime<Utc>),
    VarBinary(Vec<u8>),
    Null,
}

impl ParamValue {
    /// Type of this value; `None` for NULL
    pub fn param_type(&self) -> Option<ParamType> {
        match self {
            ParamValue::TinyInt(_) => Some(ParamType::TinyInt),
            ParamValue::SmallInt(_) => Some(ParamType::SmallInt),
            ParamValue::Integer(_) => Some(ParamType::Integer),
            ParamValue::BigInt(_) => Some(ParamType::BigInt),
            ParamValue::Float(_) => Some(ParamType::Float),
            ParamValue::Decimal(_) => Some(ParamType::Decimal),
            ParamValue::String(_) => Some(ParamType::String),
            ParamValue::Timestamp(_) => Some(ParamType::Timestamp),
            ParamValue::VarBinary(_) => Some(ParamType::VarBinary),
            ParamValue::Null => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::TinyInt(v) => Some(i64::from(*v)),
            ParamValue::SmallInt(v) => Some(i64::from(*v)),
            ParamValue::Integer(v) => Some(i64::from(*v)),
            ParamValue::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Integer(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::BigInt(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::String(v)
    }
}

impl From<DateTime<Utc>> for ParamValue {
    fn from(v: DateTime<Utc>) -> Self {
        ParamValue::Timestamp(v)
    }
}

impl From<Vec<u8>> for ParamValue {
    fn from(v: Vec<u8>) -> Self {
        ParamValue::VarBinary(v)
    }
}

/// Trailing variable-length parameter list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarArgs {
    /// Any number of strings
    Strings,
    /// Any number of values of any allowed type
    Any,
}

/// Parameters a scheduler factory accepts: fixed typed positions followed
/// by an optional varargs tail.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParameterSignature {
    pub fixed: Vec<ParamType>,
    pub varargs: Option<VarArgs>,
}

impl ParameterSignature {
    pub fn new(fixed: impl Into<Vec<ParamType>>) -> Self {
        Self {
            fixed: fixed.into(),
            varargs: None,
        }
    }

    pub fn with_varargs(mut self, varargs: VarArgs) -> Self {
        self.varargs = Some(varargs);
        self
    }

    /// Check arity and per-position types.
    ///
    /// Returns `Err(message)` describing the first mismatch.
    pub fn check(&self, params: &[ParamValue]) -> Result<(), String> {
        let fixed = self.fixed.len();
        match self.varargs {
            None if params.len() != fixed => {
                return Err(format!(
                    "expected {} parameters, got {}",
                    fixed,
                    params.len()
                ));
            }
            Some(_) if params.len() < fixed => {
                return Err(format!(
                    "expected at least {} parameters, got {}",
                    fixed,
                    params.len()
                ));
            }
            _ => {}
        }

        for (index, (expected, value)) in self.fixed.iter().zip(params).enumerate() {
            if !expected.accepts(value) {
                return Err(format!(
                    "parameter {} must be {}, got {:?}",
                    index + 1,
                    expected,
                    value
                ));
            }
        }

        if self.varargs == Some(VarArgs::Strings) {
            for (index, value) in params.iter().enumerate().skip(fixed) {
                if !ParamType::String.accepts(value) {
                    return Err(format!(
                        "parameter {} must be {}, got {:?}",
                        index + 1,
                        ParamType::String,
                        value
                    ));
                }
            }
        }
        Ok(())
    }
}
