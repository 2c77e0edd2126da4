//! Property values: one enum shared by rows, keys, skip tokens and filter literals.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use serde_json::Value as Json;
use thiserror::Error;
use uuid::Uuid;

use crate::kind::PropertyKind;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Decimal(BigDecimal),
    String(String),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    /// Complex-typed property content, kept as JSON.
    Complex(Json),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        expected: PropertyKind,
        got: &'static str,
    },

    #[error("invalid {kind} literal '{literal}'")]
    InvalidLiteral { kind: PropertyKind, literal: String },
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short type tag used in diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Uuid(_) => "uuid",
            Value::DateTime(_) => "datetime",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Complex(_) => "complex",
        }
    }

    /// Order two values of the same kind. Null sorts before everything.
    ///
    /// Returns `None` for values that have no common ordering (different kinds,
    /// complex content).
    #[must_use]
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        use Value as V;
        match (self, other) {
            (V::Null, V::Null) => Some(Ordering::Equal),
            (V::Null, _) => Some(Ordering::Less),
            (_, V::Null) => Some(Ordering::Greater),
            (V::Bool(a), V::Bool(b)) => Some(a.cmp(b)),
            (V::Int(a), V::Int(b)) => Some(a.cmp(b)),
            (V::Decimal(a), V::Decimal(b)) => Some(a.cmp(b)),
            (V::Int(a), V::Decimal(b)) => Some(BigDecimal::from(*a).cmp(b)),
            (V::Decimal(a), V::Int(b)) => Some(a.cmp(&BigDecimal::from(*b))),
            (V::String(a), V::String(b)) => Some(a.cmp(b)),
            (V::Uuid(a), V::Uuid(b)) => Some(a.cmp(b)),
            (V::DateTime(a), V::DateTime(b)) => Some(a.cmp(b)),
            (V::Date(a), V::Date(b)) => Some(a.cmp(b)),
            (V::Time(a), V::Time(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Equality across numeric representations (`Int(1)` equals `Decimal(1.0)`).
    #[must_use]
    pub fn loosely_eq(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    /// Zero value of a scalar kind, used when a null must land in a non-nullable slot.
    #[must_use]
    pub fn zero(kind: PropertyKind) -> Option<Value> {
        Some(match kind {
            PropertyKind::String => Value::String(String::new()),
            PropertyKind::Int => Value::Int(0),
            PropertyKind::Decimal => Value::Decimal(BigDecimal::from(0)),
            PropertyKind::Bool => Value::Bool(false),
            PropertyKind::Uuid => Value::Uuid(Uuid::nil()),
            PropertyKind::DateTime => Value::DateTime(DateTime::<Utc>::default()),
            PropertyKind::Date => Value::Date(NaiveDate::default()),
            PropertyKind::Time => Value::Time(NaiveTime::default()),
            PropertyKind::Complex | PropertyKind::Navigation => return None,
        })
    }

    /// Coerce a JSON payload value into a value of `kind`.
    ///
    /// # Errors
    /// Returns `ValueError` if the JSON shape does not fit the kind.
    pub fn from_json(kind: PropertyKind, json: &Json) -> Result<Value, ValueError> {
        let mismatch = |got: &'static str| ValueError::TypeMismatch {
            expected: kind,
            got,
        };
        let invalid = |literal: &str| ValueError::InvalidLiteral {
            kind,
            literal: literal.to_owned(),
        };

        if json.is_null() {
            return Ok(Value::Null);
        }

        Ok(match (kind, json) {
            (PropertyKind::String, Json::String(s)) => Value::String(s.clone()),
            (PropertyKind::Int, Json::Number(n)) => {
                Value::Int(n.as_i64().ok_or_else(|| invalid(&n.to_string()))?)
            }
            (PropertyKind::Decimal, Json::Number(n)) => Value::Decimal(
                BigDecimal::from_str(&n.to_string()).map_err(|_| invalid(&n.to_string()))?,
            ),
            // IEEE754Compatible clients send decimals as strings
            (PropertyKind::Decimal, Json::String(s)) => {
                Value::Decimal(BigDecimal::from_str(s).map_err(|_| invalid(s))?)
            }
            (PropertyKind::Bool, Json::Bool(b)) => Value::Bool(*b),
            (PropertyKind::Uuid, Json::String(s)) => {
                Value::Uuid(Uuid::parse_str(s).map_err(|_| invalid(s))?)
            }
            (PropertyKind::DateTime, Json::String(s)) => Value::DateTime(
                DateTime::parse_from_rfc3339(s)
                    .map_err(|_| invalid(s))?
                    .with_timezone(&Utc),
            ),
            (PropertyKind::Date, Json::String(s)) => {
                Value::Date(s.parse::<NaiveDate>().map_err(|_| invalid(s))?)
            }
            (PropertyKind::Time, Json::String(s)) => {
                Value::Time(s.parse::<NaiveTime>().map_err(|_| invalid(s))?)
            }
            (PropertyKind::Complex, Json::Object(_)) => Value::Complex(json.clone()),
            (_, Json::String(_)) => return Err(mismatch("string")),
            (_, Json::Number(_)) => return Err(mismatch("number")),
            (_, Json::Bool(_)) => return Err(mismatch("bool")),
            (_, Json::Array(_)) => return Err(mismatch("array")),
            (_, Json::Object(_)) => return Err(mismatch("object")),
            (_, Json::Null) => Value::Null,
        })
    }

    /// JSON rendering used in response payloads and skip tokens.
    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Decimal(d) => {
                let s = d.normalized().to_string();
                serde_json::from_str::<Json>(&s).unwrap_or(Json::String(s))
            }
            Value::String(s) => Json::String(s.clone()),
            Value::Uuid(u) => Json::String(u.to_string()),
            Value::DateTime(dt) => Json::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Date(d) => Json::String(d.to_string()),
            Value::Time(t) => Json::String(t.to_string()),
            Value::Complex(j) => j.clone(),
        }
    }

    /// Render as an OData URL literal (`5`, `'O''Neil'`, `2024-01-02`).
    #[must_use]
    pub fn to_literal(&self) -> String {
        match self {
            Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Null => "null".to_owned(),
            other => match other.to_json() {
                Json::String(s) => s,
                j => j.to_string(),
            },
        }
    }

    /// Parse an OData URL literal as a value of `kind`.
    ///
    /// Single or double quotes around the literal are stripped for every kind;
    /// doubled single quotes inside a single-quoted string are unescaped.
    ///
    /// # Errors
    /// Returns `ValueError::InvalidLiteral` if the literal does not parse.
    pub fn parse_literal(kind: PropertyKind, literal: &str) -> Result<Value, ValueError> {
        let raw = literal.trim();
        if raw == "null" {
            return Ok(Value::Null);
        }
        let invalid = || ValueError::InvalidLiteral {
            kind,
            literal: raw.to_owned(),
        };
        let unquoted = unquote(raw);

        Ok(match kind {
            PropertyKind::String => Value::String(unquoted),
            PropertyKind::Int => Value::Int(unquoted.parse::<i64>().map_err(|_| invalid())?),
            PropertyKind::Decimal => {
                let digits = unquoted.trim_end_matches(['m', 'M']);
                Value::Decimal(BigDecimal::from_str(digits).map_err(|_| invalid())?)
            }
            PropertyKind::Bool => Value::Bool(unquoted.parse::<bool>().map_err(|_| invalid())?),
            PropertyKind::Uuid => Value::Uuid(Uuid::parse_str(&unquoted).map_err(|_| invalid())?),
            PropertyKind::DateTime => Value::DateTime(
                DateTime::parse_from_rfc3339(&unquoted)
                    .map_err(|_| invalid())?
                    .with_timezone(&Utc),
            ),
            PropertyKind::Date => Value::Date(unquoted.parse::<NaiveDate>().map_err(|_| invalid())?),
            PropertyKind::Time => Value::Time(unquoted.parse::<NaiveTime>().map_err(|_| invalid())?),
            PropertyKind::Complex | PropertyKind::Navigation => return Err(invalid()),
        })
    }

    /// Integer view of a numeric value.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Decimal(d) if d.is_integer() => d.to_i64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

fn unquote(raw: &str) -> String {
    let bytes = raw.as_bytes();
    if raw.len() >= 2 {
        let (first, last) = (bytes[0], bytes[raw.len() - 1]);
        if first == b'\'' && last == b'\'' {
            return raw[1..raw.len() - 1].replace("''", "'");
        }
        if first == b'"' && last == b'"' {
            return raw[1..raw.len() - 1].to_owned();
        }
    }
    raw.to_owned()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_literal())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<BigDecimal> for Value {
    fn from(v: BigDecimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}
