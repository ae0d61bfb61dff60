//! Entity records and storage formats.
//!
//! Records are field maps rather than per-entity structs so that a single
//! store implementation can serve every module.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use super::error::DomainError;

/// Storage format of one column, used for write coercion and SQL binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldFormat {
    Integer,
    Float,
    Text,
    Boolean,
    Timestamp,
    Json,
}

impl FieldFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldFormat::Integer => "integer",
            FieldFormat::Float => "float",
            FieldFormat::Text => "text",
            FieldFormat::Boolean => "boolean",
            FieldFormat::Timestamp => "timestamp",
            FieldFormat::Json => "json",
        }
    }

    /// Postgres type used when binding a value of this format.
    pub fn sql_type(self) -> &'static str {
        match self {
            FieldFormat::Integer => "BIGINT",
            FieldFormat::Float => "DOUBLE PRECISION",
            FieldFormat::Text => "TEXT",
            FieldFormat::Boolean => "BOOLEAN",
            FieldFormat::Timestamp => "TIMESTAMPTZ",
            FieldFormat::Json => "JSONB",
        }
    }

    /// Normalises `value` to the canonical JSON shape of this format.
    ///
    /// `null` is accepted by every format; nullability is enforced by the store.
    pub fn coerce(self, field: &str, value: Value) -> Result<Value, DomainError> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        match self {
            FieldFormat::Integer => coerce_integer(field, value),
            FieldFormat::Float => coerce_float(field, value),
            FieldFormat::Text => match value {
                Value::String(text) => Ok(Value::String(text)),
                Value::Number(number) => Ok(Value::String(number.to_string())),
                Value::Bool(flag) => Ok(Value::String(flag.to_string())),
                other => Err(DomainError::invalid_value(field, "text", other)),
            },
            FieldFormat::Boolean => coerce_boolean(field, value),
            FieldFormat::Timestamp => match value {
                Value::String(text) => {
                    let parsed = OffsetDateTime::parse(text.trim(), &Rfc3339)
                        .map_err(|_| DomainError::invalid_value(field, "RFC 3339 timestamp", &text))?;
                    Ok(Value::String(format_timestamp(parsed)?))
                }
                other => Err(DomainError::invalid_value(field, "RFC 3339 timestamp", other)),
            },
            FieldFormat::Json => Ok(value),
        }
    }
}

fn coerce_integer(field: &str, value: Value) -> Result<Value, DomainError> {
    match &value {
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                return Ok(Value::from(int));
            }
            if let Some(float) = number.as_f64()
                && float.fract() == 0.0
                && float >= i64::MIN as f64
                && float <= i64::MAX as f64
            {
                return Ok(Value::from(float as i64));
            }
            Err(DomainError::invalid_value(field, "integer", &value))
        }
        Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| DomainError::invalid_value(field, "integer", text)),
        _ => Err(DomainError::invalid_value(field, "integer", &value)),
    }
}

fn coerce_float(field: &str, value: Value) -> Result<Value, DomainError> {
    let float = match &value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    float
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| DomainError::invalid_value(field, "float", value))
}

fn coerce_boolean(field: &str, value: Value) -> Result<Value, DomainError> {
    let flag = match &value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    };
    flag.map(Value::Bool)
        .ok_or_else(|| DomainError::invalid_value(field, "boolean", value))
}

pub fn format_timestamp(value: OffsetDateTime) -> Result<String, DomainError> {
    value
        .format(&Rfc3339)
        .map_err(|err| DomainError::invariant(format!("failed to format timestamp: {err}")))
}

pub fn now_timestamp() -> Result<String, DomainError> {
    format_timestamp(OffsetDateTime::now_utc())
}

/// One row of any entity table, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.0.get(field).and_then(Value::as_i64)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = serde_json::map::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn integer_accepts_numeric_strings() {
        assert_eq!(
            FieldFormat::Integer.coerce("n", json!(" 42 ")).expect("coerce"),
            json!(42)
        );
        assert_eq!(
            FieldFormat::Integer.coerce("n", json!(7.0)).expect("coerce"),
            json!(7)
        );
        assert!(FieldFormat::Integer.coerce("n", json!("4.5")).is_err());
    }

    #[test]
    fn boolean_accepts_common_spellings() {
        assert_eq!(
            FieldFormat::Boolean.coerce("b", json!("yes")).expect("coerce"),
            json!(true)
        );
        assert_eq!(
            FieldFormat::Boolean.coerce("b", json!(0)).expect("coerce"),
            json!(false)
        );
        assert!(FieldFormat::Boolean.coerce("b", json!(2)).is_err());
    }

    #[test]
    fn timestamp_is_normalised_to_rfc3339() {
        let value = FieldFormat::Timestamp
            .coerce("at", json!("2024-03-01T10:00:00+02:00"))
            .expect("coerce");
        assert_eq!(value, json!("2024-03-01T10:00:00+02:00"));
        assert!(FieldFormat::Timestamp.coerce("at", json!("yesterday")).is_err());
    }

    #[test]
    fn null_passes_every_format() {
        for format in [
            FieldFormat::Integer,
            FieldFormat::Float,
            FieldFormat::Text,
            FieldFormat::Boolean,
            FieldFormat::Timestamp,
            FieldFormat::Json,
        ] {
            assert_eq!(format.coerce("f", Value::Null).expect("coerce"), Value::Null);
        }
    }

    #[test]
    fn record_builder_and_accessors() {
        let record = Record::new().with("id", 3).with("name", "Acme");
        assert_eq!(record.get_i64("id"), Some(3));
        assert_eq!(record.get_str("name"), Some("Acme"));
        assert_eq!(record.len(), 2);
        assert!(!record.contains("missing"));
    }
}
