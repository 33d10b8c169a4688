//! Typed values exchanged between documents, sessions and the store.

use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use std::fmt;

/// A single attribute value.
///
/// Documents hand over loosely typed YAML scalars; column types coerce them
/// into one of these variants before they reach SQLite.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Blob(Vec<u8>),
}

impl Value {
    /// Convert a raw document scalar without any column type in play.
    pub fn from_yaml(value: &serde_yaml::Value) -> Option<Self> {
        match value {
            serde_yaml::Value::Null => Some(Value::Null),
            serde_yaml::Value::Bool(b) => Some(Value::Boolean(*b)),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Value::Integer(i))
                } else {
                    n.as_f64().map(Value::Real)
                }
            }
            serde_yaml::Value::String(s) => Some(Value::Text(s.clone())),
            serde_yaml::Value::Tagged(tagged) => Value::from_yaml(&tagged.value),
            serde_yaml::Value::Sequence(_) | serde_yaml::Value::Mapping(_) => None,
        }
    }

    /// Read a value straight out of a result row.
    pub fn from_sql(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render the value the way it appears inside a reference key.
    ///
    /// Keys written by hand in a document and keys rebuilt from stored rows
    /// must agree, so this rendering is the single source for both.
    pub fn key_fragment(&self) -> String {
        let raw = match self {
            Value::Null => "None".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Real(f) => format_real(*f),
            Value::Text(s) => s.clone(),
            Value::Boolean(true) => "True".to_string(),
            Value::Boolean(false) => "False".to_string(),
            Value::Blob(b) => String::from_utf8_lossy(b).into_owned(),
        };
        raw.trim().to_string()
    }
}

fn format_real(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
            other => write!(f, "{}", other.key_fragment()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Real(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Boolean(b) => ToSqlOutput::Borrowed(ValueRef::Integer(i64::from(*b))),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_fragments() {
        assert_eq!(Value::Integer(42).key_fragment(), "42");
        assert_eq!(Value::Real(1.0).key_fragment(), "1.0");
        assert_eq!(Value::Real(2.5).key_fragment(), "2.5");
        assert_eq!(Value::Boolean(true).key_fragment(), "True");
        assert_eq!(Value::Null.key_fragment(), "None");
        assert_eq!(Value::from("  Ada ").key_fragment(), "Ada");
    }

    #[test]
    fn test_from_yaml_scalars() {
        let doc: serde_yaml::Value = serde_yaml::from_str("[1, 1.5, true, x, ~]").unwrap();
        let values: Vec<Value> = doc
            .as_sequence()
            .unwrap()
            .iter()
            .map(|v| Value::from_yaml(v).unwrap())
            .collect();
        assert_eq!(
            values,
            vec![
                Value::Integer(1),
                Value::Real(1.5),
                Value::Boolean(true),
                Value::from("x"),
                Value::Null,
            ]
        );
    }

    #[test]
    fn test_nested_yaml_is_not_a_scalar() {
        let doc: serde_yaml::Value = serde_yaml::from_str("{a: 1}").unwrap();
        assert!(Value::from_yaml(&doc).is_none());
    }
}
