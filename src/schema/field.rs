//! Field descriptors and the closed set of column primitives
//!
//! A descriptor has the form `type[|arg1,arg2,...]`. Two type names are
//! reserved: `relationship` (many-to-one link plus foreign key) and
//! `Backref` (names the reverse collection on the target).

use crate::value::Value;
use crate::{Error, Result};
use rusqlite::types::ValueRef;
use std::fmt;

/// Reserved descriptor type for many-to-one links.
pub const RELATIONSHIP: &str = "relationship";

/// Reserved descriptor type for reverse-link declarations.
pub const BACKREF: &str = "Backref";

/// Every type name a descriptor may use, reserved names included.
pub const PRIMITIVES: &[&str] = &[
    "Integer",
    "BigInteger",
    "SmallInteger",
    "String",
    "Unicode",
    "Text",
    "UnicodeText",
    "Boolean",
    "Float",
    "Numeric",
    "Date",
    "DateTime",
    "Time",
    "LargeBinary",
    RELATIONSHIP,
    BACKREF,
];

/// One field descriptor, split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub field_name: String,
    pub type_name: String,
    pub type_args: Vec<String>,
}

impl FieldSpec {
    pub fn is_relationship(&self) -> bool {
        self.type_name == RELATIONSHIP
    }

    pub fn is_backref(&self) -> bool {
        self.type_name == BACKREF
    }

    /// First argument, used as the class name by both reserved types.
    pub fn target(&self) -> Option<&str> {
        self.type_args.first().map(String::as_str)
    }
}

/// Split a descriptor into type name and arguments.
///
/// Never fails: an unknown type name is only reported once something tries
/// to construct it.
pub fn resolve(field_name: &str, descriptor: &str) -> FieldSpec {
    let (type_name, type_args) = match descriptor.split_once('|') {
        Some((type_name, args)) => (
            type_name,
            args.split(',').map(|a| a.trim().to_string()).collect(),
        ),
        None => (descriptor, Vec::new()),
    };

    FieldSpec {
        field_name: field_name.to_string(),
        type_name: type_name.trim().to_string(),
        type_args,
    }
}

/// Column primitives. Each one knows its SQL type, how to coerce document
/// values into storage values and how to read them back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Integer,
    BigInteger,
    SmallInteger,
    String { length: Option<u32> },
    Unicode { length: Option<u32> },
    Text,
    UnicodeText,
    Boolean,
    Float { precision: Option<u32> },
    Numeric { precision: Option<u32>, scale: Option<u32> },
    Date,
    DateTime,
    Time,
    LargeBinary,
}

impl FieldType {
    /// Look up a column primitive by name and build it from its arguments.
    ///
    /// The reserved names are not column primitives and are rejected here
    /// like any unknown name.
    pub fn construct(class: &str, spec: &FieldSpec) -> Result<Self> {
        let args = &spec.type_args;
        let field_type = match spec.type_name.as_str() {
            "Integer" => no_args(spec, FieldType::Integer)?,
            "BigInteger" => no_args(spec, FieldType::BigInteger)?,
            "SmallInteger" => no_args(spec, FieldType::SmallInteger)?,
            "String" => FieldType::String { length: numeric_arg(spec, 0, 1)? },
            "Unicode" => FieldType::Unicode { length: numeric_arg(spec, 0, 1)? },
            "Text" => no_args(spec, FieldType::Text)?,
            "UnicodeText" => no_args(spec, FieldType::UnicodeText)?,
            "Boolean" => no_args(spec, FieldType::Boolean)?,
            "Float" => FieldType::Float { precision: numeric_arg(spec, 0, 1)? },
            "Numeric" => FieldType::Numeric {
                precision: numeric_arg(spec, 0, 2)?,
                scale: if args.len() > 1 { numeric_arg(spec, 1, 2)? } else { None },
            },
            "Date" => no_args(spec, FieldType::Date)?,
            "DateTime" => no_args(spec, FieldType::DateTime)?,
            "Time" => no_args(spec, FieldType::Time)?,
            "LargeBinary" => no_args(spec, FieldType::LargeBinary)?,
            other => {
                return Err(Error::UnresolvedFieldType {
                    class: class.to_string(),
                    field: spec.field_name.clone(),
                    type_name: other.to_string(),
                })
            }
        };
        Ok(field_type)
    }

    /// Type name as written in descriptors
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Integer => "Integer",
            FieldType::BigInteger => "BigInteger",
            FieldType::SmallInteger => "SmallInteger",
            FieldType::String { .. } => "String",
            FieldType::Unicode { .. } => "Unicode",
            FieldType::Text => "Text",
            FieldType::UnicodeText => "UnicodeText",
            FieldType::Boolean => "Boolean",
            FieldType::Float { .. } => "Float",
            FieldType::Numeric { .. } => "Numeric",
            FieldType::Date => "Date",
            FieldType::DateTime => "DateTime",
            FieldType::Time => "Time",
            FieldType::LargeBinary => "LargeBinary",
        }
    }

    /// SQL column type used in DDL
    pub fn sql_type(&self) -> String {
        match self {
            FieldType::Integer => "INTEGER".to_string(),
            FieldType::BigInteger => "BIGINT".to_string(),
            FieldType::SmallInteger => "SMALLINT".to_string(),
            FieldType::String { length: Some(n) } | FieldType::Unicode { length: Some(n) } => {
                format!("VARCHAR({})", n)
            }
            FieldType::String { length: None } | FieldType::Unicode { length: None } => {
                "VARCHAR".to_string()
            }
            FieldType::Text | FieldType::UnicodeText => "TEXT".to_string(),
            FieldType::Boolean => "BOOLEAN".to_string(),
            FieldType::Float { .. } => "FLOAT".to_string(),
            FieldType::Numeric { precision: Some(p), scale: Some(s) } => {
                format!("NUMERIC({}, {})", p, s)
            }
            FieldType::Numeric { precision: Some(p), scale: None } => format!("NUMERIC({})", p),
            FieldType::Numeric { .. } => "NUMERIC".to_string(),
            FieldType::Date => "DATE".to_string(),
            FieldType::DateTime => "DATETIME".to_string(),
            FieldType::Time => "TIME".to_string(),
            FieldType::LargeBinary => "BLOB".to_string(),
        }
    }

    fn is_integral(&self) -> bool {
        matches!(
            self,
            FieldType::Integer | FieldType::BigInteger | FieldType::SmallInteger
        )
    }

    fn is_textual(&self) -> bool {
        matches!(
            self,
            FieldType::String { .. }
                | FieldType::Unicode { .. }
                | FieldType::Text
                | FieldType::UnicodeText
        )
    }

    fn is_temporal(&self) -> bool {
        matches!(self, FieldType::Date | FieldType::DateTime | FieldType::Time)
    }

    /// Coerce a raw document value for storage in a column of this type.
    pub fn coerce_yaml(&self, field: &str, raw: &serde_yaml::Value) -> Result<Value> {
        let value = Value::from_yaml(raw).ok_or_else(|| self.coercion_error(field, &format!("{:?}", raw)))?;
        self.coerce(field, value)
    }

    /// Coerce an already-scalar value for storage in a column of this type.
    pub fn coerce(&self, field: &str, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        let coerced = if self.is_integral() {
            match &value {
                Value::Integer(_) => Some(value.clone()),
                Value::Boolean(b) => Some(Value::Integer(i64::from(*b))),
                Value::Real(f) if f.fract() == 0.0 && fits_i64(*f) => Some(Value::Integer(*f as i64)),
                Value::Text(s) => s.trim().parse::<i64>().ok().map(Value::Integer),
                _ => None,
            }
        } else if self.is_textual() || self.is_temporal() {
            match &value {
                Value::Text(_) => Some(value.clone()),
                Value::Integer(_) | Value::Real(_) | Value::Boolean(_) if self.is_textual() => {
                    Some(Value::Text(value.key_fragment()))
                }
                _ => None,
            }
        } else {
            match self {
                FieldType::Boolean => match &value {
                    Value::Boolean(_) => Some(value.clone()),
                    Value::Integer(0) => Some(Value::Boolean(false)),
                    Value::Integer(1) => Some(Value::Boolean(true)),
                    Value::Text(s) => parse_bool(s).map(Value::Boolean),
                    _ => None,
                },
                FieldType::Float { .. } | FieldType::Numeric { .. } => match &value {
                    Value::Real(_) => Some(value.clone()),
                    Value::Integer(i) => Some(Value::Real(*i as f64)),
                    Value::Text(s) => s.trim().parse::<f64>().ok().map(Value::Real),
                    _ => None,
                },
                FieldType::LargeBinary => match &value {
                    Value::Blob(b) => Some(Value::Blob(b.clone())),
                    Value::Text(s) => Some(Value::Blob(s.as_bytes().to_vec())),
                    _ => None,
                },
                _ => None,
            }
        };

        coerced.ok_or_else(|| self.coercion_error(field, &value.to_string()))
    }

    /// Decode a stored value back into the type's natural representation.
    pub fn decode(&self, raw: ValueRef<'_>) -> Value {
        let value = Value::from_sql(raw);
        match (self, value) {
            (FieldType::Boolean, Value::Integer(i)) => Value::Boolean(i != 0),
            (FieldType::Float { .. } | FieldType::Numeric { .. }, Value::Integer(i)) => {
                Value::Real(i as f64)
            }
            (_, other) => other,
        }
    }

    fn coercion_error(&self, field: &str, value: &str) -> Error {
        Error::Coercion {
            field: field.to_string(),
            type_name: self.name().to_string(),
            value: value.to_string(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Whether a whole real converts to `i64` without saturating
fn fits_i64(f: f64) -> bool {
    f >= i64::MIN as f64 && f < i64::MAX as f64
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

fn no_args(spec: &FieldSpec, field_type: FieldType) -> Result<FieldType> {
    if spec.type_args.is_empty() {
        Ok(field_type)
    } else {
        Err(Error::InvalidFieldArguments {
            type_name: spec.type_name.clone(),
            reason: format!("takes no arguments, got {}", spec.type_args.len()),
        })
    }
}

fn numeric_arg(spec: &FieldSpec, index: usize, max: usize) -> Result<Option<u32>> {
    if spec.type_args.len() > max {
        return Err(Error::InvalidFieldArguments {
            type_name: spec.type_name.clone(),
            reason: format!("takes at most {} arguments, got {}", max, spec.type_args.len()),
        });
    }
    match spec.type_args.get(index) {
        None => Ok(None),
        Some(arg) => arg.parse::<u32>().map(Some).map_err(|_| Error::InvalidFieldArguments {
            type_name: spec.type_name.clone(),
            reason: format!("'{}' is not a number", arg),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_plain_and_with_args() {
        let spec = resolve("name", "String|50");
        assert_eq!(spec.type_name, "String");
        assert_eq!(spec.type_args, vec!["50"]);

        let spec = resolve("count", "Integer");
        assert_eq!(spec.type_name, "Integer");
        assert!(spec.type_args.is_empty());

        let spec = resolve("author", "relationship|Author");
        assert!(spec.is_relationship());
        assert_eq!(spec.target(), Some("Author"));
    }

    #[test]
    fn test_construct_known_types() {
        let spec = resolve("price", "Numeric|10,2");
        let ty = FieldType::construct("Book", &spec).unwrap();
        assert_eq!(ty, FieldType::Numeric { precision: Some(10), scale: Some(2) });
        assert_eq!(ty.sql_type(), "NUMERIC(10, 2)");

        let ty = FieldType::construct("Book", &resolve("title", "String|120")).unwrap();
        assert_eq!(ty.sql_type(), "VARCHAR(120)");
    }

    #[test]
    fn test_construct_unknown_type() {
        let err = FieldType::construct("Book", &resolve("title", "Strng")).unwrap_err();
        assert!(matches!(err, Error::UnresolvedFieldType { ref type_name, .. } if type_name == "Strng"));
    }

    #[test]
    fn test_construct_bad_arguments() {
        assert!(matches!(
            FieldType::construct("Book", &resolve("title", "String|long")),
            Err(Error::InvalidFieldArguments { .. })
        ));
        assert!(matches!(
            FieldType::construct("Book", &resolve("pages", "Integer|3")),
            Err(Error::InvalidFieldArguments { .. })
        ));
    }

    #[test]
    fn test_coercion() {
        assert_eq!(
            FieldType::Integer.coerce("n", Value::from("42")).unwrap(),
            Value::Integer(42)
        );
        assert_eq!(
            FieldType::Boolean.coerce("b", Value::from("yes")).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            FieldType::Text.coerce("t", Value::Integer(7)).unwrap(),
            Value::from("7")
        );
        assert_eq!(
            FieldType::Float { precision: None }.coerce("f", Value::Integer(2)).unwrap(),
            Value::Real(2.0)
        );
        assert!(FieldType::Integer.coerce("n", Value::from("many")).is_err());
        assert_eq!(
            FieldType::Integer.coerce("n", Value::Real(-3.0)).unwrap(),
            Value::Integer(-3)
        );
        assert_eq!(FieldType::Date.coerce("d", Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_out_of_range_real_is_not_an_integer() {
        let err = FieldType::Integer.coerce("n", Value::Real(1e30)).unwrap_err();
        assert!(matches!(err, Error::Coercion { ref field, .. } if field == "n"));
        assert!(FieldType::BigInteger.coerce("n", Value::Real(-1e19)).is_err());
        assert!(FieldType::Integer.coerce("n", Value::Real(f64::NAN)).is_err());
    }

    #[test]
    fn test_decode_boolean() {
        assert_eq!(FieldType::Boolean.decode(ValueRef::Integer(1)), Value::Boolean(true));
        assert_eq!(FieldType::Text.decode(ValueRef::Text(b"x")), Value::from("x"));
    }
}
