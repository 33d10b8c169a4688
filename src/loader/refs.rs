//! Reference keys - the human-readable handles records use for each other

use crate::document::Record;
use crate::value::Value;
use crate::{Error, Result};
use std::fmt;

/// Separator used when none is configured
pub const DEFAULT_SEPARATOR: &str = ",";

/// Placeholder fragment for a key field that has no value
pub const MISSING_FRAGMENT: &str = "None";

/// A class name plus the ordered key values of one instance.
///
/// `Display` renders the textual form `Class|v1,v2` with the default
/// separator; use [`RefKey::render`] for any other one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefKey {
    pub class: String,
    pub values: Vec<String>,
}

impl RefKey {
    pub fn new(class: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            class: class.into(),
            values,
        }
    }

    /// Key for a symbolic reference as written in a record, e.g. `Ada` or
    /// `Main, 3`. Every fragment is trimmed.
    pub fn parse(class: impl Into<String>, reference: &str, separator: &str) -> Self {
        Self::new(class, split_reference(reference, separator))
    }

    pub fn render(&self, separator: &str) -> String {
        format!("{}|{}", self.class, self.values.join(separator))
    }
}

impl fmt::Display for RefKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render(DEFAULT_SEPARATOR))
    }
}

/// Split a reference string into trimmed fragments.
pub fn split_reference(reference: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return vec![reference.trim().to_string()];
    }
    reference
        .split(separator)
        .map(|fragment| fragment.trim().to_string())
        .collect()
}

/// The `ref` of a record group: which fields form the key, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescriptor {
    pub fields: Vec<String>,
}

impl KeyDescriptor {
    pub fn parse(raw: &str, separator: &str) -> Self {
        Self {
            fields: split_reference(raw, separator),
        }
    }

    pub fn is_composite(&self) -> bool {
        self.fields.len() > 1
    }

    /// Build the key of a record.
    ///
    /// A missing field becomes `None` in a composite key and is an error in a
    /// single-field key.
    pub fn key_for(&self, class_name: &str, record: &Record) -> Result<RefKey> {
        let mut values = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let fragment = match record.get(field) {
                Some(raw) => yaml_fragment(class_name, field, raw)?,
                None if self.is_composite() => MISSING_FRAGMENT.to_string(),
                None => {
                    return Err(Error::MissingKeyField {
                        class: class_name.to_string(),
                        field: field.clone(),
                    })
                }
            };
            values.push(fragment);
        }
        Ok(RefKey::new(class_name, values))
    }
}

/// Render a raw document scalar as a key fragment.
pub fn yaml_fragment(class_name: &str, field: &str, raw: &serde_yaml::Value) -> Result<String> {
    Value::from_yaml(raw)
        .map(|value| value.key_fragment())
        .ok_or_else(|| {
            Error::MalformedDocument(format!(
                "{}.{} must be a scalar to be used as a key or reference",
                class_name, field
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value as Yaml;

    fn record(pairs: &[(&str, Yaml)]) -> Record {
        Record::new(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    #[test]
    fn test_parse_trims_fragments() {
        let key = RefKey::parse("Shelf", " Main ,  3", ",");
        assert_eq!(key.values, vec!["Main", "3"]);
        assert_eq!(key.to_string(), "Shelf|Main,3");
        assert_eq!(key.render(";"), "Shelf|Main;3");
    }

    #[test]
    fn test_composite_key_fills_missing_with_none() {
        let desc = KeyDescriptor::parse("name, floor", ",");
        assert!(desc.is_composite());
        let key = desc
            .key_for("Room", &record(&[("name", Yaml::from("Lab"))]))
            .unwrap();
        assert_eq!(key.values, vec!["Lab", "None"]);
    }

    #[test]
    fn test_single_key_requires_field() {
        let desc = KeyDescriptor::parse("name", ",");
        let err = desc.key_for("Room", &record(&[])).unwrap_err();
        assert!(matches!(err, Error::MissingKeyField { ref field, .. } if field == "name"));
    }

    #[test]
    fn test_scalar_fragments() {
        let desc = KeyDescriptor::parse("n;flag;ratio", ";");
        let key = desc
            .key_for(
                "Probe",
                &record(&[
                    ("n", Yaml::from(7)),
                    ("flag", Yaml::from(true)),
                    ("ratio", Yaml::from(2.0)),
                ]),
            )
            .unwrap();
        assert_eq!(key.values, vec!["7", "True", "2.0"]);
    }

    #[test]
    fn test_non_scalar_key_is_rejected() {
        let desc = KeyDescriptor::parse("tags", ",");
        let raw = Yaml::Sequence(vec![Yaml::from("a")]);
        assert!(matches!(
            desc.key_for("Post", &record(&[("tags", raw)])),
            Err(Error::MalformedDocument(_))
        ));
    }
}
