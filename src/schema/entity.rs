//! Entity types - runtime table schemas built from class definitions

use super::field::FieldType;
use std::collections::BTreeMap;

/// A data column, including synthesized foreign-key columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub field_type: FieldType,
    /// Table whose `id` this column points at, for foreign keys
    pub references: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            references: None,
        }
    }

    pub fn foreign_key(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::Integer,
            references: Some(table.into()),
        }
    }
}

/// A many-to-one link to another class.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    /// Attribute exposing the linked instance
    pub name: String,
    /// Target class name
    pub target: String,
    /// Foreign-key column holding the target's id
    pub fk_column: String,
    /// Collection name on the target, once a matching `Backref` is known
    pub backref: Option<String>,
}

/// Discriminator metadata for classes sharing an inheritance lineage.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Polymorphic {
    /// Always the lower-cased class name
    pub identity: String,
    /// Column holding the identity of each stored row
    pub on: Option<String>,
    /// Any other declared option, passed through untouched
    pub options: BTreeMap<String, String>,
}

/// How the identity column is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryKey {
    AutoIncrement,
    /// Shared with the parent table's `id`
    Inherited { parent_table: String },
}

/// Output of a field builder: something that becomes part of an entity type.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Column(Column),
    Relationship(Relationship),
}

/// A runtime-defined record schema registered under its class name.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    pub class_name: String,
    pub table_name: String,
    pub parent: Option<String>,
    pub columns: Vec<Column>,
    pub relationships: Vec<Relationship>,
    pub polymorphic: Option<Polymorphic>,
}

impl EntityType {
    pub fn new(class_name: impl Into<String>, parent: Option<String>) -> Self {
        let class_name = class_name.into();
        Self {
            table_name: table_name_for(&class_name),
            class_name,
            parent,
            columns: Vec::new(),
            relationships: Vec::new(),
            polymorphic: None,
        }
    }

    pub fn add_attribute(&mut self, attribute: Attribute) {
        match attribute {
            Attribute::Column(column) => {
                // Later declarations of the same name replace earlier ones
                self.columns.retain(|c| c.name != column.name);
                self.columns.push(column);
            }
            Attribute::Relationship(rel) => {
                self.relationships.retain(|r| r.name != rel.name);
                self.relationships.push(rel);
            }
        }
    }

    pub fn primary_key(&self) -> PrimaryKey {
        match &self.parent {
            Some(parent) => PrimaryKey::Inherited {
                parent_table: table_name_for(parent),
            },
            None => PrimaryKey::AutoIncrement,
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub fn polymorphic_identity(&self) -> Option<&str> {
        self.polymorphic.as_ref().map(|p| p.identity.as_str())
    }
}

/// Table names are the lower-cased class name.
pub fn table_name_for(class_name: &str) -> String {
    class_name.to_lowercase()
}
