//! Schema layer - field descriptors, entity types and the catalog
//!
//! - `field`: descriptor parsing and the closed set of column primitives
//! - `entity`: the entity type model (columns, relationships, polymorphism)
//! - `builder`: pluggable class/field builders and the backref table
//! - `catalog`: the registry every other layer queries

pub mod builder;
pub mod catalog;
pub mod entity;
pub mod field;

pub use builder::{
    BackrefTable, ClassBuilder, DefaultClassBuilder, DefaultFieldBuilder, FieldBuilder,
};
pub use catalog::{BackrefCollection, SchemaCatalog};
pub use entity::{Attribute, Column, EntityType, Polymorphic, PrimaryKey, Relationship};
pub use field::{FieldSpec, FieldType};
