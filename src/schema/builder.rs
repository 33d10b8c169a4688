//! Schema builder - class definitions to entity types
//!
//! Building is split in two strategies so either can be swapped out:
//! `FieldBuilder` turns one resolved descriptor into attributes, and
//! `ClassBuilder` assembles a whole entity type (identity column,
//! polymorphic metadata, fields). Both are shared by the live loader and the
//! export backend.

use super::catalog::SchemaCatalog;
use super::entity::{table_name_for, Attribute, Column, EntityType, Polymorphic, Relationship};
use super::field::{self, FieldSpec, FieldType};
use crate::document::{ClassHeader, Definition};
use crate::{Error, Result};
use std::collections::HashMap;

/// Backref names declared while building one models document.
///
/// Keyed by the class holding the relationship, then by the class that
/// declared the `Backref` (the relationship's target).
#[derive(Debug, Clone, Default)]
pub struct BackrefTable {
    entries: HashMap<String, HashMap<String, String>>,
}

impl BackrefTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `declaring_class` has `field: Backref|relationship_class`
    pub fn record(&mut self, relationship_class: &str, declaring_class: &str, field: &str) {
        self.entries
            .entry(relationship_class.to_string())
            .or_default()
            .insert(declaring_class.to_string(), field.to_string());
    }

    /// Backref name for a relationship on `relationship_class` pointing at `target`
    pub fn lookup(&self, relationship_class: &str, target: &str) -> Option<&str> {
        self.entries
            .get(relationship_class)
            .and_then(|by_target| by_target.get(target))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Turns a single non-backref field descriptor into attributes.
pub trait FieldBuilder {
    fn build_field(
        &self,
        spec: &FieldSpec,
        class_name: &str,
        backrefs: &BackrefTable,
    ) -> Result<Vec<Attribute>>;
}

/// Assembles an entity type from a class header and its definition.
pub trait ClassBuilder {
    fn build_class(
        &self,
        header: &ClassHeader,
        definition: &Definition,
        catalog: &SchemaCatalog,
        fields: &dyn FieldBuilder,
        backrefs: &mut BackrefTable,
    ) -> Result<EntityType>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFieldBuilder;

impl FieldBuilder for DefaultFieldBuilder {
    fn build_field(
        &self,
        spec: &FieldSpec,
        class_name: &str,
        backrefs: &BackrefTable,
    ) -> Result<Vec<Attribute>> {
        if !spec.is_relationship() {
            let field_type = FieldType::construct(class_name, spec)?;
            return Ok(vec![Attribute::Column(Column::new(&spec.field_name, field_type))]);
        }

        let target = match spec.type_args.as_slice() {
            [target] if !target.is_empty() => target.clone(),
            _ => {
                return Err(Error::InvalidFieldArguments {
                    type_name: field::RELATIONSHIP.to_string(),
                    reason: format!("'{}' needs exactly one target class", spec.field_name),
                })
            }
        };

        let fk_column = format!("{}_id", spec.field_name);
        let relationship = Relationship {
            name: spec.field_name.clone(),
            backref: backrefs.lookup(class_name, &target).map(str::to_string),
            fk_column: fk_column.clone(),
            target: target.clone(),
        };

        Ok(vec![
            Attribute::Column(Column::foreign_key(fk_column, table_name_for(&target))),
            Attribute::Relationship(relationship),
        ])
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassBuilder;

impl DefaultClassBuilder {
    fn prepare_polymorphic(header: &ClassHeader, definition: &Definition) -> Option<Polymorphic> {
        if header.inherits_name.is_none() && definition.polymorphic.is_none() {
            return None;
        }
        let mut options = definition.polymorphic.clone().unwrap_or_default();
        options.remove("identity");
        let on = options.remove("on");
        Some(Polymorphic {
            identity: header.class_name.to_lowercase(),
            on,
            options,
        })
    }
}

impl ClassBuilder for DefaultClassBuilder {
    fn build_class(
        &self,
        header: &ClassHeader,
        definition: &Definition,
        catalog: &SchemaCatalog,
        fields: &dyn FieldBuilder,
        backrefs: &mut BackrefTable,
    ) -> Result<EntityType> {
        let class_name = &header.class_name;

        if let Some(parent) = &header.inherits_name {
            if !catalog.contains(parent) {
                return Err(Error::UnknownParentClass(parent.clone()));
            }
        }

        let mut entity = EntityType::new(class_name, header.inherits_name.clone());
        entity.polymorphic = Self::prepare_polymorphic(header, definition);

        for spec in parse_fields(definition, class_name, backrefs)? {
            for attribute in fields.build_field(&spec, class_name, backrefs)? {
                entity.add_attribute(attribute);
            }
        }

        tracing::debug!(
            "Built class {} ({} columns, {} relationships)",
            class_name,
            entity.columns.len(),
            entity.relationships.len()
        );
        Ok(entity)
    }
}

/// Resolve every descriptor of a definition, recording `Backref`
/// declarations as they are met and returning the rest in order.
pub fn parse_fields(
    definition: &Definition,
    class_name: &str,
    backrefs: &mut BackrefTable,
) -> Result<Vec<FieldSpec>> {
    let mut specs = Vec::new();
    for (field_name, descriptor) in &definition.fields {
        let spec = field::resolve(field_name, descriptor);
        if spec.is_backref() {
            let relationship_class = spec.target().filter(|t| !t.is_empty()).ok_or_else(|| {
                Error::InvalidFieldArguments {
                    type_name: field::BACKREF.to_string(),
                    reason: format!("'{}' needs the class holding the relationship", field_name),
                }
            })?;
            backrefs.record(relationship_class, class_name, field_name);
        } else {
            specs.push(spec);
        }
    }
    Ok(specs)
}

/// Attach backrefs declared after the relationship's class was built.
/// Returns how many relationships were completed.
pub fn resolve_pending_backrefs(
    catalog: &mut SchemaCatalog,
    backrefs: &BackrefTable,
    classes: &[String],
) -> usize {
    let mut pending = Vec::new();
    for class_name in classes {
        let Some(entity) = catalog.get(class_name) else { continue };
        for rel in entity.relationships.iter().filter(|r| r.backref.is_none()) {
            if let Some(name) = backrefs.lookup(class_name, &rel.target) {
                pending.push((class_name.clone(), rel.name.clone(), name.to_string()));
            }
        }
    }

    for (class_name, relationship, backref) in &pending {
        catalog.set_backref(class_name, relationship, backref);
    }
    pending.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn definition(fields: &[(&str, &str)]) -> Definition {
        Definition {
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            polymorphic: None,
        }
    }

    fn build(
        catalog: &SchemaCatalog,
        header: &str,
        def: &Definition,
        backrefs: &mut BackrefTable,
    ) -> Result<EntityType> {
        DefaultClassBuilder.build_class(
            &ClassHeader::parse(header),
            def,
            catalog,
            &DefaultFieldBuilder,
            backrefs,
        )
    }

    #[test]
    fn test_backref_is_recorded_not_materialized() {
        let catalog = SchemaCatalog::new();
        let mut backrefs = BackrefTable::new();
        let author = build(
            &catalog,
            "Author",
            &definition(&[("name", "String|50"), ("books", "Backref|Book")]),
            &mut backrefs,
        )
        .unwrap();

        assert_eq!(author.columns.len(), 1);
        assert!(author.column("books").is_none());
        assert_eq!(backrefs.lookup("Book", "Author"), Some("books"));
    }

    #[test]
    fn test_relationship_synthesizes_foreign_key() {
        let catalog = SchemaCatalog::new();
        let mut backrefs = BackrefTable::new();
        backrefs.record("Book", "Author", "books");
        let book = build(
            &catalog,
            "Book",
            &definition(&[("title", "Text"), ("author", "relationship|Author")]),
            &mut backrefs,
        )
        .unwrap();

        let fk = book.column("author_id").unwrap();
        assert_eq!(fk.references.as_deref(), Some("author"));
        let rel = book.relationship("author").unwrap();
        assert_eq!(rel.target, "Author");
        assert_eq!(rel.backref.as_deref(), Some("books"));
    }

    #[test]
    fn test_inheritance_and_polymorphic_identity() {
        let mut catalog = SchemaCatalog::new();
        let mut backrefs = BackrefTable::new();
        let mut def = definition(&[("kind", "String|20")]);
        def.polymorphic = Some(BTreeMap::from([
            ("on".to_string(), "kind".to_string()),
            ("identity".to_string(), "ignored".to_string()),
        ]));
        let root = build(&catalog, "Collection", &def, &mut backrefs).unwrap();
        let poly = root.polymorphic.clone().unwrap();
        assert_eq!(poly.identity, "collection");
        assert_eq!(poly.on.as_deref(), Some("kind"));
        catalog.register(root);

        let child = build(&catalog, "Shelf|Collection", &definition(&[]), &mut backrefs).unwrap();
        assert_eq!(child.parent.as_deref(), Some("Collection"));
        assert_eq!(child.polymorphic_identity(), Some("shelf"));
    }

    #[test]
    fn test_unknown_parent_and_type() {
        let catalog = SchemaCatalog::new();
        let mut backrefs = BackrefTable::new();
        assert!(matches!(
            build(&catalog, "Shelf|Nowhere", &definition(&[]), &mut backrefs),
            Err(Error::UnknownParentClass(_))
        ));
        assert!(matches!(
            build(&catalog, "Shelf", &definition(&[("x", "Widget")]), &mut backrefs),
            Err(Error::UnresolvedFieldType { .. })
        ));
    }

    #[test]
    fn test_late_backref_is_attached_afterwards() {
        let mut catalog = SchemaCatalog::new();
        let mut backrefs = BackrefTable::new();
        let book = build(
            &catalog,
            "Book",
            &definition(&[("author", "relationship|Author")]),
            &mut backrefs,
        )
        .unwrap();
        assert!(book.relationship("author").unwrap().backref.is_none());
        catalog.register(book);

        let author = build(
            &catalog,
            "Author",
            &definition(&[("books", "Backref|Book")]),
            &mut backrefs,
        )
        .unwrap();
        catalog.register(author);

        let classes = vec!["Book".to_string(), "Author".to_string()];
        assert_eq!(resolve_pending_backrefs(&mut catalog, &backrefs, &classes), 1);
        assert_eq!(
            catalog.get("Book").unwrap().relationship("author").unwrap().backref.as_deref(),
            Some("books")
        );
    }
}
