//! Schema catalog - registry of entity types for one loader
//!
//! Answers every structural question the loader and the store ask:
//! inheritance lineage, subclasses, which entity owns a column or a
//! relationship, which backref collections a class exposes, and which class
//! a stored polymorphic identity stands for.

use super::entity::{Column, EntityType, Relationship};
use crate::{Error, Result};
use std::collections::HashMap;

/// A reverse collection exposed on a class by someone else's relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct BackrefCollection<'a> {
    /// Collection attribute name on the target
    pub name: &'a str,
    /// Class declaring the relationship
    pub source: &'a EntityType,
    pub relationship: &'a Relationship,
}

#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    entities: HashMap<String, EntityType>,
    /// Registration order, used for deterministic iteration and teardown
    order: Vec<String>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity type. A class registered twice keeps the last
    /// definition; the previous one is returned.
    pub fn register(&mut self, entity: EntityType) -> Option<EntityType> {
        let name = entity.class_name.clone();
        self.order.retain(|n| n != &name);
        self.order.push(name.clone());
        let previous = self.entities.insert(name.clone(), entity);
        if previous.is_some() {
            tracing::debug!("Class {} re-registered, previous definition replaced", name);
        }
        previous
    }

    pub fn unregister(&mut self, class_name: &str) -> Option<EntityType> {
        self.order.retain(|n| n != class_name);
        self.entities.remove(class_name)
    }

    pub fn get(&self, class_name: &str) -> Option<&EntityType> {
        self.entities.get(class_name)
    }

    /// Like `get`, but a missing class is an error
    pub fn entity(&self, class_name: &str) -> Result<&EntityType> {
        self.get(class_name)
            .ok_or_else(|| Error::UnknownClass(class_name.to_string()))
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.entities.contains_key(class_name)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Class names in registration order
    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Entity types in registration order
    pub fn entities(&self) -> impl Iterator<Item = &EntityType> {
        self.order.iter().filter_map(|n| self.entities.get(n))
    }

    /// The class and its ancestors, root first.
    pub fn lineage(&self, class_name: &str) -> Result<Vec<&EntityType>> {
        let mut chain = Vec::new();
        let mut current = self.entity(class_name)?;
        loop {
            chain.push(current);
            let Some(parent) = &current.parent else { break };
            if chain.len() > self.entities.len() {
                return Err(Error::UnknownParentClass(parent.clone()));
            }
            current = self
                .get(parent)
                .ok_or_else(|| Error::UnknownParentClass(parent.clone()))?;
        }
        chain.reverse();
        Ok(chain)
    }

    pub fn root(&self, class_name: &str) -> Result<&EntityType> {
        let lineage = self.lineage(class_name)?;
        lineage
            .first()
            .copied()
            .ok_or_else(|| Error::UnknownClass(class_name.to_string()))
    }

    pub fn is_subclass_of(&self, class_name: &str, ancestor: &str) -> bool {
        self.lineage(class_name)
            .map(|chain| chain.iter().any(|e| e.class_name == ancestor))
            .unwrap_or(false)
    }

    /// All transitive subclasses, in registration order. The class itself is
    /// not included.
    pub fn subclasses(&self, class_name: &str) -> Vec<&EntityType> {
        self.entities()
            .filter(|e| e.class_name != class_name && self.is_subclass_of(&e.class_name, class_name))
            .collect()
    }

    /// Find the entity in the lineage that declares a column.
    pub fn find_column(&self, class_name: &str, column: &str) -> Option<(&EntityType, &Column)> {
        let lineage = self.lineage(class_name).ok()?;
        lineage
            .into_iter()
            .rev()
            .find_map(|e| e.column(column).map(|c| (e, c)))
    }

    /// Find the entity in the lineage that declares a relationship.
    pub fn find_relationship(
        &self,
        class_name: &str,
        name: &str,
    ) -> Option<(&EntityType, &Relationship)> {
        let lineage = self.lineage(class_name).ok()?;
        lineage
            .into_iter()
            .rev()
            .find_map(|e| e.relationship(name).map(|r| (e, r)))
    }

    /// Many-to-one relationships available on a class, inherited ones included.
    pub fn relationships(&self, class_name: &str) -> Vec<&Relationship> {
        self.lineage(class_name)
            .map(|chain| chain.into_iter().flat_map(|e| e.relationships.iter()).collect())
            .unwrap_or_default()
    }

    /// Column names available on a class, the identity column included.
    pub fn attributes(&self, class_name: &str) -> Vec<&str> {
        let mut names = vec!["id"];
        if let Ok(chain) = self.lineage(class_name) {
            names.extend(chain.into_iter().flat_map(|e| e.columns.iter().map(|c| c.name.as_str())));
        }
        names
    }

    /// Collections other classes expose on this class (or an ancestor)
    /// through their relationships' backrefs.
    pub fn backref_collections(&self, class_name: &str) -> Vec<BackrefCollection<'_>> {
        let Ok(lineage) = self.lineage(class_name) else {
            return Vec::new();
        };
        let mut collections = Vec::new();
        for source in self.entities() {
            for rel in &source.relationships {
                let targets_lineage = lineage.iter().any(|e| e.class_name == rel.target);
                if let (true, Some(name)) = (targets_lineage, rel.backref.as_deref()) {
                    collections.push(BackrefCollection {
                        name,
                        source,
                        relationship: rel,
                    });
                }
            }
        }
        collections
    }

    pub fn backref_collection(&self, class_name: &str, name: &str) -> Option<BackrefCollection<'_>> {
        self.backref_collections(class_name)
            .into_iter()
            .find(|c| c.name == name)
    }

    /// Every relationship-like attribute name, in both directions.
    pub fn relation_names(&self, class_name: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .relationships(class_name)
            .into_iter()
            .map(|r| r.name.as_str())
            .collect();
        names.extend(self.backref_collections(class_name).into_iter().map(|c| c.name));
        names
    }

    /// The entity holding the discriminator column for this class's lineage.
    pub fn discriminator(&self, class_name: &str) -> Option<(&EntityType, &str)> {
        let lineage = self.lineage(class_name).ok()?;
        lineage.into_iter().find_map(|e| {
            e.polymorphic
                .as_ref()
                .and_then(|p| p.on.as_deref())
                .map(|on| (e, on))
        })
    }

    /// Map a stored polymorphic identity back to a class in the same hierarchy.
    pub fn class_for_identity(&self, class_name: &str, identity: &str) -> Option<&EntityType> {
        let root = self.root(class_name).ok()?;
        std::iter::once(root)
            .chain(self.subclasses(&root.class_name))
            .find(|e| e.polymorphic_identity() == Some(identity))
    }

    /// Attach a backref name to a relationship registered earlier.
    pub fn set_backref(&mut self, class_name: &str, relationship: &str, backref: &str) -> bool {
        let Some(entity) = self.entities.get_mut(class_name) else {
            return false;
        };
        match entity.relationships.iter_mut().find(|r| r.name == relationship) {
            Some(rel) => {
                rel.backref = Some(backref.to_string());
                true
            }
            None => false,
        }
    }
}
