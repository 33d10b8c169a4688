//! Session - in-memory unit of work for instance loading
//!
//! Instances live in an arena and reference each other by [`InstanceId`],
//! so cyclic links never form ownership cycles. Nothing reaches the store
//! until [`Session::commit`], which writes every new instance and every
//! pending link inside one transaction.

use super::refs::RefKey;
use crate::schema::SchemaCatalog;
use crate::storage::{Row, SqliteStore};
use crate::value::Value;
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Handle of an instance inside its session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(usize);

impl InstanceId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub class: String,
    /// Stored row id, once the instance exists in the store
    pub row_id: Option<i64>,
    /// Column values. Adopted rows carry every stored column.
    pub values: BTreeMap<String, Value>,
    /// Relationship name -> linked instance
    pub links: BTreeMap<String, InstanceId>,
    /// Links set in this session that still have to be written
    pending: BTreeSet<String>,
}

impl Instance {
    fn new(class: String, row_id: Option<i64>, values: BTreeMap<String, Value>) -> Self {
        Self {
            class,
            row_id,
            values,
            links: BTreeMap::new(),
            pending: BTreeSet::new(),
        }
    }

    /// Not yet written to the store
    pub fn is_new(&self) -> bool {
        self.row_id.is_none()
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.values.get(attribute)
    }

    pub fn get_str(&self, attribute: &str) -> Option<&str> {
        self.get(attribute).and_then(Value::as_str)
    }

    pub fn link(&self, relationship: &str) -> Option<InstanceId> {
        self.links.get(relationship).copied()
    }
}

/// Counts of what a commit wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CommitStats {
    pub inserted: usize,
    pub linked: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    instances: Vec<Instance>,
    /// The reference table: key -> instance
    refs: BTreeMap<RefKey, InstanceId>,
    /// (root table, row id) -> instance, so a stored row is adopted once
    identity: HashMap<(String, i64), InstanceId>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn instance(&self, id: InstanceId) -> &Instance {
        &self.instances[id.0]
    }

    pub fn instances(&self) -> impl Iterator<Item = (InstanceId, &Instance)> {
        self.instances
            .iter()
            .enumerate()
            .map(|(i, instance)| (InstanceId(i), instance))
    }

    /// Instances not yet written to the store
    pub fn pending_count(&self) -> usize {
        self.instances.iter().filter(|i| i.is_new()).count()
    }

    // ========== Reference Table ==========

    pub fn get(&self, key: &RefKey) -> Option<InstanceId> {
        self.refs.get(key).copied()
    }

    pub fn contains(&self, key: &RefKey) -> bool {
        self.refs.contains_key(key)
    }

    /// Look up an instance by key and return it.
    pub fn lookup(&self, key: &RefKey) -> Option<&Instance> {
        self.get(key).map(|id| self.instance(id))
    }

    /// Register a key. A key that is already taken keeps its instance;
    /// returns whether the key was new.
    pub fn insert_ref(&mut self, key: RefKey, id: InstanceId) -> bool {
        if self.refs.contains_key(&key) {
            return false;
        }
        self.refs.insert(key, id);
        true
    }

    pub fn refs(&self) -> impl Iterator<Item = (&RefKey, InstanceId)> {
        self.refs.iter().map(|(k, id)| (k, *id))
    }

    // ========== Instances ==========

    /// Add a new instance, to be inserted on commit.
    pub fn add(&mut self, class: impl Into<String>, values: BTreeMap<String, Value>) -> InstanceId {
        let id = InstanceId(self.instances.len());
        self.instances.push(Instance::new(class.into(), None, values));
        id
    }

    /// Take a stored row into the session, once per row.
    pub fn adopt(&mut self, catalog: &SchemaCatalog, row: Row) -> Result<InstanceId> {
        let root = catalog.root(&row.class)?.table_name.clone();
        if let Some(id) = self.identity.get(&(root.clone(), row.id)) {
            return Ok(*id);
        }
        let id = InstanceId(self.instances.len());
        self.instances.push(Instance::new(row.class, Some(row.id), row.values));
        self.identity.insert((root, row.id), id);
        Ok(id)
    }

    /// Point a relationship of `id` at `target`; written on commit.
    pub fn set_link(&mut self, id: InstanceId, relationship: &str, target: InstanceId) {
        let instance = &mut self.instances[id.0];
        instance.links.insert(relationship.to_string(), target);
        instance.pending.insert(relationship.to_string());
    }

    /// Members of a backref collection of `id`, as seen by this session:
    /// instances linked to it here, plus adopted rows whose stored foreign
    /// key points at it.
    pub fn backref(&self, catalog: &SchemaCatalog, id: InstanceId, name: &str) -> Result<Vec<InstanceId>> {
        let owner = self.instance(id);
        let collection = catalog
            .backref_collection(&owner.class, name)
            .ok_or_else(|| Error::UnknownAttribute {
                class: owner.class.clone(),
                attribute: name.to_string(),
            })?;
        let relationship = collection.relationship;

        let members = self
            .instances()
            .filter(|(_, other)| catalog.is_subclass_of(&other.class, &collection.source.class_name))
            .filter(|(_, other)| match other.link(&relationship.name) {
                Some(target) => target == id,
                None => match (owner.row_id, other.get(&relationship.fk_column)) {
                    (Some(row_id), Some(stored)) => stored.as_i64() == Some(row_id),
                    _ => false,
                },
            })
            .map(|(member, _)| member)
            .collect();
        Ok(members)
    }

    // ========== Commit ==========

    /// Write new instances and pending links in one transaction.
    ///
    /// On failure the transaction is rolled back and the instances inserted
    /// by this call lose their row ids, so the session can be committed again.
    pub fn commit(&mut self, store: &SqliteStore, catalog: &SchemaCatalog) -> Result<CommitStats> {
        store.begin_transaction()?;
        let mut inserted = Vec::new();
        match self.flush(store, catalog, &mut inserted) {
            Ok(stats) => {
                store.commit()?;
                for instance in &mut self.instances {
                    instance.pending.clear();
                }
                tracing::info!(
                    "Committed {} new instances and {} links",
                    stats.inserted,
                    stats.linked
                );
                Ok(stats)
            }
            Err(e) => {
                if let Err(rollback) = store.rollback() {
                    tracing::warn!("Rollback failed: {}", rollback);
                }
                for id in inserted {
                    let instance = &mut self.instances[id.0];
                    if let Some(row_id) = instance.row_id.take() {
                        if let Ok(root) = catalog.root(&instance.class) {
                            self.identity.remove(&(root.table_name.clone(), row_id));
                        }
                    }
                }
                Err(e)
            }
        }
    }

    fn flush(
        &mut self,
        store: &SqliteStore,
        catalog: &SchemaCatalog,
        inserted: &mut Vec<InstanceId>,
    ) -> Result<CommitStats> {
        let mut stats = CommitStats::default();

        // Insert without links first, so forward and cyclic references all
        // have a row to point at.
        for index in 0..self.instances.len() {
            let instance = &self.instances[index];
            if !instance.is_new() {
                continue;
            }
            let row_id = store.insert(catalog, &instance.class, &instance.values)?;
            let root = catalog.root(&instance.class)?.table_name.clone();
            tracing::debug!("Inserted {} #{}", instance.class, row_id);

            self.instances[index].row_id = Some(row_id);
            self.identity.insert((root, row_id), InstanceId(index));
            inserted.push(InstanceId(index));
            stats.inserted += 1;
        }

        for index in 0..self.instances.len() {
            let pending: Vec<String> = self.instances[index].pending.iter().cloned().collect();
            for relationship in pending {
                let instance = &self.instances[index];
                let Some(target) = instance.link(&relationship) else { continue };
                let (row_id, target_row) = match (instance.row_id, self.instances[target.0].row_id) {
                    (Some(row_id), Some(target_row)) => (row_id, target_row),
                    _ => continue,
                };
                store.set_foreign_key(catalog, &instance.class, row_id, &relationship, Some(target_row))?;

                if let Some((_, rel)) = catalog.find_relationship(&instance.class, &relationship) {
                    let fk_column = rel.fk_column.clone();
                    self.instances[index]
                        .values
                        .insert(fk_column, Value::Integer(target_row));
                }
                stats.linked += 1;
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Column, EntityType, FieldType, Relationship};
    use crate::storage::Filter;

    fn catalog() -> SchemaCatalog {
        let mut catalog = SchemaCatalog::new();
        let mut node = EntityType::new("Node", None);
        node.add_attribute(Attribute::Column(Column::new("name", FieldType::Text)));
        node.add_attribute(Attribute::Column(Column::foreign_key("next_id", "node")));
        node.add_attribute(Attribute::Relationship(Relationship {
            name: "next".to_string(),
            target: "Node".to_string(),
            fk_column: "next_id".to_string(),
            backref: Some("previous".to_string()),
        }));
        catalog.register(node);
        catalog
    }

    fn setup() -> (SchemaCatalog, SqliteStore) {
        let catalog = catalog();
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_table(catalog.get("Node").unwrap()).unwrap();
        (catalog, store)
    }

    fn named(name: &str) -> BTreeMap<String, Value> {
        BTreeMap::from([("name".to_string(), Value::from(name))])
    }

    #[test]
    fn test_reference_table_keeps_first_instance() {
        let mut session = Session::new();
        let a = session.add("Node", named("a"));
        let b = session.add("Node", named("b"));
        let key = RefKey::new("Node", vec!["a".to_string()]);
        assert!(session.insert_ref(key.clone(), a));
        assert!(!session.insert_ref(key.clone(), b));
        assert_eq!(session.get(&key), Some(a));
    }

    #[test]
    fn test_commit_writes_cyclic_links() {
        let (catalog, store) = setup();
        let mut session = Session::new();
        let a = session.add("Node", named("a"));
        let b = session.add("Node", named("b"));
        session.set_link(a, "next", b);
        session.set_link(b, "next", a);

        let stats = session.commit(&store, &catalog).unwrap();
        assert_eq!(stats, CommitStats { inserted: 2, linked: 2 });
        assert_eq!(session.pending_count(), 0);

        let rows = store.query(&catalog, "Node", &Filter::has("next", vec![Filter::eq("name", "a")])).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_str("name"), Some("b"));

        // Nothing left to write
        assert_eq!(session.commit(&store, &catalog).unwrap(), CommitStats::default());
    }

    #[test]
    fn test_adopt_is_idempotent() {
        let (catalog, store) = setup();
        let id = store.insert(&catalog, "Node", &named("a")).unwrap();
        let row = store.fetch(&catalog, "Node", id).unwrap().unwrap();

        let mut session = Session::new();
        let first = session.adopt(&catalog, row.clone()).unwrap();
        let second = session.adopt(&catalog, row).unwrap();
        assert_eq!(first, second);
        assert_eq!(session.len(), 1);
        assert!(!session.instance(first).is_new());
    }

    #[test]
    fn test_backref_mirrors_links() {
        let (catalog, _) = setup();
        let mut session = Session::new();
        let a = session.add("Node", named("a"));
        let b = session.add("Node", named("b"));
        let c = session.add("Node", named("c"));
        session.set_link(b, "next", a);
        session.set_link(c, "next", a);

        assert_eq!(session.backref(&catalog, a, "previous").unwrap(), vec![b, c]);
        assert!(session.backref(&catalog, b, "previous").unwrap().is_empty());
        assert!(matches!(
            session.backref(&catalog, a, "followers"),
            Err(Error::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn test_failed_commit_rolls_back() {
        let (catalog, store) = setup();
        let mut session = Session::new();
        session.add("Node", named("a"));
        session.add(
            "Node",
            BTreeMap::from([("colour".to_string(), Value::from("red"))]),
        );

        assert!(session.commit(&store, &catalog).is_err());
        assert_eq!(store.count(&catalog, "Node").unwrap(), 0);
        assert_eq!(session.pending_count(), 2);
    }
}
