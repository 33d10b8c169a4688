//! Instance loading - the create and link passes
//!
//! Pass 1 turns every record into a session instance under its key, leaving
//! relationship fields alone. Pass 2 runs once every group went through pass
//! 1 and resolves each relationship reference to an instance: the exact
//! target class first, then its subclasses present in the document, then
//! (with auto-load) the store.

use super::refs::{split_reference, yaml_fragment, KeyDescriptor, RefKey, MISSING_FRAGMENT};
use super::session::{InstanceId, Session};
use crate::document::Record;
use crate::schema::{Relationship, SchemaCatalog};
use crate::storage::{Filter, SqliteStore};
use crate::value::Value;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};

/// One class's records plus the fields forming their keys.
#[derive(Debug, Clone, Copy)]
pub struct RecordGroup<'a> {
    pub class_name: &'a str,
    pub key: &'a KeyDescriptor,
    pub records: &'a [Record],
}

/// Everything an instance loader may consult during one load.
pub struct LoadContext<'a> {
    pub store: &'a SqliteStore,
    pub catalog: &'a SchemaCatalog,
    /// Key descriptor of every class that has a group in the document
    pub key_descriptors: &'a HashMap<String, KeyDescriptor>,
    pub separator: &'a str,
    pub auto_load: bool,
}

impl LoadContext<'_> {
    pub fn key_descriptor(&self, class_name: &str) -> Option<&KeyDescriptor> {
        self.key_descriptors.get(class_name)
    }

    /// The target class plus every subclass that has records in the document
    pub fn relation_candidates(&self, target: &str) -> Vec<String> {
        let mut candidates = vec![target.to_string()];
        candidates.extend(
            self.catalog
                .subclasses(target)
                .into_iter()
                .filter(|e| self.key_descriptors.contains_key(&e.class_name))
                .map(|e| e.class_name.clone()),
        );
        candidates
    }

    /// Conditions matching rows of `class_name` whose key fields equal the
    /// given fragments. Relationship key fields match on the related class's
    /// own key. `None` fragments are left out, so a partial key matches more
    /// broadly; the matches are keyed by their stored values afterwards.
    pub fn key_filter(&self, class_name: &str, key: &KeyDescriptor, fragments: &[String]) -> Vec<Filter> {
        self.key_conditions(class_name, key, fragments, false)
    }

    /// Filter selecting the rows a reference names. `None` fragments only
    /// match missing values. Returns `None` when nothing can be compared.
    pub fn lookup_filter(&self, class_name: &str, key: &KeyDescriptor, fragments: &[String]) -> Option<Filter> {
        let conditions = self.key_conditions(class_name, key, fragments, true);
        if conditions.is_empty() {
            None
        } else {
            Some(Filter::And(conditions))
        }
    }

    fn key_conditions(
        &self,
        class_name: &str,
        key: &KeyDescriptor,
        fragments: &[String],
        match_missing: bool,
    ) -> Vec<Filter> {
        let mut conditions = Vec::new();
        for (field, fragment) in key.fields.iter().zip(fragments) {
            let missing = fragment == MISSING_FRAGMENT;
            match self.catalog.find_relationship(class_name, field) {
                Some((_, rel)) if missing && match_missing => {
                    conditions.push(Filter::eq(rel.fk_column.clone(), Value::Null));
                }
                Some((_, rel)) => {
                    if let Some(nested) = self.nested_key_filter(rel, fragment, match_missing) {
                        conditions.push(nested);
                    }
                }
                None if missing && match_missing => conditions.push(Filter::eq(field.clone(), Value::Null)),
                None if missing => {}
                None => conditions.push(Filter::eq(field.clone(), fragment.as_str())),
            }
        }
        conditions
    }

    fn nested_key_filter(&self, rel: &Relationship, reference: &str, match_missing: bool) -> Option<Filter> {
        let related_key = self.key_descriptor(&rel.target)?;
        let attributes = self.catalog.attributes(&rel.target);
        let filters: Vec<Filter> = related_key
            .fields
            .iter()
            .zip(split_reference(reference, self.separator))
            .filter(|(field, value)| {
                attributes.contains(&field.as_str()) && (match_missing || value != MISSING_FRAGMENT)
            })
            .map(|(field, value)| {
                if value == MISSING_FRAGMENT {
                    Filter::eq(field.clone(), Value::Null)
                } else {
                    Filter::eq(field.clone(), value)
                }
            })
            .collect();
        if filters.is_empty() {
            None
        } else {
            Some(Filter::has(rel.name.clone(), filters))
        }
    }
}

/// Strategy for the two instance passes.
pub trait InstanceLoader {
    /// Pass 1: create an instance for every record whose key is new.
    fn load_instance(&self, ctx: &LoadContext<'_>, group: &RecordGroup<'_>, session: &mut Session) -> Result<()>;

    /// Pass 2: resolve and set every relationship a record mentions.
    fn link_relations(&self, ctx: &LoadContext<'_>, group: &RecordGroup<'_>, session: &mut Session) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultInstanceLoader;

impl DefaultInstanceLoader {
    /// Coerce every non-relationship field of a record by its column type.
    fn build_values(
        &self,
        catalog: &SchemaCatalog,
        class_name: &str,
        record: &Record,
    ) -> Result<BTreeMap<String, Value>> {
        let relations = catalog.relation_names(class_name);
        let mut values = BTreeMap::new();
        for (field, raw) in record.iter() {
            if relations.contains(&field) {
                continue;
            }
            let value = if field == "id" {
                crate::schema::FieldType::Integer.coerce_yaml(field, raw)?
            } else {
                let (_, column) = catalog.find_column(class_name, field).ok_or_else(|| {
                    Error::UnknownAttribute {
                        class: class_name.to_string(),
                        attribute: field.to_string(),
                    }
                })?;
                column.field_type.coerce_yaml(field, raw)?
            };
            values.insert(field.to_string(), value);
        }
        Ok(values)
    }

    fn resolve(
        &self,
        ctx: &LoadContext<'_>,
        session: &mut Session,
        target: &str,
        reference: &str,
    ) -> Result<InstanceId> {
        let mut found = lookup(session, &[target.to_string()], reference, ctx.separator);
        let candidates = ctx.relation_candidates(target);
        if found.is_empty() {
            found = lookup(session, &candidates, reference, ctx.separator);
        }
        if found.is_empty() && ctx.auto_load {
            found = self.load_from_store(ctx, session, &candidates, reference)?;
        }

        match found.as_slice() {
            [id] => Ok(*id),
            [] => Err(Error::UnresolvedReference {
                class: target.to_string(),
                reference: reference.to_string(),
            }),
            many => Err(Error::AmbiguousReference {
                class: target.to_string(),
                reference: reference.to_string(),
                candidates: many.len(),
            }),
        }
    }

    /// Query each candidate class by its key and adopt what matches.
    fn load_from_store(
        &self,
        ctx: &LoadContext<'_>,
        session: &mut Session,
        candidates: &[String],
        reference: &str,
    ) -> Result<Vec<InstanceId>> {
        let fragments = split_reference(reference, ctx.separator);
        let mut found = Vec::new();
        for candidate in candidates {
            let Some(key) = ctx.key_descriptor(candidate) else { continue };
            if !ctx.store.table_exists(&ctx.catalog.entity(candidate)?.table_name)? {
                continue;
            }
            let Some(filter) = ctx.lookup_filter(candidate, key, &fragments) else { continue };
            let rows = ctx.store.query(ctx.catalog, candidate, &filter)?;
            if rows.len() > 1 {
                return Err(Error::AmbiguousReference {
                    class: candidate.clone(),
                    reference: reference.to_string(),
                    candidates: rows.len(),
                });
            }
            for row in rows {
                tracing::debug!("Auto-loaded {} #{} for {}", row.class, row.id, reference);
                let id = session.adopt(ctx.catalog, row)?;
                session.insert_ref(RefKey::parse(candidate.clone(), reference, ctx.separator), id);
                if !found.contains(&id) {
                    found.push(id);
                }
            }
        }
        Ok(found)
    }
}

/// Session instances registered under `reference` for any candidate class.
fn lookup(session: &Session, candidates: &[String], reference: &str, separator: &str) -> Vec<InstanceId> {
    let mut found = Vec::new();
    for candidate in candidates {
        if let Some(id) = session.get(&RefKey::parse(candidate.clone(), reference, separator)) {
            if !found.contains(&id) {
                found.push(id);
            }
        }
    }
    found
}

impl InstanceLoader for DefaultInstanceLoader {
    fn load_instance(&self, ctx: &LoadContext<'_>, group: &RecordGroup<'_>, session: &mut Session) -> Result<()> {
        let mut created = 0;
        for record in group.records {
            let key = group.key.key_for(group.class_name, record)?;
            if session.contains(&key) {
                continue;
            }
            let values = self.build_values(ctx.catalog, group.class_name, record)?;
            let id = session.add(group.class_name, values);
            session.insert_ref(key, id);
            created += 1;
        }
        tracing::debug!(
            "Created {} new {} instances ({} records)",
            created,
            group.class_name,
            group.records.len()
        );
        Ok(())
    }

    fn link_relations(&self, ctx: &LoadContext<'_>, group: &RecordGroup<'_>, session: &mut Session) -> Result<()> {
        let relationships: Vec<Relationship> = ctx
            .catalog
            .relationships(group.class_name)
            .into_iter()
            .cloned()
            .collect();

        for record in group.records {
            let key = group.key.key_for(group.class_name, record)?;
            let id = session.get(&key).ok_or_else(|| Error::UnresolvedReference {
                class: group.class_name.to_string(),
                reference: key.render(ctx.separator),
            })?;

            for rel in &relationships {
                let Some(raw) = record.get(&rel.name) else { continue };
                if raw.is_null() {
                    continue;
                }
                if rel.backref.is_none() {
                    return Err(Error::MissingBackref {
                        class: group.class_name.to_string(),
                        field: rel.name.clone(),
                        target: rel.target.clone(),
                    });
                }
                let reference = yaml_fragment(group.class_name, &rel.name, raw)?;
                let target = self.resolve(ctx, session, &rel.target, &reference)?;
                session.set_link(id, &rel.name, target);
            }
        }
        Ok(())
    }
}
