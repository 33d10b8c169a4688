//! Reconciliation - match incoming records against rows already stored
//!
//! Runs before the create pass. Every stored row whose key matches a record
//! of the document is adopted into the session under that key, so the create
//! pass sees the key as taken and a repeated load writes nothing new.

use super::instances::{LoadContext, RecordGroup};
use super::refs::{yaml_fragment, KeyDescriptor, RefKey, MISSING_FRAGMENT};
use super::session::Session;
use crate::storage::{Filter, Row};
use crate::Result;

/// Relationship key fields are rendered through the related row's own key;
/// past this depth the related row's id is used instead.
const MAX_KEY_DEPTH: usize = 8;

/// Records matched per query; SQLite caps expression depth at 1000 and a
/// disjunction nests one level per record.
const RECONCILE_BATCH: usize = 500;

/// Adopt stored rows matching the records of every group.
/// Returns how many keys were registered.
pub fn pre_load_existing(ctx: &LoadContext<'_>, groups: &[RecordGroup<'_>], session: &mut Session) -> Result<usize> {
    let mut registered = 0;
    for group in groups {
        if group.records.is_empty() {
            continue;
        }
        let entity = ctx.catalog.entity(group.class_name)?;
        if !ctx.store.table_exists(&entity.table_name)? {
            continue;
        }

        let mut filters = Vec::new();
        for record in group.records {
            let fragments = record_fragments(group, record)?;
            let conditions = ctx.key_filter(group.class_name, group.key, &fragments);
            if !conditions.is_empty() {
                filters.push(Filter::And(conditions));
            }
        }
        if filters.is_empty() {
            continue;
        }

        let before = registered;
        for batch in filters.chunks(RECONCILE_BATCH) {
            let rows = ctx.store.query(ctx.catalog, group.class_name, &Filter::Or(batch.to_vec()))?;
            for row in rows {
                let values = row_key(ctx, &row, group.key, 0)?;
                let key = RefKey::new(group.class_name, values);
                let id = session.adopt(ctx.catalog, row)?;
                if session.insert_ref(key, id) {
                    registered += 1;
                }
            }
        }
        tracing::debug!("Reconciled {}: {} stored matches", group.class_name, registered - before);
    }
    Ok(registered)
}

/// Key fragments of a record, `None` for any missing field.
fn record_fragments(group: &RecordGroup<'_>, record: &crate::document::Record) -> Result<Vec<String>> {
    group
        .key
        .fields
        .iter()
        .map(|field| match record.get(field) {
            Some(raw) => yaml_fragment(group.class_name, field, raw),
            None => Ok(MISSING_FRAGMENT.to_string()),
        })
        .collect()
}

/// Rebuild the key of a stored row.
fn row_key(ctx: &LoadContext<'_>, row: &Row, key: &KeyDescriptor, depth: usize) -> Result<Vec<String>> {
    let mut values = Vec::with_capacity(key.fields.len());
    for field in &key.fields {
        if field == "id" {
            values.push(row.id.to_string());
            continue;
        }
        let fragment = match ctx.catalog.find_relationship(&row.class, field) {
            Some((_, rel)) => match ctx.store.related(ctx.catalog, row, field)? {
                None => MISSING_FRAGMENT.to_string(),
                Some(related) => match ctx.key_descriptor(&rel.target) {
                    Some(related_key) if depth < MAX_KEY_DEPTH => {
                        row_key(ctx, &related, related_key, depth + 1)?.join(ctx.separator)
                    }
                    _ => related.id.to_string(),
                },
            },
            None => row
                .get(field)
                .map(|v| v.key_fragment())
                .unwrap_or_else(|| MISSING_FRAGMENT.to_string()),
        };
        values.push(fragment);
    }
    Ok(values)
}
