//! SQLite storage implementation

use super::query::{Filter, SqlContext};
use super::schema::{self, quote_ident};
use crate::schema::{EntityType, SchemaCatalog};
use crate::value::Value;
use crate::{Error, Result};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;

/// A stored row, read through the lineage of its concrete class.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Concrete class, decided by the discriminator when there is one
    pub class: String,
    pub id: i64,
    /// Every column of the lineage, foreign keys included
    pub values: BTreeMap<String, Value>,
}

impl Row {
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        if attribute == "id" {
            return None;
        }
        self.values.get(attribute)
    }

    pub fn get_str(&self, attribute: &str) -> Option<&str> {
        self.get(attribute).and_then(Value::as_str)
    }
}

/// SQLite-backed storage for loaded entity types
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run a script of statements, e.g. an exported schema
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    // ========== Schema Operations ==========

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Create the table for an entity type, if it doesn't exist yet
    pub fn create_table(&self, entity: &EntityType) -> Result<()> {
        self.conn.execute(&schema::create_table_sql(entity), [])?;
        tracing::debug!("Created table {} for {}", entity.table_name, entity.class_name);
        Ok(())
    }

    pub fn drop_table(&self, entity: &EntityType) -> Result<()> {
        self.conn.execute(&schema::drop_table_sql(entity), [])?;
        tracing::debug!("Dropped table {}", entity.table_name);
        Ok(())
    }

    // ========== Row Operations ==========

    /// Insert an instance across every table of its lineage and return its id.
    ///
    /// `values` are attribute values already coerced by their column types.
    /// The discriminator column is filled with the class's identity unless
    /// given explicitly.
    pub fn insert(
        &self,
        catalog: &SchemaCatalog,
        class_name: &str,
        values: &BTreeMap<String, Value>,
    ) -> Result<i64> {
        let lineage = catalog.lineage(class_name)?;
        let known = catalog.attributes(class_name);
        if let Some(unknown) = values.keys().find(|k| !known.contains(&k.as_str())) {
            return Err(Error::UnknownAttribute {
                class: class_name.to_string(),
                attribute: unknown.clone(),
            });
        }

        let mut values = values.clone();
        if let (Some((_, on)), Some(identity)) = (
            catalog.discriminator(class_name),
            catalog.entity(class_name)?.polymorphic_identity(),
        ) {
            values
                .entry(on.to_string())
                .or_insert_with(|| Value::Text(identity.to_string()));
        }

        let mut id = values.get("id").and_then(Value::as_i64);
        for entity in lineage {
            let mut columns = Vec::new();
            let mut params = Vec::new();
            if let Some(id) = id {
                columns.push(quote_ident("id"));
                params.push(Value::Integer(id));
            }
            for column in &entity.columns {
                if let Some(value) = values.get(&column.name) {
                    columns.push(quote_ident(&column.name));
                    params.push(value.clone());
                }
            }

            let table = quote_ident(&entity.table_name);
            let sql = if columns.is_empty() {
                format!("INSERT INTO {} DEFAULT VALUES", table)
            } else {
                let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("?{}", i)).collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    table,
                    columns.join(", "),
                    placeholders.join(", ")
                )
            };
            self.conn.execute(&sql, params_from_iter(params.iter()))?;
            if id.is_none() {
                id = Some(self.conn.last_insert_rowid());
            }
        }

        id.ok_or_else(|| Error::UnknownClass(class_name.to_string()))
    }

    /// Point a relationship of a stored row at another row (or at nothing).
    pub fn set_foreign_key(
        &self,
        catalog: &SchemaCatalog,
        class_name: &str,
        id: i64,
        relationship: &str,
        target_id: Option<i64>,
    ) -> Result<()> {
        let (owner, rel) = catalog
            .find_relationship(class_name, relationship)
            .ok_or_else(|| Error::UnknownAttribute {
                class: class_name.to_string(),
                attribute: relationship.to_string(),
            })?;
        let sql = format!(
            "UPDATE {} SET {} = ?1 WHERE {} = ?2",
            quote_ident(&owner.table_name),
            quote_ident(&rel.fk_column),
            quote_ident("id")
        );
        let target = target_id.map(Value::Integer).unwrap_or(Value::Null);
        self.conn.execute(&sql, rusqlite::params![target, id])?;
        Ok(())
    }

    /// Rows of a class (and its subclasses) matching a filter, by id.
    pub fn query(&self, catalog: &SchemaCatalog, class_name: &str, filter: &Filter) -> Result<Vec<Row>> {
        let mut ctx = SqlContext::new();
        let aliases = ctx.aliases(catalog, class_name)?;
        let where_sql = ctx.render(catalog, class_name, &aliases, filter)?;

        let discriminator = catalog.discriminator(class_name).and_then(|(holder, on)| {
            aliases
                .alias_of(&holder.class_name)
                .map(|alias| format!("{}.{}", alias, quote_ident(on)))
        });

        let sql = format!(
            "SELECT {}.{}, {} FROM {} WHERE {} ORDER BY {}.{}",
            aliases.root_alias(),
            quote_ident("id"),
            discriminator.as_deref().unwrap_or("NULL"),
            aliases.from_clause(),
            where_sql,
            aliases.root_alias(),
            quote_ident("id")
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let hits = stmt
            .query_map(params_from_iter(ctx.params.iter()), |row| {
                let id: i64 = row.get(0)?;
                let identity = Value::from_sql(row.get_ref(1)?);
                Ok((id, identity))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut rows = Vec::with_capacity(hits.len());
        for (id, identity) in hits {
            let concrete = identity
                .as_str()
                .and_then(|identity| catalog.class_for_identity(class_name, identity))
                .filter(|e| catalog.is_subclass_of(&e.class_name, class_name))
                .map(|e| e.class_name.clone())
                .unwrap_or_else(|| class_name.to_string());
            if let Some(row) = self.fetch(catalog, &concrete, id)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Read one row through the lineage of exactly `class_name`.
    pub fn fetch(&self, catalog: &SchemaCatalog, class_name: &str, id: i64) -> Result<Option<Row>> {
        let mut ctx = SqlContext::new();
        let aliases = ctx.aliases(catalog, class_name)?;

        let mut selected = Vec::new();
        for (entity, alias) in &aliases.entries {
            for column in &entity.columns {
                selected.push((
                    format!("{}.{}", alias, quote_ident(&column.name)),
                    column.name.clone(),
                    column.field_type,
                ));
            }
        }

        let mut projection = vec![format!("{}.{}", aliases.root_alias(), quote_ident("id"))];
        projection.extend(selected.iter().map(|(expr, _, _)| expr.clone()));
        let sql = format!(
            "SELECT {} FROM {} WHERE {}.{} = ?1",
            projection.join(", "),
            aliases.from_clause(),
            aliases.root_alias(),
            quote_ident("id")
        );

        self.conn
            .query_row(&sql, [id], |row| {
                let mut values = BTreeMap::new();
                for (i, (_, name, field_type)) in selected.iter().enumerate() {
                    values.insert(name.clone(), field_type.decode(row.get_ref(i + 1)?));
                }
                Ok(Row {
                    class: class_name.to_string(),
                    id: row.get(0)?,
                    values,
                })
            })
            .optional()
            .map_err(Into::into)
    }

    /// Follow a relationship of a stored row.
    pub fn related(&self, catalog: &SchemaCatalog, row: &Row, relationship: &str) -> Result<Option<Row>> {
        let (_, rel) = catalog
            .find_relationship(&row.class, relationship)
            .ok_or_else(|| Error::UnknownAttribute {
                class: row.class.clone(),
                attribute: relationship.to_string(),
            })?;
        let Some(target_id) = row.values.get(&rel.fk_column).and_then(Value::as_i64) else {
            return Ok(None);
        };
        let mut found = self.query(catalog, &rel.target, &Filter::eq("id", target_id))?;
        Ok(found.pop())
    }

    /// Rows in a backref collection of a stored row.
    pub fn backref(&self, catalog: &SchemaCatalog, row: &Row, name: &str) -> Result<Vec<Row>> {
        let collection = catalog
            .backref_collection(&row.class, name)
            .ok_or_else(|| Error::UnknownAttribute {
                class: row.class.clone(),
                attribute: name.to_string(),
            })?;
        let filter = Filter::eq(collection.relationship.fk_column.clone(), row.id);
        self.query(catalog, &collection.source.class_name, &filter)
    }

    /// Count rows of a class, subclasses included
    pub fn count(&self, catalog: &SchemaCatalog, class_name: &str) -> Result<usize> {
        let mut ctx = SqlContext::new();
        let aliases = ctx.aliases(catalog, class_name)?;
        let sql = format!("SELECT COUNT(*) FROM {}", aliases.from_clause());
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ========== Bulk Operations ==========

    /// Begin a transaction for bulk operations
    pub fn begin_transaction(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN TRANSACTION")?;
        Ok(())
    }

    /// Commit a transaction
    pub fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    /// Rollback a transaction
    pub fn rollback(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Get row counts for every registered class whose table exists
    pub fn stats(&self, catalog: &SchemaCatalog) -> Result<DbStats> {
        let mut classes = Vec::new();
        for entity in catalog.entities() {
            if self.table_exists(&entity.table_name)? {
                classes.push((entity.class_name.clone(), self.count(catalog, &entity.class_name)?));
            }
        }
        Ok(DbStats { classes })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    /// (class, row count) in registration order
    pub classes: Vec<(String, usize)>,
}

impl DbStats {
    pub fn total_rows(&self) -> usize {
        self.classes.iter().map(|(_, n)| n).sum()
    }
}

impl std::fmt::Display for DbStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Database Statistics:")?;
        for (class, count) in &self.classes {
            writeln!(f, "  {}: {}", class, count)?;
        }
        Ok(())
    }
}
