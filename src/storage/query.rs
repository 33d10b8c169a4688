//! Query filters and their SQL rendering
//!
//! Queries always run over a class's whole lineage: the root table joined
//! with every ancestor table down to the class itself, each under its own
//! alias. A `Has` filter opens a correlated `EXISTS` over the target's
//! lineage, so nested matches through relationships work at any depth.

use super::schema::quote_ident;
use crate::schema::{EntityType, SchemaCatalog};
use crate::value::Value;
use crate::{Error, Result};

/// A condition on the rows of one class.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Attribute equals a value (coerced by the column's type)
    Eq { attribute: String, value: Value },
    /// The related row reached through a relationship matches every filter
    Has {
        relationship: String,
        filters: Vec<Filter>,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn has(relationship: impl Into<String>, filters: Vec<Filter>) -> Self {
        Filter::Has {
            relationship: relationship.into(),
            filters,
        }
    }

    /// Matches every row
    pub fn all() -> Self {
        Filter::And(Vec::new())
    }
}

/// Aliases of one lineage, root first.
#[derive(Debug, Clone)]
pub(crate) struct LineageAliases<'c> {
    pub entries: Vec<(&'c EntityType, String)>,
}

impl<'c> LineageAliases<'c> {
    pub fn root_alias(&self) -> &str {
        &self.entries[0].1
    }

    pub fn alias_of(&self, class_name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(e, _)| e.class_name == class_name)
            .map(|(_, a)| a.as_str())
    }

    /// `"root" AS t0 JOIN "child" AS t1 ON t1."id" = t0."id" ...`
    pub fn from_clause(&self) -> String {
        let root = self.root_alias();
        let mut sql = String::new();
        for (i, (entity, alias)) in self.entries.iter().enumerate() {
            if i == 0 {
                sql.push_str(&format!("{} AS {}", quote_ident(&entity.table_name), alias));
            } else {
                sql.push_str(&format!(
                    " JOIN {} AS {} ON {}.{} = {}.{}",
                    quote_ident(&entity.table_name),
                    alias,
                    alias,
                    quote_ident("id"),
                    root,
                    quote_ident("id")
                ));
            }
        }
        sql
    }
}

/// Accumulates bound parameters and hands out unique table aliases.
#[derive(Debug, Default)]
pub(crate) struct SqlContext {
    pub params: Vec<Value>,
    next_alias: usize,
}

impl SqlContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn aliases<'c>(
        &mut self,
        catalog: &'c SchemaCatalog,
        class_name: &str,
    ) -> Result<LineageAliases<'c>> {
        let lineage = catalog.lineage(class_name)?;
        let entries = lineage
            .into_iter()
            .map(|entity| {
                let alias = format!("t{}", self.next_alias);
                self.next_alias += 1;
                (entity, alias)
            })
            .collect();
        Ok(LineageAliases { entries })
    }

    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        format!("?{}", self.params.len())
    }

    /// Render a filter against the lineage of `class_name`.
    pub fn render(
        &mut self,
        catalog: &SchemaCatalog,
        class_name: &str,
        aliases: &LineageAliases<'_>,
        filter: &Filter,
    ) -> Result<String> {
        match filter {
            Filter::Eq { attribute, value } => {
                let (alias, coerced) = if attribute == "id" {
                    let id = crate::schema::FieldType::Integer.coerce(attribute, value.clone())?;
                    (aliases.root_alias().to_string(), id)
                } else {
                    let (owner, column) = catalog.find_column(class_name, attribute).ok_or_else(|| {
                        Error::UnknownAttribute {
                            class: class_name.to_string(),
                            attribute: attribute.clone(),
                        }
                    })?;
                    let alias = aliases.alias_of(&owner.class_name).unwrap_or(aliases.root_alias());
                    (alias.to_string(), column.field_type.coerce(attribute, value.clone())?)
                };

                let column = format!("{}.{}", alias, quote_ident(attribute));
                if coerced.is_null() {
                    Ok(format!("{} IS NULL", column))
                } else {
                    let placeholder = self.bind(coerced);
                    Ok(format!("{} = {}", column, placeholder))
                }
            }
            Filter::Has {
                relationship,
                filters,
            } => {
                let (owner, rel) = catalog
                    .find_relationship(class_name, relationship)
                    .ok_or_else(|| Error::UnknownAttribute {
                        class: class_name.to_string(),
                        attribute: relationship.clone(),
                    })?;
                let owner_alias = aliases
                    .alias_of(&owner.class_name)
                    .unwrap_or(aliases.root_alias())
                    .to_string();
                let target = rel.target.clone();
                let fk = rel.fk_column.clone();

                let nested = self.aliases(catalog, &target)?;
                let mut conditions = vec![format!(
                    "{}.{} = {}.{}",
                    nested.root_alias(),
                    quote_ident("id"),
                    owner_alias,
                    quote_ident(&fk)
                )];
                for inner in filters {
                    conditions.push(format!("({})", self.render(catalog, &target, &nested, inner)?));
                }
                Ok(format!(
                    "EXISTS (SELECT 1 FROM {} WHERE {})",
                    nested.from_clause(),
                    conditions.join(" AND ")
                ))
            }
            Filter::And(filters) => self.render_joined(catalog, class_name, aliases, filters, " AND ", "1 = 1"),
            Filter::Or(filters) => self.render_joined(catalog, class_name, aliases, filters, " OR ", "0 = 1"),
        }
    }

    fn render_joined(
        &mut self,
        catalog: &SchemaCatalog,
        class_name: &str,
        aliases: &LineageAliases<'_>,
        filters: &[Filter],
        joiner: &str,
        empty: &str,
    ) -> Result<String> {
        if filters.is_empty() {
            return Ok(empty.to_string());
        }
        let parts = filters
            .iter()
            .map(|f| self.render(catalog, class_name, aliases, f).map(|sql| format!("({})", sql)))
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join(joiner))
    }
}
