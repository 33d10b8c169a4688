//! SQL export - render a models document as a schema script
//!
//! Runs the same class and field builders as the live loader against a
//! private catalog, then writes the DDL the store would execute. Running the
//! script against an empty database produces the same tables `load_models`
//! creates.

use crate::document::Source;
use crate::loader::Options;
use crate::schema::builder::{resolve_pending_backrefs, BackrefTable};
use crate::schema::{EntityType, SchemaCatalog};
use crate::storage::schema::create_table_sql;
use crate::Result;
use std::io::Write;

const PREAMBLE: &str = "-- Generated by seedbed\nPRAGMA foreign_keys = OFF;\nBEGIN;\n";
const CLOSING: &str = "COMMIT;\n";

pub struct Exporter {
    options: Options,
}

impl Default for Exporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Exporter {
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        Self { options }
    }

    /// Build every class of a models document without touching any store.
    pub fn build(&self, source: impl Into<Source>) -> Result<SchemaCatalog> {
        let document = source.into().into_document(self.options.document_loader.as_ref())?;
        let mut catalog = SchemaCatalog::new();
        let mut backrefs = BackrefTable::new();
        let mut built = Vec::new();

        for entry in document.entries() {
            let Some(definition) = &entry.definition else { continue };
            let entity = self.options.class_builder.build_class(
                &entry.header,
                definition,
                &catalog,
                self.options.field_builder.as_ref(),
                &mut backrefs,
            )?;
            built.push(entity.class_name.clone());
            catalog.register(entity);
        }
        resolve_pending_backrefs(&mut catalog, &backrefs, &built);
        Ok(catalog)
    }

    /// Write the schema script for a models document.
    /// Returns the exported classes in order.
    pub fn export_to_sql<W: Write>(&self, source: impl Into<Source>, out: &mut W) -> Result<Vec<String>> {
        let catalog = self.build(source)?;
        out.write_all(PREAMBLE.as_bytes())?;
        for entity in catalog.entities() {
            out.write_all(b"\n")?;
            out.write_all(render_entity(entity).as_bytes())?;
        }
        out.write_all(b"\n")?;
        out.write_all(CLOSING.as_bytes())?;

        let classes: Vec<String> = catalog.class_names().map(str::to_string).collect();
        tracing::info!("Exported {} classes", classes.len());
        Ok(classes)
    }

    /// Like [`Exporter::export_to_sql`], into a string
    pub fn render(&self, source: impl Into<Source>) -> Result<String> {
        let mut buf = Vec::new();
        self.export_to_sql(source, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Annotated `CREATE TABLE` statement for one class
fn render_entity(entity: &EntityType) -> String {
    let mut out = format!("-- {}", entity.class_name);
    if let Some(parent) = &entity.parent {
        out.push_str(&format!(" (inherits {})", parent));
    }
    out.push('\n');

    if let Some(poly) = &entity.polymorphic {
        out.push_str(&format!("--   polymorphic identity '{}'", poly.identity));
        if let Some(on) = &poly.on {
            out.push_str(&format!(" on {}", on));
        }
        for (key, value) in &poly.options {
            out.push_str(&format!(", {} = {}", key, value));
        }
        out.push('\n');
    }

    for rel in &entity.relationships {
        out.push_str(&format!(
            "--   relationship {} -> {} via {}",
            rel.name, rel.target, rel.fk_column
        ));
        if let Some(backref) = &rel.backref {
            out.push_str(&format!(" (backref {})", backref));
        }
        out.push('\n');
    }

    out.push_str(&create_table_sql(entity));
    out.push_str(";\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::{Error, Loader, SqliteStore};

    const MODELS: &str = r#"
Collection:
  definition:
    name: String|40
    kind: String|20
    polymorphic:
      on: kind
Shelf|Collection:
  definition:
    levels: Integer
    items: Backref|Item
Item:
  definition:
    label: Text
    home: relationship|Shelf
"#;

    #[test]
    fn test_render_has_preamble_and_annotations() {
        let sql = Exporter::new()
            .render(Document::from_yaml_str(MODELS).unwrap())
            .unwrap();
        assert!(sql.starts_with(PREAMBLE));
        assert!(sql.trim_end().ends_with("COMMIT;"));
        assert!(sql.contains("-- Shelf (inherits Collection)"));
        assert!(sql.contains("--   polymorphic identity 'collection' on kind"));
        assert!(sql.contains("--   relationship home -> Shelf via home_id (backref items)"));
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS \"item\""));
    }

    #[test]
    fn test_export_matches_live_schema() {
        let doc = Document::from_yaml_str(MODELS).unwrap();
        let exported = SqliteStore::open_in_memory().unwrap();
        exported
            .execute_batch(&Exporter::new().render(&doc).unwrap())
            .unwrap();

        let live = SqliteStore::open_in_memory().unwrap();
        Loader::new(&live).load_models(&doc).unwrap();

        let schema = |store: &SqliteStore| -> Vec<(String, String)> {
            let mut stmt = store
                .connection()
                .prepare("SELECT name, sql FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .unwrap()
                .collect::<std::result::Result<Vec<_>, _>>()
                .unwrap()
        };
        assert_eq!(schema(&exported), schema(&live));
        assert_eq!(schema(&live).len(), 3);
    }

    #[test]
    fn test_export_fails_on_unknown_type() {
        let doc = Document::from_yaml_str("Thing:\n  definition:\n    size: Huge\n").unwrap();
        let err = Exporter::new().render(doc).unwrap_err();
        assert!(matches!(err, Error::UnresolvedFieldType { .. }));
    }
}
