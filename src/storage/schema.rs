//! Database schema definitions generated from entity types

use crate::schema::{EntityType, PrimaryKey};

/// Quote an identifier for SQLite
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQL to create the table backing an entity type
pub fn create_table_sql(entity: &EntityType) -> String {
    let mut columns = Vec::with_capacity(entity.columns.len() + 1);

    columns.push(match entity.primary_key() {
        PrimaryKey::AutoIncrement => {
            format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote_ident("id"))
        }
        PrimaryKey::Inherited { parent_table } => format!(
            "{} INTEGER PRIMARY KEY REFERENCES {} ({})",
            quote_ident("id"),
            quote_ident(&parent_table),
            quote_ident("id")
        ),
    });

    for column in &entity.columns {
        let mut def = format!("{} {}", quote_ident(&column.name), column.field_type.sql_type());
        if let Some(table) = &column.references {
            def.push_str(&format!(
                " REFERENCES {} ({})",
                quote_ident(table),
                quote_ident("id")
            ));
        }
        columns.push(def);
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        quote_ident(&entity.table_name),
        columns.join(",\n    ")
    )
}

/// SQL to drop the table backing an entity type
pub fn drop_table_sql(entity: &EntityType) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(&entity.table_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Column, FieldType};

    #[test]
    fn test_create_root_table() {
        let mut entity = EntityType::new("Book", None);
        entity.add_attribute(Attribute::Column(Column::new(
            "title",
            FieldType::String { length: Some(80) },
        )));
        entity.add_attribute(Attribute::Column(Column::foreign_key("author_id", "author")));

        let sql = create_table_sql(&entity);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"book\""));
        assert!(sql.contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sql.contains("\"title\" VARCHAR(80)"));
        assert!(sql.contains("\"author_id\" INTEGER REFERENCES \"author\" (\"id\")"));
    }

    #[test]
    fn test_create_inherited_table() {
        let entity = EntityType::new("Shelf", Some("Collection".to_string()));
        let sql = create_table_sql(&entity);
        assert!(sql.contains("\"id\" INTEGER PRIMARY KEY REFERENCES \"collection\" (\"id\")"));
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident("order"), "\"order\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
