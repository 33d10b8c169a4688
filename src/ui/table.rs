use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

/// Row count of one class, subclasses included
#[derive(Debug, Clone, Tabled, serde::Serialize)]
pub struct ClassRow {
    #[tabled(rename = "Class")]
    pub class: String,
    #[tabled(rename = "Table")]
    pub table: String,
    #[tabled(rename = "Rows")]
    pub rows: usize,
}

#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

pub fn stats_table(stats: &[(&str, &str)]) -> String {
    let mut builder = TableBuilder::new();
    for (label, value) in stats {
        builder.add_row(label, value);
    }
    builder.build()
}

pub fn class_table(rows: &[ClassRow]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    Table::new(rows).with(Style::rounded()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tables_render_nothing() {
        assert!(TableBuilder::new().build().is_empty());
        assert!(class_table(&[]).is_empty());
    }

    #[test]
    fn test_class_table_lists_rows() {
        let table = class_table(&[ClassRow {
            class: "Author".to_string(),
            table: "author".to_string(),
            rows: 2,
        }]);
        assert!(table.contains("Class"));
        assert!(table.contains("Author"));
        assert!(table.contains('2'));

        let stats = stats_table(&[("Classes", "3")]);
        assert!(stats.contains("Metric"));
        assert!(stats.contains("Classes"));
    }
}
