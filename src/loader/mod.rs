//! Loader - the full pipeline from document to committed rows
//!
//! `load` runs every stage in order: build classes, create their tables,
//! reconcile against stored rows, create instances, link relationships and
//! commit. `load_models` and `load_instances` run each half on its own, and
//! a [`Session`] can be carried across several `load_instances` calls before
//! one commit.

pub mod instances;
pub mod reconcile;
pub mod refs;
pub mod scope;
pub mod session;

pub use instances::{DefaultInstanceLoader, InstanceLoader, LoadContext, RecordGroup};
pub use refs::{KeyDescriptor, RefKey, DEFAULT_SEPARATOR};
pub use scope::Scope;
pub use session::{CommitStats, Instance, InstanceId, Session};

use crate::config::SeedbedConfig;
use crate::document::{Document, DocumentLoader, FileLoader, Source};
use crate::schema::builder::{resolve_pending_backrefs, BackrefTable};
use crate::schema::{ClassBuilder, DefaultClassBuilder, DefaultFieldBuilder, FieldBuilder, SchemaCatalog};
use crate::storage::{Filter, Row, SqliteStore};
use crate::{Error, Result};
use std::collections::HashMap;

/// Knobs and strategies of a loader; each strategy can be swapped alone.
pub struct Options {
    pub separator: String,
    /// Default for the auto-load fallback of `load`
    pub auto_load: bool,
    pub document_loader: Box<dyn DocumentLoader>,
    pub class_builder: Box<dyn ClassBuilder>,
    pub field_builder: Box<dyn FieldBuilder>,
    pub instance_loader: Box<dyn InstanceLoader>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            auto_load: false,
            document_loader: Box::new(FileLoader),
            class_builder: Box::new(DefaultClassBuilder),
            field_builder: Box::new(DefaultFieldBuilder),
            instance_loader: Box::new(DefaultInstanceLoader),
        }
    }
}

impl Options {
    /// Defaults, overridden by whatever the config file sets
    pub fn from_config(config: &SeedbedConfig) -> Self {
        let mut options = Self::default();
        if let Some(separator) = &config.separator {
            options.separator = separator.clone();
        }
        if let Some(auto_load) = config.auto_load {
            options.auto_load = auto_load;
        }
        options
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn with_auto_load(mut self, auto_load: bool) -> Self {
        self.auto_load = auto_load;
        self
    }

    pub fn with_document_loader(mut self, loader: impl DocumentLoader + 'static) -> Self {
        self.document_loader = Box::new(loader);
        self
    }

    pub fn with_class_builder(mut self, builder: impl ClassBuilder + 'static) -> Self {
        self.class_builder = Box::new(builder);
        self
    }

    pub fn with_field_builder(mut self, builder: impl FieldBuilder + 'static) -> Self {
        self.field_builder = Box::new(builder);
        self
    }

    pub fn with_instance_loader(mut self, loader: impl InstanceLoader + 'static) -> Self {
        self.instance_loader = Box::new(loader);
        self
    }
}

/// Outcome of a full `load`
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct LoadReport {
    /// Classes built from the document, in document order
    pub classes: Vec<String>,
    /// Instances held by the session, reconciled ones included
    pub instances: usize,
    pub stats: CommitStats,
}

/// Builds classes and loads instances into one store.
pub struct Loader<'s> {
    store: &'s SqliteStore,
    catalog: SchemaCatalog,
    options: Options,
    /// Classes built inside the active scope, if any
    scoped: Option<Vec<String>>,
}

impl<'s> Loader<'s> {
    pub fn new(store: &'s SqliteStore) -> Self {
        Self::with_options(store, Options::default())
    }

    pub fn with_options(store: &'s SqliteStore, options: Options) -> Self {
        Self {
            store,
            catalog: SchemaCatalog::new(),
            options,
            scoped: None,
        }
    }

    pub fn store(&self) -> &'s SqliteStore {
        self.store
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Start a scope; classes built until it exits are torn down with it.
    pub fn scoped(&mut self) -> Scope<'_, 's> {
        Scope::enter(self)
    }

    fn document(&self, source: Source) -> Result<Document> {
        source.into_document(self.options.document_loader.as_ref())
    }

    // ========== Pipeline ==========

    /// Build the schema, then load and commit the instances.
    pub fn load(&mut self, source: impl Into<Source>) -> Result<LoadReport> {
        let document = self.document(source.into())?;
        let classes = self.build_models(&document)?;
        let mut session = self.build_instances(&document, self.options.auto_load, None)?;
        let stats = self.commit(&mut session)?;

        tracing::info!(
            "Loaded {} classes and {} instances",
            classes.len(),
            session.len()
        );
        Ok(LoadReport {
            classes,
            instances: session.len(),
            stats,
        })
    }

    /// Build and register every class with a `definition`, then create
    /// their tables. Returns the classes built, in document order.
    ///
    /// A failure leaves the classes built before it registered.
    pub fn load_models(&mut self, source: impl Into<Source>) -> Result<Vec<String>> {
        let document = self.document(source.into())?;
        self.build_models(&document)
    }

    /// Create instances for every record group and link them, without
    /// touching the store beyond reads. Pass an earlier session to merge
    /// several documents before one commit.
    pub fn load_instances(
        &self,
        source: impl Into<Source>,
        auto_load: bool,
        session: Option<Session>,
    ) -> Result<Session> {
        let document = self.document(source.into())?;
        self.build_instances(&document, auto_load, session)
    }

    /// Write a session to the store in one transaction.
    pub fn commit(&self, session: &mut Session) -> Result<CommitStats> {
        session.commit(self.store, &self.catalog)
    }

    fn build_models(&mut self, document: &Document) -> Result<Vec<String>> {
        let mut backrefs = BackrefTable::new();
        let mut built = Vec::new();

        for entry in document.entries() {
            let Some(definition) = &entry.definition else { continue };
            let entity = self.options.class_builder.build_class(
                &entry.header,
                definition,
                &self.catalog,
                self.options.field_builder.as_ref(),
                &mut backrefs,
            )?;
            let class_name = entity.class_name.clone();
            self.catalog.register(entity);

            if let Some(scoped) = &mut self.scoped {
                if !scoped.contains(&class_name) {
                    scoped.push(class_name.clone());
                }
            }
            built.push(class_name);
        }

        let attached = resolve_pending_backrefs(&mut self.catalog, &backrefs, &built);
        if attached > 0 {
            tracing::debug!("Attached {} backrefs declared after their relationship", attached);
        }
        self.create_models(&built)?;
        tracing::info!("Built {} classes", built.len());
        Ok(built)
    }

    fn build_instances(&self, document: &Document, auto_load: bool, session: Option<Session>) -> Result<Session> {
        let mut key_descriptors = HashMap::new();
        for entry in document.entries() {
            let class_name = &entry.header.class_name;
            let raw = match &entry.key {
                Some(raw) => raw,
                None if entry.records.is_empty() => continue,
                None => {
                    return Err(Error::MalformedDocument(format!(
                        "{} has instances but no ref",
                        class_name
                    )))
                }
            };
            self.catalog.entity(class_name)?;
            key_descriptors.insert(class_name.clone(), KeyDescriptor::parse(raw, &self.options.separator));
        }

        let groups: Vec<RecordGroup<'_>> = document
            .entries()
            .iter()
            .filter_map(|entry| {
                key_descriptors.get(&entry.header.class_name).map(|key| RecordGroup {
                    class_name: &entry.header.class_name,
                    key,
                    records: &entry.records,
                })
            })
            .collect();

        let ctx = LoadContext {
            store: self.store,
            catalog: &self.catalog,
            key_descriptors: &key_descriptors,
            separator: &self.options.separator,
            auto_load,
        };
        let mut session = session.unwrap_or_default();
        let loader = self.options.instance_loader.as_ref();

        let reconciled = reconcile::pre_load_existing(&ctx, &groups, &mut session)?;
        for group in &groups {
            loader.load_instance(&ctx, group, &mut session)?;
        }
        for group in &groups {
            loader.link_relations(&ctx, group, &mut session)?;
        }

        tracing::info!(
            "Prepared {} instances ({} reconciled, {} new)",
            session.len(),
            reconciled,
            session.pending_count()
        );
        Ok(session)
    }

    // ========== Schema Lifecycle ==========

    /// Create tables for registered classes, skipping existing ones.
    pub fn create_models(&self, classes: &[String]) -> Result<()> {
        for class_name in classes {
            self.store.create_table(self.catalog.entity(class_name)?)?;
        }
        Ok(())
    }

    /// Drop tables in reverse order and unregister the classes.
    ///
    /// Every class is attempted; the first failure is returned.
    pub fn drop_models(&mut self, classes: &[String]) -> Result<()> {
        let mut first_error = None;
        for class_name in classes.iter().rev() {
            if let Some(entity) = self.catalog.get(class_name) {
                if let Err(e) = self.store.drop_table(entity) {
                    tracing::warn!("Failed to drop table for {}: {}", class_name, e);
                    first_error.get_or_insert(e);
                }
            }
            self.catalog.unregister(class_name);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ========== Reads ==========

    pub fn query(&self, class_name: &str, filter: &Filter) -> Result<Vec<Row>> {
        self.store.query(&self.catalog, class_name, filter)
    }

    /// Every stored row of a class, subclasses included
    pub fn all(&self, class_name: &str) -> Result<Vec<Row>> {
        self.query(class_name, &Filter::all())
    }

    pub fn count(&self, class_name: &str) -> Result<usize> {
        self.store.count(&self.catalog, class_name)
    }

    pub fn backref(&self, row: &Row, name: &str) -> Result<Vec<Row>> {
        self.store.backref(&self.catalog, row, name)
    }

    pub fn related(&self, row: &Row, relationship: &str) -> Result<Option<Row>> {
        self.store.related(&self.catalog, row, relationship)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    const GARAGE: &str = r#"
Owner:
  definition:
    name: String|40
    cars: Backref|Car
  ref: name
  instances:
    - name: Lin
Car:
  definition:
    plate: String|10
    seats: Integer
    owner: relationship|Owner
  ref: plate
  instances:
    - plate: AB-12
      seats: "4"
      owner: Lin
"#;

    fn document(text: &str) -> Document {
        Document::from_yaml_str(text).unwrap()
    }

    #[test]
    fn test_load_instances_does_not_write() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut loader = Loader::new(&store);
        let doc = document(GARAGE);
        loader.load_models(&doc).unwrap();

        let session = loader.load_instances(&doc, false, None).unwrap();
        assert_eq!(session.len(), 2);
        assert_eq!(session.pending_count(), 2);
        assert_eq!(loader.count("Car").unwrap(), 0);

        let car = session.lookup(&RefKey::parse("Car", "AB-12", ",")).unwrap();
        assert_eq!(car.get("seats"), Some(&Value::Integer(4)));
        let owner = session.get(&RefKey::parse("Owner", "Lin", ",")).unwrap();
        assert_eq!(car.link("owner"), Some(owner));
    }

    #[test]
    fn test_sessions_merge_across_documents() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut loader = Loader::new(&store);
        loader.load_models(document(GARAGE)).unwrap();

        let owners = document("Owner:\n  ref: name\n  instances:\n    - name: Sam\n");
        let cars = document("Car:\n  ref: plate\n  instances:\n    - plate: ZZ-9\n      owner: Sam\n");
        let session = loader.load_instances(owners, false, None).unwrap();
        let mut session = loader.load_instances(cars, false, Some(session)).unwrap();
        loader.commit(&mut session).unwrap();

        let car = loader.query("Car", &Filter::eq("plate", "ZZ-9")).unwrap().pop().unwrap();
        let owner = loader.related(&car, "owner").unwrap().unwrap();
        assert_eq!(owner.get_str("name"), Some("Sam"));
    }

    #[test]
    fn test_instances_without_ref_are_malformed() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut loader = Loader::new(&store);
        loader.load_models(document(GARAGE)).unwrap();
        let err = loader
            .load_instances(document("Owner:\n  instances:\n    - name: Sam\n"), false, None)
            .unwrap_err();
        assert!(matches!(err, Error::MalformedDocument(_)));
    }

    #[test]
    fn test_unknown_class_in_instances() {
        let store = SqliteStore::open_in_memory().unwrap();
        let loader = Loader::new(&store);
        let err = loader
            .load_instances(document("Ghost:\n  ref: name\n  instances:\n    - name: Boo\n"), false, None)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownClass(_)));
    }

    #[test]
    fn test_missing_backref_fails_at_link_time() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut loader = Loader::new(&store);
        let doc = document(
            r#"
Owner:
  definition:
    name: Text
  ref: name
  instances:
    - name: Lin
Car:
  definition:
    plate: Text
    owner: relationship|Owner
  ref: plate
  instances:
    - plate: AB-12
      owner: Lin
"#,
        );
        // Building succeeds; only linking needs the backref
        loader.load_models(&doc).unwrap();
        let err = loader.load_instances(&doc, false, None).unwrap_err();
        assert!(matches!(err, Error::MissingBackref { ref field, .. } if field == "owner"));
    }

    #[test]
    fn test_custom_separator() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut loader = Loader::with_options(&store, Options::default().with_separator(";"));
        let report = loader
            .load(document(
                r#"
Room:
  definition:
    building: Text
    number: Integer
    doors: Backref|Door
  ref: building;number
  instances:
    - building: North, East wing
      number: 1
Door:
  definition:
    label: Text
    room: relationship|Room
  ref: label
  instances:
    - label: D1
      room: North, East wing; 1
"#,
            ))
            .unwrap();
        assert_eq!(report.stats, CommitStats { inserted: 2, linked: 1 });
    }

    #[test]
    fn test_options_from_config() {
        let config = SeedbedConfig {
            database: None,
            separator: Some("/".to_string()),
            auto_load: Some(true),
        };
        let options = Options::from_config(&config);
        assert_eq!(options.separator, "/");
        assert!(options.auto_load);

        let defaults = Options::from_config(&SeedbedConfig::default());
        assert_eq!(defaults.separator, DEFAULT_SEPARATOR);
        assert!(!defaults.auto_load);
    }

    #[test]
    fn test_scope_tears_down_on_drop() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut loader = Loader::new(&store);
        loader
            .load_models(document("Keeper:\n  definition:\n    name: Text\n"))
            .unwrap();
        {
            let mut scope = loader.scoped();
            scope.load(document(GARAGE)).unwrap();
            assert_eq!(scope.scoped_classes(), ["Owner", "Car"]);
            assert!(store.table_exists("car").unwrap());
        }
        assert!(!store.table_exists("car").unwrap());
        assert!(!store.table_exists("owner").unwrap());
        assert!(store.table_exists("keeper").unwrap());
        assert!(!loader.catalog().contains("Car"));
        assert!(loader.catalog().contains("Keeper"));
    }
}
