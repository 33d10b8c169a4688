//! Input documents
//!
//! A document is an ordered mapping of class headers to blocks:
//!
//! ```yaml
//! Book:
//!   definition:
//!     title: String|80
//!     author: relationship|Author
//!   ref: title
//!   instances:
//!     - title: X
//!       author: Ada
//! ```
//!
//! Order matters (parents must be defined before children), so parsing goes
//! through `serde_yaml::Mapping`, which keeps insertion order.

use crate::{Error, Result};
use serde_yaml::{Mapping, Value as Yaml};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File extensions the default loader accepts
pub const SUPPORTED_EXTENSIONS: &[&str] = &["yaml", "yml"];

/// `ClassName` or `ClassName|ParentName`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassHeader {
    pub class_name: String,
    pub inherits_name: Option<String>,
}

impl ClassHeader {
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('|') {
            Some((class_name, parent)) => Self {
                class_name: class_name.trim().to_string(),
                inherits_name: Some(parent.trim().to_string()),
            },
            None => Self {
                class_name: raw.trim().to_string(),
                inherits_name: None,
            },
        }
    }
}

/// The `definition` block of a class: ordered field descriptors plus the
/// optional `polymorphic` options.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Definition {
    pub fields: Vec<(String, String)>,
    pub polymorphic: Option<BTreeMap<String, String>>,
}

/// One seed record, fields in document order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Vec<(String, Yaml)>,
}

impl Record {
    pub fn new(fields: Vec<(String, Yaml)>) -> Self {
        Self { fields }
    }

    pub fn get(&self, name: &str) -> Option<&Yaml> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Yaml)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// One top-level block of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub header: ClassHeader,
    pub definition: Option<Definition>,
    /// Key descriptor: separator-joined field names
    pub key: Option<String>,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    pub entries: Vec<Entry>,
}

impl Document {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let raw: Yaml = serde_yaml::from_str(text)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &Yaml) -> Result<Self> {
        let mapping = match raw {
            Yaml::Null => return Ok(Self::default()),
            Yaml::Mapping(m) => m,
            _ => return Err(malformed("top level must be a mapping of classes")),
        };

        let mut entries = Vec::with_capacity(mapping.len());
        for (header, block) in mapping {
            let header = ClassHeader::parse(scalar_key(header, "class header")?.as_str());
            entries.push(parse_entry(header, block)?);
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry(&self, class_name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.header.class_name == class_name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_entry(header: ClassHeader, block: &Yaml) -> Result<Entry> {
    let empty = Mapping::new();
    let block = match block {
        Yaml::Mapping(m) => m,
        Yaml::Null => &empty,
        _ => {
            return Err(malformed(&format!(
                "block for {} must be a mapping",
                header.class_name
            )))
        }
    };

    let definition = match block.get("definition") {
        None => None,
        Some(raw) => Some(parse_definition(&header.class_name, raw)?),
    };

    let key = match block.get("ref") {
        None | Some(Yaml::Null) => None,
        Some(Yaml::String(s)) => Some(s.clone()),
        Some(_) => {
            return Err(malformed(&format!(
                "ref of {} must be a string of field names",
                header.class_name
            )))
        }
    };

    let records = match block.get("instances") {
        None | Some(Yaml::Null) => Vec::new(),
        Some(Yaml::Sequence(items)) => items
            .iter()
            .map(|item| parse_record(&header.class_name, item))
            .collect::<Result<Vec<_>>>()?,
        Some(_) => {
            return Err(malformed(&format!(
                "instances of {} must be a list",
                header.class_name
            )))
        }
    };

    Ok(Entry {
        header,
        definition,
        key,
        records,
    })
}

fn parse_definition(class_name: &str, raw: &Yaml) -> Result<Definition> {
    let mut definition = Definition::default();
    let mapping = match raw {
        Yaml::Null => return Ok(definition),
        Yaml::Mapping(m) => m,
        _ => {
            return Err(malformed(&format!(
                "definition of {} must be a mapping",
                class_name
            )))
        }
    };

    for (name, descriptor) in mapping {
        let name = scalar_key(name, "field name")?;
        match (name.as_str(), descriptor) {
            ("polymorphic", Yaml::Mapping(options)) => {
                let mut parsed = BTreeMap::new();
                for (k, v) in options {
                    parsed.insert(scalar_key(k, "polymorphic option")?, scalar_key(v, "polymorphic value")?);
                }
                definition.polymorphic = Some(parsed);
            }
            (_, Yaml::String(descriptor)) => definition.fields.push((name, descriptor.clone())),
            _ => {
                return Err(malformed(&format!(
                    "descriptor of {}.{} must be a string",
                    class_name, name
                )))
            }
        }
    }
    Ok(definition)
}

fn parse_record(class_name: &str, raw: &Yaml) -> Result<Record> {
    let Yaml::Mapping(mapping) = raw else {
        return Err(malformed(&format!(
            "every {} instance must be a mapping",
            class_name
        )));
    };
    let fields = mapping
        .iter()
        .map(|(k, v)| Ok((scalar_key(k, "instance field")?, v.clone())))
        .collect::<Result<Vec<_>>>()?;
    Ok(Record::new(fields))
}

fn scalar_key(raw: &Yaml, what: &str) -> Result<String> {
    match raw {
        Yaml::String(s) => Ok(s.clone()),
        Yaml::Number(n) => Ok(n.to_string()),
        Yaml::Bool(b) => Ok(b.to_string()),
        _ => Err(malformed(&format!("{} must be a scalar", what))),
    }
}

fn malformed(message: &str) -> Error {
    Error::MalformedDocument(message.to_string())
}

/// Strategy for turning a path into a document.
pub trait DocumentLoader {
    fn load(&self, path: &Path) -> Result<Document>;
}

/// Reads YAML files from disk, rejecting unknown extensions.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader;

impl DocumentLoader for FileLoader {
    fn load(&self, path: &Path) -> Result<Document> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !SUPPORTED_EXTENSIONS.contains(&ext) {
            return Err(Error::UnsupportedSourceFormat(format!(
                "{} is not a supported file type",
                if ext.is_empty() { path.display().to_string() } else { format!(".{}", ext) }
            )));
        }
        let contents = std::fs::read_to_string(path)?;
        Document::from_yaml_str(&contents)
    }
}

/// Where a document comes from: a file, or one parsed already.
#[derive(Debug, Clone)]
pub enum Source {
    Path(PathBuf),
    Document(Document),
}

impl Source {
    /// Resolve to a document, reading files through the given loader.
    pub fn into_document(self, loader: &dyn DocumentLoader) -> Result<Document> {
        match self {
            Source::Path(path) => loader.load(&path),
            Source::Document(document) => Ok(document),
        }
    }
}

impl From<&Path> for Source {
    fn from(path: &Path) -> Self {
        Source::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for Source {
    fn from(path: PathBuf) -> Self {
        Source::Path(path)
    }
}

impl From<&str> for Source {
    fn from(path: &str) -> Self {
        Source::Path(PathBuf::from(path))
    }
}

impl From<Document> for Source {
    fn from(document: Document) -> Self {
        Source::Document(document)
    }
}

impl From<&Document> for Source {
    fn from(document: &Document) -> Self {
        Source::Document(document.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIBRARY: &str = r#"
Author:
  definition:
    name: String|50
    books: Backref|Book
  ref: name
  instances:
    - name: Ada
    - name: Grace
Book:
  definition:
    title: String|80
    author: relationship|Author
  ref: title
  instances:
    - title: X
      author: Ada
"#;

    #[test]
    fn test_parse_preserves_order() {
        let doc = Document::from_yaml_str(LIBRARY).unwrap();
        let names: Vec<_> = doc.entries().iter().map(|e| e.header.class_name.as_str()).collect();
        assert_eq!(names, vec!["Author", "Book"]);

        let author = doc.entry("Author").unwrap();
        let fields: Vec<_> = author
            .definition
            .as_ref()
            .unwrap()
            .fields
            .iter()
            .map(|(k, _)| k.as_str())
            .collect();
        assert_eq!(fields, vec!["name", "books"]);
        assert_eq!(author.key.as_deref(), Some("name"));
        assert_eq!(author.records.len(), 2);
    }

    #[test]
    fn test_class_header_with_parent() {
        let header = ClassHeader::parse("Shelf|Collection");
        assert_eq!(header.class_name, "Shelf");
        assert_eq!(header.inherits_name.as_deref(), Some("Collection"));
    }

    #[test]
    fn test_polymorphic_block() {
        let doc = Document::from_yaml_str(
            "Collection:\n  definition:\n    kind: String\n    polymorphic: {on: kind, identity: x}\n",
        )
        .unwrap();
        let def = doc.entries()[0].definition.as_ref().unwrap();
        assert_eq!(def.fields.len(), 1);
        let poly = def.polymorphic.as_ref().unwrap();
        assert_eq!(poly.get("on").map(String::as_str), Some("kind"));
    }

    #[test]
    fn test_malformed_documents() {
        assert!(matches!(
            Document::from_yaml_str("- a\n- b\n"),
            Err(Error::MalformedDocument(_))
        ));
        assert!(matches!(
            Document::from_yaml_str("Book:\n  instances: [1, 2]\n"),
            Err(Error::MalformedDocument(_))
        ));
        assert!(matches!(
            Document::from_yaml_str("Book:\n  definition:\n    title: [a]\n"),
            Err(Error::MalformedDocument(_))
        ));
    }

    #[test]
    fn test_file_loader_rejects_extension() {
        let err = FileLoader.load(Path::new("seed.csv")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedSourceFormat(_)));
    }

    #[test]
    fn test_file_loader_reads_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.yaml");
        std::fs::write(&path, LIBRARY).unwrap();

        let doc = Source::from(path.as_path()).into_document(&FileLoader).unwrap();
        assert_eq!(doc.entries().len(), 2);
    }
}
