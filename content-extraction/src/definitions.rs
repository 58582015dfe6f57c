//! Content type definitions and their backing registry.
//!
//! A definition names the categories and attributes to extract for a
//! content type, optional per-attribute filter conditions and, for
//! database sourced content, the resource serving each category. The
//! registry is read lazily once and only rewritten through
//! [`ContentRegistry::write_definitions`], which holds a named
//! cross-process lock and backs up the previous file.

use crate::config::DefinitionsConfig;
use crate::lock::NamedLock;
use crate::types::{SourceKind, ValueType};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Lock name guarding writes to the definition file
pub const DEFINITIONS_LOCK_NAME: &str = "wscontenttypedef.exceptionfile-lock";

/// Content type -> definition
pub type Definitions = IndexMap<String, ContentDefinition>;

#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed definition file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Content type {content_type:?}: {section} category {category:?} is not listed in content")]
    UnknownCategory {
        content_type: String,
        section: &'static str,
        category: String,
    },
    #[error("Failed to persist definition file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Filter condition on one attribute: `(value, type, operator)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "(serde_json::Value, ValueType, String)",
    into = "(serde_json::Value, ValueType, String)"
)]
pub struct Condition {
    pub value: serde_json::Value,
    pub value_type: ValueType,
    /// `eq`/`gt`/`ge`/`lt`/`le` for file content, a SQL keyword for rdbms
    pub operator: String,
}

impl Condition {
    pub fn new(value: impl Into<serde_json::Value>, value_type: ValueType, operator: &str) -> Self {
        Self {
            value: value.into(),
            value_type,
            operator: operator.to_string(),
        }
    }
}

impl From<(serde_json::Value, ValueType, String)> for Condition {
    fn from((value, value_type, operator): (serde_json::Value, ValueType, String)) -> Self {
        Self {
            value,
            value_type,
            operator,
        }
    }
}

impl From<Condition> for (serde_json::Value, ValueType, String) {
    fn from(c: Condition) -> Self {
        (c.value, c.value_type, c.operator)
    }
}

/// Relational resource serving a category: `(resource, database)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct ResourceRef {
    pub resource: String,
    pub database: String,
}

impl ResourceRef {
    pub fn new(resource: &str, database: &str) -> Self {
        Self {
            resource: resource.to_string(),
            database: database.to_string(),
        }
    }
}

impl From<(String, String)> for ResourceRef {
    fn from((resource, database): (String, String)) -> Self {
        Self { resource, database }
    }
}

impl From<ResourceRef> for (String, String) {
    fn from(r: ResourceRef) -> Self {
        (r.resource, r.database)
    }
}

/// Declarative extraction definition for one content type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentDefinition {
    /// Category -> attributes to extract, in output order
    #[serde(default)]
    pub content: IndexMap<String, Vec<String>>,

    /// Category -> attribute -> condition
    #[serde(default)]
    pub conditions: IndexMap<String, IndexMap<String, Condition>>,

    /// Category -> serving resource (rdbms only)
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub resource: IndexMap<String, ResourceRef>,

    #[serde(rename = "type", default)]
    pub kind: SourceKind,
}

impl ContentDefinition {
    /// An empty definition is treated as undefined
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Categories to extract, in definition order
    pub fn categories(&self) -> Vec<String> {
        self.content.keys().cloned().collect()
    }

    /// Conditions for a category (empty when none are configured)
    pub fn conditions_for(&self, category: &str) -> Option<&IndexMap<String, Condition>> {
        self.conditions.get(category)
    }

    /// Every category named in `conditions` or `resource` must be in `content`
    pub fn validate(&self, content_type: &str) -> Result<(), DefinitionError> {
        for category in self.conditions.keys() {
            if !self.content.contains_key(category) {
                return Err(DefinitionError::UnknownCategory {
                    content_type: content_type.to_string(),
                    section: "conditions",
                    category: category.clone(),
                });
            }
        }
        for category in self.resource.keys() {
            if !self.content.contains_key(category) {
                return Err(DefinitionError::UnknownCategory {
                    content_type: content_type.to_string(),
                    section: "resource",
                    category: category.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Read the definition file. Definitions violating the category invariant
/// are dropped with a warning.
pub fn read_definitions(path: &Path) -> Result<Definitions, DefinitionError> {
    let contents = std::fs::read_to_string(path)?;
    let definitions: Definitions = serde_json::from_str(&contents)?;

    Ok(definitions
        .into_iter()
        .filter(|(content_type, def)| match def.validate(content_type) {
            Ok(()) => true,
            Err(e) => {
                warn!("Skipping invalid content definition: {}", e);
                false
            }
        })
        .collect())
}

/// Read a definition file that must be valid as a whole. The first
/// definition violating the category invariant fails the read.
pub fn read_definitions_strict(path: &Path) -> Result<Definitions, DefinitionError> {
    let contents = std::fs::read_to_string(path)?;
    let definitions: Definitions = serde_json::from_str(&contents)?;
    for (content_type, def) in &definitions {
        def.validate(content_type)?;
    }
    Ok(definitions)
}

/// Serialize definitions with stable four-space indentation
pub fn to_pretty_json(definitions: &Definitions) -> Result<Vec<u8>, DefinitionError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    definitions.serialize(&mut ser)?;
    buf.push(b'\n');
    Ok(buf)
}

/// Lazily loaded, explicitly owned registry of content definitions
#[derive(Debug)]
pub struct ContentRegistry {
    path: PathBuf,
    lock_dir: PathBuf,
    cache: RwLock<Option<Arc<Definitions>>>,
}

impl ContentRegistry {
    pub fn new(path: impl Into<PathBuf>, lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_dir: lock_dir.into(),
            cache: RwLock::new(None),
        }
    }

    pub fn from_config(config: &DefinitionsConfig) -> Self {
        Self::new(config.path.clone(), config.lock_dir.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current definitions, loading the backing file on first use.
    /// An unreadable or malformed file yields no definitions.
    pub fn definitions(&self) -> Arc<Definitions> {
        if let Ok(guard) = self.cache.read() {
            if let Some(defs) = guard.as_ref() {
                return Arc::clone(defs);
            }
        }

        let loaded = Arc::new(self.load());
        match self.cache.write() {
            Ok(mut guard) => {
                // Another thread may have loaded first
                if let Some(defs) = guard.as_ref() {
                    return Arc::clone(defs);
                }
                *guard = Some(Arc::clone(&loaded));
            }
            Err(e) => warn!("Definition cache poisoned: {}", e),
        }
        loaded
    }

    fn load(&self) -> Definitions {
        match read_definitions(&self.path) {
            Ok(defs) => {
                info!(
                    "Loaded {} content definitions from {:?}",
                    defs.len(),
                    self.path
                );
                defs
            }
            Err(e) => {
                error!("Failed reading content definitions {:?}: {}", self.path, e);
                Definitions::new()
            }
        }
    }

    /// Drop the cached copy so the next lookup re-reads the file
    pub fn reload(&self) {
        if let Ok(mut guard) = self.cache.write() {
            *guard = None;
        }
    }

    /// Definition for a content type, or an empty definition when unknown.
    /// Lookup is exact and case-sensitive.
    pub fn get_definition(&self, content_type: &str) -> ContentDefinition {
        if content_type.is_empty() {
            return ContentDefinition::default();
        }
        self.definitions()
            .get(content_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Every defined content type
    pub fn content_types(&self) -> BTreeSet<String> {
        self.definitions().keys().cloned().collect()
    }

    pub fn contains(&self, content_type: &str) -> bool {
        self.definitions().contains_key(content_type)
    }

    /// Replace the whole registry. With `backup`, the prior file is copied
    /// to `<path>-%Y-%m-%d-%H-%M-%S` first. Returns false on any failure.
    pub fn write_definitions(&self, definitions: &Definitions, backup: bool) -> bool {
        match self.try_write(definitions, backup) {
            Ok(()) => {
                info!(
                    "Wrote {} content definitions to {:?}",
                    definitions.len(),
                    self.path
                );
                if let Ok(mut guard) = self.cache.write() {
                    *guard = Some(Arc::new(definitions.clone()));
                }
                true
            }
            Err(e) => {
                error!("Failed writing content definitions {:?}: {}", self.path, e);
                false
            }
        }
    }

    /// Replace the registry with the definitions in `source`. Nothing is
    /// written unless every definition in the file is valid.
    pub fn import_definitions(&self, source: &Path, backup: bool) -> Result<usize, DefinitionError> {
        let definitions = read_definitions_strict(source)?;
        self.try_write(&definitions, backup)?;
        info!(
            "Imported {} content definitions from {:?} into {:?}",
            definitions.len(),
            source,
            self.path
        );
        let count = definitions.len();
        if let Ok(mut guard) = self.cache.write() {
            *guard = Some(Arc::new(definitions));
        }
        Ok(count)
    }

    fn try_write(&self, definitions: &Definitions, backup: bool) -> Result<(), DefinitionError> {
        for (content_type, def) in definitions {
            def.validate(content_type)?;
        }
        let body = to_pretty_json(definitions)?;

        let _lock = NamedLock::acquire(&self.lock_dir, DEFINITIONS_LOCK_NAME)?;

        if backup && self.path.exists() {
            let backup_path = backup_path_for(&self.path, chrono::Local::now());
            std::fs::copy(&self.path, &backup_path)?;
            debug!("Backed up content definitions to {:?}", backup_path);
        }

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&body)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;
        Ok(())
    }
}

/// Backup file name for a write performed at `now`
pub fn backup_path_for(path: &Path, now: chrono::DateTime<chrono::Local>) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(now.format("-%Y-%m-%d-%H-%M-%S").to_string());
    PathBuf::from(name)
}
