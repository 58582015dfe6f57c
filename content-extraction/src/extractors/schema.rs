//! Schema adapters for the relational resources content can be drawn from.
//!
//! Two families are served: the internal tracking schema, whose tables
//! mirror category names, and the workflow status schema with a fixed set
//! of tables. An adapter maps a category/attribute pair onto a validated
//! table and column identifier.

use crate::types::ExtractionError;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Databases served by the internal tracking schema
pub const DA_INTERNAL_DATABASES: &[&str] = &["da_internal", "da_internal_prod", "da_internal_combine"];

/// Database served by the workflow status schema
pub const STATUS_DATABASE: &str = "status";

/// Resources backed by one of the known schemas
pub const KNOWN_RESOURCES: &[&str] = &["DA_INTERNAL", "STATUS"];

/// Tables of the workflow status schema
pub const WORKFLOW_TABLES: &[&str] = &[
    "deposition",
    "dep_instance",
    "dep_last_instance",
    "communication",
    "wf_instance",
    "wf_instance_last",
    "wf_task",
    "wf_class_dict",
    "wf_reference",
    "process_information",
    "engine_monitoring",
    "remote_communication",
];

/// Reject anything that is not a plain SQL identifier
pub fn validate_identifier(name: &str) -> Result<&str, ExtractionError> {
    if IDENTIFIER.is_match(name) {
        Ok(name)
    } else {
        Err(ExtractionError::InvalidIdentifier(name.to_string()))
    }
}

/// Maps categories and attributes onto a concrete schema
pub trait SchemaDef: Send + Sync {
    /// Schema family name, for logging
    fn name(&self) -> &'static str;

    /// Database the adapter was selected for
    fn database(&self) -> &str;

    /// Table serving `category`
    fn table_for(&self, category: &str) -> Result<String, ExtractionError>;

    /// Column serving `attribute` of `category`
    fn column_for(&self, _category: &str, attribute: &str) -> Result<String, ExtractionError> {
        validate_identifier(attribute).map(str::to_string)
    }
}

/// Internal tracking schema: one table per category
#[derive(Debug, Clone)]
pub struct DaInternalSchema {
    database: String,
}

impl DaInternalSchema {
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
        }
    }
}

impl SchemaDef for DaInternalSchema {
    fn name(&self) -> &'static str {
        "da_internal"
    }

    fn database(&self) -> &str {
        &self.database
    }

    fn table_for(&self, category: &str) -> Result<String, ExtractionError> {
        validate_identifier(category).map(str::to_string)
    }
}

/// Workflow status schema
#[derive(Debug, Clone, Default)]
pub struct WorkflowSchema;

impl SchemaDef for WorkflowSchema {
    fn name(&self) -> &'static str {
        "workflow"
    }

    fn database(&self) -> &str {
        STATUS_DATABASE
    }

    fn table_for(&self, category: &str) -> Result<String, ExtractionError> {
        let category = validate_identifier(category)?;
        WORKFLOW_TABLES
            .iter()
            .find(|t| t.eq_ignore_ascii_case(category))
            .map(|t| t.to_string())
            .ok_or_else(|| {
                ExtractionError::InvalidIdentifier(format!(
                    "{} is not a workflow status table",
                    category
                ))
            })
    }
}

/// Pick the adapter for a `(resource, database)` pair
pub fn select_schema(resource: &str, database: &str) -> Result<Box<dyn SchemaDef>, ExtractionError> {
    let unknown = || ExtractionError::UnknownResource {
        resource: resource.to_string(),
        database: database.to_string(),
    };

    if !KNOWN_RESOURCES
        .iter()
        .any(|r| r.eq_ignore_ascii_case(resource))
    {
        return Err(unknown());
    }

    if DA_INTERNAL_DATABASES.contains(&database) {
        Ok(Box::new(DaInternalSchema::new(database)))
    } else if database == STATUS_DATABASE {
        Ok(Box::new(WorkflowSchema))
    } else {
        Err(unknown())
    }
}
