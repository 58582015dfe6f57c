//! Summary content extraction from relational resources.
//!
//! Each category of an `rdbms` definition becomes one projection query
//! against the resource named in the definition. A connection is opened
//! per category query and closed once its rows are read.

use super::schema::{select_schema, SchemaDef};
use crate::config::Config;
use crate::definitions::{Condition, ContentDefinition, ContentRegistry};
use crate::types::{ExtractionError, ExtractionResult, Record, SourceKind, TypedValue};
use indexmap::IndexMap;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OpenFlags};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Opens connections to named resources at a site
pub trait ResourceConnector: Send + Sync {
    fn connect(&self, site_id: &str, resource: &str) -> Result<Connection, ExtractionError>;
}

/// Connector for SQLite resource files listed under `[databases]`
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    config: Config,
}

impl SqliteConnector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ResourceConnector for SqliteConnector {
    fn connect(&self, site_id: &str, resource: &str) -> Result<Connection, ExtractionError> {
        let settings = self.config.resource(site_id, resource).ok_or_else(|| {
            ExtractionError::UnconfiguredResource {
                site: site_id.to_string(),
                resource: resource.to_string(),
            }
        })?;

        let conn = Connection::open_with_flags(
            &settings.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        debug!("Opened {} at {:?}", resource, settings.path);
        Ok(conn)
    }
}

/// SQL comparison operators accepted in database-sourced conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
    NotLike,
}

impl SqlOp {
    pub fn parse(tag: &str) -> Option<Self> {
        let normalized = tag
            .split(|c: char| c.is_whitespace() || c == '_')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase();
        match normalized.as_str() {
            "EQ" => Some(SqlOp::Eq),
            "NE" => Some(SqlOp::Ne),
            "GT" => Some(SqlOp::Gt),
            "GE" => Some(SqlOp::Ge),
            "LT" => Some(SqlOp::Lt),
            "LE" => Some(SqlOp::Le),
            "LIKE" => Some(SqlOp::Like),
            "NOT LIKE" => Some(SqlOp::NotLike),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SqlOp::Eq => "=",
            SqlOp::Ne => "!=",
            SqlOp::Gt => ">",
            SqlOp::Ge => ">=",
            SqlOp::Lt => "<",
            SqlOp::Le => "<=",
            SqlOp::Like => "LIKE",
            SqlOp::NotLike => "NOT LIKE",
        }
    }
}

/// A generated statement and its bound parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Build the projection query for one category. Conditions become ANDed
/// predicates with their values bound as typed parameters.
pub fn build_query(
    schema: &dyn SchemaDef,
    category: &str,
    selection: &[String],
    conditions: Option<&IndexMap<String, Condition>>,
) -> Result<SqlQuery, ExtractionError> {
    if selection.is_empty() {
        return Err(ExtractionError::InvalidIdentifier(format!(
            "no attributes selected for {}",
            category
        )));
    }

    let table = schema.table_for(category)?;
    let columns = selection
        .iter()
        .map(|attr| schema.column_for(category, attr).map(|c| format!("{}.{}", table, c)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut sql = format!("SELECT {} FROM {}", columns.join(", "), table);
    let mut params = Vec::new();
    let mut predicates = Vec::new();

    for (attr, cond) in conditions.into_iter().flatten() {
        let column = schema.column_for(category, attr)?;
        let op = SqlOp::parse(&cond.operator).ok_or_else(|| {
            ExtractionError::InvalidCondition(format!(
                "unsupported operator {:?} on {}.{}",
                cond.operator, category, attr
            ))
        })?;
        let value = TypedValue::cast(&cond.value, cond.value_type).ok_or_else(|| {
            ExtractionError::InvalidCondition(format!(
                "{} is not a valid {} for {}.{}",
                cond.value,
                cond.value_type.as_str(),
                category,
                attr
            ))
        })?;

        params.push(match value {
            TypedValue::Text(s) => SqlValue::Text(s),
            TypedValue::Int(i) => SqlValue::Integer(i),
            TypedValue::Real(f) => SqlValue::Real(f),
        });
        predicates.push(format!("{}.{} {} ?{}", table, column, op.as_sql(), params.len()));
    }

    if !predicates.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&predicates.join(" AND "));
    }

    Ok(SqlQuery { sql, params })
}

/// Applies `rdbms` content definitions to relational resources
pub struct DatabaseExtractor {
    registry: Arc<ContentRegistry>,
    site_id: String,
    connector: Arc<dyn ResourceConnector>,
}

impl DatabaseExtractor {
    pub fn new(
        registry: Arc<ContentRegistry>,
        site_id: &str,
        connector: Arc<dyn ResourceConnector>,
    ) -> Self {
        Self {
            registry,
            site_id: site_id.to_string(),
            connector,
        }
    }

    /// Same registry and connector, resources resolved at another site
    pub fn for_site(&self, site_id: &str) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            site_id: site_id.to_string(),
            connector: Arc::clone(&self.connector),
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    /// Only `rdbms` definitions are served from relational resources
    pub fn is_known(&self, content_type: &str) -> bool {
        let definition = self.registry.get_definition(content_type);
        !definition.is_empty() && definition.kind == SourceKind::Rdbms
    }

    /// Run every category query of `content_type`. A failing category is
    /// logged and left empty; the rest still run.
    pub fn extract_content(&self, content_type: &str) -> ExtractionResult {
        let mut result = ExtractionResult::new();
        let start = Instant::now();

        let definition = self.registry.get_definition(content_type);
        if definition.is_empty() {
            error!("Undefined or empty content definition {}", content_type);
            return result;
        }

        for category in definition.content.keys() {
            let rows = match self.extract_category(&definition, category) {
                Ok(rows) => rows,
                Err(e) => {
                    error!(
                        "Category {} of {} failed at site {}: {}",
                        category, content_type, self.site_id, e
                    );
                    Vec::new()
                }
            };
            result.insert(category.clone(), rows);
        }

        info!(
            "Extracted {} categories for {} at site {} in {:.2}s",
            result.len(),
            content_type,
            self.site_id,
            start.elapsed().as_secs_f64()
        );
        result
    }

    fn extract_category(
        &self,
        definition: &ContentDefinition,
        category: &str,
    ) -> Result<Vec<Record>, ExtractionError> {
        let resource = definition.resource.get(category).ok_or_else(|| {
            ExtractionError::UnknownResource {
                resource: format!("(none for {})", category),
                database: String::new(),
            }
        })?;
        let schema = select_schema(&resource.resource, &resource.database)?;
        debug!(
            "Category {} served by {} ({} schema, database {})",
            category,
            resource.resource,
            schema.name(),
            schema.database()
        );

        let selection = definition
            .content
            .get(category)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let query = build_query(
            schema.as_ref(),
            category,
            selection,
            definition.conditions_for(category),
        )?;
        debug!("SQL: {} {:?}", query.sql, query.params);

        self.run_query(&resource.resource, &query, selection)
    }

    fn run_query(
        &self,
        resource: &str,
        query: &SqlQuery,
        selection: &[String],
    ) -> Result<Vec<Record>, ExtractionError> {
        let start = Instant::now();
        let conn = self.connector.connect(&self.site_id, resource)?;

        let records = {
            let mut stmt = conn.prepare(&query.sql)?;
            let decl_types: Vec<Option<String>> = stmt
                .columns()
                .iter()
                .map(|c| c.decl_type().map(str::to_string))
                .collect();

            let rows = stmt.query_map(rusqlite::params_from_iter(query.params.iter()), |row| {
                let mut record = Record::new();
                for (i, name) in selection.iter().enumerate() {
                    let decl = decl_types.get(i).and_then(|d| d.as_deref());
                    record.insert(name.clone(), to_json(row.get_ref(i)?, decl));
                }
                Ok(record)
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        if let Err((_, e)) = conn.close() {
            warn!("Failed closing connection to {}: {}", resource, e);
        }

        debug!(
            "{} rows from {} in {:.2}s",
            records.len(),
            resource,
            start.elapsed().as_secs_f64()
        );
        Ok(records)
    }
}

fn to_json(value: ValueRef<'_>, decl_type: Option<&str>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            let text = match decl_type {
                Some(decl) if is_temporal(decl) => normalize_temporal(&text),
                _ => text.into_owned(),
            };
            serde_json::Value::String(text)
        }
        ValueRef::Blob(bytes) => serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

fn is_temporal(decl_type: &str) -> bool {
    let upper = decl_type.to_ascii_uppercase();
    upper.contains("DATE") || upper.contains("TIME")
}

/// Render stored date/time text as ISO-8601; unrecognized text is kept
pub fn normalize_temporal(text: &str) -> String {
    use chrono::{NaiveDate, NaiveDateTime};

    let trimmed = text.trim();
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string();
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return d.format("%Y-%m-%d").to_string();
    }
    text.to_string()
}
