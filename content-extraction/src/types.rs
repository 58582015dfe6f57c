//! Core types used throughout content extraction.
//!
//! This module defines the extraction result shape, the comparison value
//! types used by definition conditions, and the shared extraction error.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Content type prefix for entry-level (file sourced) reports
pub const ENTRY_REPORT_PREFIX: &str = "report-entry-";

/// Content type prefix for summary-level (database sourced) reports
pub const SUMMARY_REPORT_PREFIX: &str = "report-summary-";

/// One extracted row: attribute name -> value, in selection order
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Category name -> ordered rows
pub type ExtractionResult = IndexMap<String, Vec<Record>>;

/// Value type tag carried by a definition condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[serde(alias = "string", alias = "CHAR", alias = "STRING")]
    Char,
    #[serde(alias = "INT")]
    Int,
    #[serde(alias = "FLOAT")]
    Float,
    #[serde(alias = "DOUBLE")]
    Double,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Char => "char",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Double => "double",
        }
    }
}

/// Where a content definition draws its data from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A single structured data file for one dataset
    #[default]
    Entry,
    /// Relational resources spanning many datasets
    Rdbms,
}

/// Typed scalar produced by casting a raw value according to a [`ValueType`]
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub enum TypedValue {
    Text(String),
    Int(i64),
    Real(f64),
}

impl TypedValue {
    /// Cast a raw value to the given type. Returns `None` when the value
    /// cannot be represented (e.g. `"abc"` as `int`).
    pub fn cast(raw: &serde_json::Value, value_type: ValueType) -> Option<Self> {
        let text = match raw {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => return None,
            other => other.to_string(),
        };

        match value_type {
            ValueType::Char => Some(TypedValue::Text(text)),
            ValueType::Int => text.trim().parse::<i64>().ok().map(TypedValue::Int),
            ValueType::Float | ValueType::Double => text
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(TypedValue::Real),
        }
    }
}

/// Errors that can occur during extraction
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Container parse error: {0}")]
    Parse(#[from] crate::cif::CifError),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Undefined resource {resource:?} database {database:?}")]
    UnknownResource { resource: String, database: String },

    #[error("No connection configured for resource {resource:?} at site {site:?}")]
    UnconfiguredResource { site: String, resource: String },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Remote service error: {0}")]
    Remote(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_type_aliases() {
        let t: ValueType = serde_json::from_str("\"string\"").unwrap();
        assert_eq!(t, ValueType::Char);
        let t: ValueType = serde_json::from_str("\"double\"").unwrap();
        assert_eq!(t, ValueType::Double);
        assert_eq!(serde_json::to_string(&ValueType::Int).unwrap(), "\"int\"");
    }

    #[test]
    fn test_cast_numbers() {
        assert_eq!(
            TypedValue::cast(&json!("42"), ValueType::Int),
            Some(TypedValue::Int(42))
        );
        assert_eq!(
            TypedValue::cast(&json!(42), ValueType::Int),
            Some(TypedValue::Int(42))
        );
        assert_eq!(
            TypedValue::cast(&json!("1.5"), ValueType::Float),
            Some(TypedValue::Real(1.5))
        );
        assert_eq!(TypedValue::cast(&json!("?"), ValueType::Int), None);
        assert_eq!(TypedValue::cast(&json!("abc"), ValueType::Double), None);
    }

    #[test]
    fn test_cast_char_keeps_text() {
        assert_eq!(
            TypedValue::cast(&json!(1), ValueType::Char),
            Some(TypedValue::Text("1".to_string()))
        );
    }

    #[test]
    fn test_source_kind_default() {
        assert_eq!(SourceKind::default(), SourceKind::Entry);
        let k: SourceKind = serde_json::from_str("\"rdbms\"").unwrap();
        assert_eq!(k, SourceKind::Rdbms);
    }
}
