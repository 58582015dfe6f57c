//! Extractors for the two content sources.
//!
//! - File: a single container file for one dataset (`entry` definitions)
//! - Database: relational resources spanning many datasets (`rdbms` definitions)
//! - Proxy: forwards entry requests to a peer site and polls for the report

pub mod database;
pub mod file;
pub mod proxy;
pub mod schema;

use crate::definitions::Condition;
use crate::types::TypedValue;
use std::cmp::Ordering;

/// Comparison operators accepted in file-sourced conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "eq" => Some(CompareOp::Eq),
            "gt" => Some(CompareOp::Gt),
            "ge" => Some(CompareOp::Ge),
            "lt" => Some(CompareOp::Lt),
            "le" => Some(CompareOp::Le),
            _ => None,
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
        }
    }
}

/// Evaluate `observed <op> condition.value` after casting both sides to the
/// condition's type. Unknown operators and failed casts never match.
pub fn compare_value(observed: &str, condition: &Condition) -> bool {
    let Some(op) = CompareOp::parse(&condition.operator) else {
        return false;
    };
    let lhs = TypedValue::cast(&serde_json::Value::String(observed.to_string()), condition.value_type);
    let rhs = TypedValue::cast(&condition.value, condition.value_type);

    match (lhs, rhs) {
        (Some(lhs), Some(rhs)) => lhs
            .partial_cmp(&rhs)
            .map_or(false, |ordering| op.accepts(ordering)),
        _ => false,
    }
}
