//! Post-extraction policy filtering.
//!
//! Rules are keyed by a glob pattern over the content type. Every rule whose
//! pattern matches is applied in registration order. Each rule is a pure
//! function of the extracted result.

use crate::types::{ExtractionResult, Record};
use serde_json::Value;
use tracing::debug;

/// Content types served to the small-angle scattering partner repository
pub const SASBDB_PATTERN: &str = "*sasbdb*";

/// A policy rule body
pub type PolicyFn = fn(ExtractionResult) -> ExtractionResult;

/// A rule applied to content types matching `pattern`
pub struct PolicyRule {
    pattern: glob::Pattern,
    name: String,
    apply: PolicyFn,
}

impl PolicyRule {
    pub fn new(pattern: &str, name: &str, apply: PolicyFn) -> Result<Self, glob::PatternError> {
        Ok(Self {
            pattern: glob::Pattern::new(pattern)?,
            name: name.to_string(),
            apply,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matches(&self, content_type: &str) -> bool {
        self.pattern.matches(content_type)
    }
}

/// Ordered set of content-type keyed policy rules
pub struct PolicyFilter {
    rules: Vec<PolicyRule>,
}

impl PolicyFilter {
    /// Filter with the built-in rules
    pub fn new() -> Self {
        let mut filter = Self::empty();
        if let Ok(rule) = PolicyRule::new(SASBDB_PATTERN, "sasbdb", sasbdb_policy) {
            filter.rules.push(rule);
        }
        filter
    }

    /// Filter with no rules
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Names of rules that apply to `content_type`
    pub fn rules_for(&self, content_type: &str) -> Vec<&str> {
        self.rules
            .iter()
            .filter(|r| r.matches(content_type))
            .map(PolicyRule::name)
            .collect()
    }

    /// Apply every matching rule. An empty result passes through untouched.
    pub fn filter_content(&self, content_type: &str, result: ExtractionResult) -> ExtractionResult {
        if result.is_empty() {
            return result;
        }

        let mut result = result;
        for rule in self.rules.iter().filter(|r| r.matches(content_type)) {
            let before = result.len();
            result = (rule.apply)(result);
            debug!(
                "Policy {} on {}: {} -> {} categories",
                rule.name,
                content_type,
                before,
                result.len()
            );
        }
        result
    }
}

impl Default for PolicyFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn first_flag_set(result: &ExtractionResult, category: &str, attribute: &str) -> bool {
    result
        .get(category)
        .and_then(|rows| rows.first())
        .and_then(|row| row.get(attribute))
        .and_then(Value::as_str)
        .map_or(false, |v| v.trim().eq_ignore_ascii_case("y"))
}

/// Title/author suppression, then eligibility. Only entries explicitly
/// flagged as having scattering data are released at all.
///
/// Both flags count as set for `Y` in any case and with surrounding
/// whitespace (`y`, ` Y `), not only the exact value `Y`.
pub fn sasbdb_policy(mut result: ExtractionResult) -> ExtractionResult {
    if first_flag_set(&result, "pdbx_database_status", "title_suppression") {
        debug!("Suppressing title and authors");
        result.insert("audit_author".to_string(), vec![Record::new()]);
        result.insert("pdbx_contact_author".to_string(), vec![Record::new()]);
        if let Some(first) = result.get_mut("struct").and_then(|rows| rows.first_mut()) {
            first.insert("title".to_string(), Value::String(String::new()));
        }
    }

    if !first_flag_set(&result, "pdbx_depui_status_flags", "has_sas_data") {
        debug!("No scattering data flag, releasing nothing");
        return ExtractionResult::new();
    }

    result
}
