//! Entry content extraction from a single container file.

use super::compare_value;
use crate::cif::{Category, CifReader, DataContainer};
use crate::definitions::{Condition, ContentRegistry};
use crate::types::{ExtractionError, ExtractionResult, Record, SourceKind};
use indexmap::IndexMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Applies `entry` content definitions to container files
pub struct FileExtractor {
    registry: Arc<ContentRegistry>,
}

impl FileExtractor {
    pub fn new(registry: Arc<ContentRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ContentRegistry {
        &self.registry
    }

    /// Whether the registry holds a usable file-sourced definition for
    /// `content_type`
    pub fn is_known(&self, content_type: &str) -> bool {
        let definition = self.registry.get_definition(content_type);
        !definition.is_empty() && definition.kind == SourceKind::Entry
    }

    /// Extract the categories named by `content_type` from the file at
    /// `path`. Reader diagnostics are appended to `log_path`. Any failure
    /// yields an empty result.
    pub fn extract_content(
        &self,
        path: &Path,
        log_path: &Path,
        content_type: &str,
    ) -> ExtractionResult {
        let start = Instant::now();
        match self.try_extract(path, log_path, content_type) {
            Ok(result) => {
                let rows: usize = result.values().map(Vec::len).sum();
                info!(
                    "Extracted {} rows in {} categories for {} from {:?} in {:.2}s",
                    rows,
                    result.len(),
                    content_type,
                    path,
                    start.elapsed().as_secs_f64()
                );
                result
            }
            Err(e) => {
                error!(
                    "Extraction failed for {:?} content type {}: {} ({:.2}s)",
                    path,
                    content_type,
                    e,
                    start.elapsed().as_secs_f64()
                );
                ExtractionResult::new()
            }
        }
    }

    fn try_extract(
        &self,
        path: &Path,
        log_path: &Path,
        content_type: &str,
    ) -> Result<ExtractionResult, ExtractionError> {
        let mut result = ExtractionResult::new();

        let definition = self.registry.get_definition(content_type);
        if definition.is_empty() {
            warn!("No content definition for {}", content_type);
            return Ok(result);
        }

        let categories = definition.categories();
        debug!("Category list for {}: {:?}", content_type, categories);

        let containers = read_containers(path, log_path, &categories)?;

        for container in &containers {
            for (name, selection) in &definition.content {
                let Some(category) = container.category(name) else {
                    continue;
                };
                let rows = project_rows(category, selection, definition.conditions_for(name));
                debug!(
                    "Block {}: {} of {} {} rows selected",
                    container.name,
                    rows.len(),
                    category.row_count(),
                    name
                );
                result.entry(name.clone()).or_default().extend(rows);
            }
        }

        Ok(result)
    }
}

fn read_containers(
    path: &Path,
    log_path: &Path,
    categories: &[String],
) -> Result<Vec<DataContainer>, ExtractionError> {
    let start = Instant::now();
    let outcome = CifReader::new().select(categories).read_path(path);

    match outcome {
        Ok(doc) => {
            append_parser_log(log_path, path, &doc.diagnostics);
            info!(
                "Read {} data blocks from {:?} in {:.2}s",
                doc.containers.len(),
                path,
                start.elapsed().as_secs_f64()
            );
            Ok(doc.containers)
        }
        Err(e) => {
            append_parser_log(log_path, path, &[e.to_string()]);
            Err(e.into())
        }
    }
}

fn append_parser_log(log_path: &Path, path: &Path, lines: &[String]) {
    if lines.is_empty() {
        return;
    }

    let written = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .and_then(|mut log| {
            writeln!(
                log,
                "{} {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                path.display()
            )?;
            for line in lines {
                writeln!(log, "  {}", line)?;
            }
            Ok(())
        });

    if let Err(e) = written {
        warn!("Unable to write parser log {:?}: {}", log_path, e);
    }
}

/// Keep rows passing every condition, projected onto `selection` in order.
/// A conditioned attribute absent from the row fails its condition.
fn project_rows(
    category: &Category,
    selection: &[String],
    conditions: Option<&IndexMap<String, Condition>>,
) -> Vec<Record> {
    let selected: Vec<(&str, Option<usize>)> = selection
        .iter()
        .map(|attr| (attr.as_str(), category.attribute_index(attr)))
        .collect();

    let checks: Vec<(Option<usize>, &Condition)> = conditions
        .map(|conds| {
            conds
                .iter()
                .map(|(attr, cond)| (category.attribute_index(attr), cond))
                .collect()
        })
        .unwrap_or_default();

    category
        .rows
        .iter()
        .filter(|row| {
            checks.iter().all(|(idx, cond)| {
                idx.and_then(|i| row.get(i))
                    .map_or(false, |value| compare_value(value, cond))
            })
        })
        .map(|row| {
            let mut record = Record::new();
            for (name, idx) in &selected {
                if let Some(value) = idx.and_then(|i| row.get(i)) {
                    record.insert(name.to_string(), serde_json::Value::String(value.clone()));
                }
            }
            record
        })
        .collect()
}
