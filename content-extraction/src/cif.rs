//! Reader for PDBx/mmCIF style container files.
//!
//! A file holds one or more `data_` blocks. Each block holds categories,
//! written either as key/value items (`_struct.title 'Some title'`) or as
//! `loop_` tables. Values may be bare words, single or double quoted
//! strings, or semicolon-delimited text fields spanning several lines.
//!
//! The reader can be restricted to a set of categories; everything else is
//! tokenized and discarded. Recoverable problems (a loop whose value count
//! is not a multiple of its column count, reserved words) are collected as
//! diagnostics rather than failing the parse.

use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CifError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
}

impl CifError {
    fn syntax(line: usize, message: impl Into<String>) -> Self {
        CifError::Syntax {
            line,
            message: message.into(),
        }
    }
}

/// A category table: column names plus rows of raw values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Category {
    pub name: String,
    pub attributes: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Category {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Column index for an attribute. Tags are case-insensitive.
    pub fn attribute_index(&self, attribute: &str) -> Option<usize> {
        self.attributes
            .iter()
            .position(|a| a == attribute)
            .or_else(|| {
                self.attributes
                    .iter()
                    .position(|a| a.eq_ignore_ascii_case(attribute))
            })
    }

    /// Value at `row` for `attribute`
    pub fn value(&self, row: usize, attribute: &str) -> Option<&str> {
        let idx = self.attribute_index(attribute)?;
        self.rows.get(row)?.get(idx).map(String::as_str)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn set_item(&mut self, attribute: &str, value: String) {
        if self.rows.is_empty() {
            self.rows.push(Vec::new());
        }
        match self.attribute_index(attribute) {
            Some(idx) => {
                for row in self.rows.iter_mut() {
                    if row.len() <= idx {
                        row.resize(idx + 1, "?".to_string());
                    }
                }
                self.rows[0][idx] = value;
            }
            None => {
                self.attributes.push(attribute.to_string());
                self.rows[0].push(value);
            }
        }
    }
}

/// One `data_` block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataContainer {
    pub name: String,
    pub categories: IndexMap<String, Category>,
}

impl DataContainer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            categories: IndexMap::new(),
        }
    }

    /// Look up a category, falling back to a case-insensitive match
    pub fn category(&self, name: &str) -> Option<&Category> {
        self.categories.get(name).or_else(|| {
            self.categories
                .values()
                .find(|c| c.name.eq_ignore_ascii_case(name))
        })
    }

    pub fn category_names(&self) -> Vec<&str> {
        self.categories.keys().map(String::as_str).collect()
    }

    fn category_mut(&mut self, name: &str) -> &mut Category {
        let key = self
            .categories
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()
            .unwrap_or_else(|| name.to_string());
        self.categories
            .entry(key)
            .or_insert_with(|| Category::new(name))
    }
}

/// Result of reading a file
#[derive(Debug, Default)]
pub struct CifDocument {
    pub containers: Vec<DataContainer>,
    pub diagnostics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    DataBlock(String),
    Loop,
    Reserved(String),
    Tag(String),
    Value(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    line: usize,
}

/// Container file reader, optionally restricted to selected categories
#[derive(Debug, Clone, Default)]
pub struct CifReader {
    select: Option<HashSet<String>>,
}

impl CifReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only the named categories
    pub fn select<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.select = Some(
            categories
                .into_iter()
                .map(|c| c.as_ref().to_ascii_lowercase())
                .collect(),
        );
        self
    }

    fn wants(&self, category: &str) -> bool {
        match &self.select {
            Some(set) => set.contains(&category.to_ascii_lowercase()),
            None => true,
        }
    }

    pub fn read_path(&self, path: &Path) -> Result<CifDocument, CifError> {
        let text = std::fs::read_to_string(path)?;
        self.read_str(&text)
    }

    pub fn read_str(&self, text: &str) -> Result<CifDocument, CifError> {
        let tokens = tokenize(text)?;
        self.parse(&tokens)
    }

    fn parse(&self, tokens: &[Token]) -> Result<CifDocument, CifError> {
        let mut doc = CifDocument::default();
        let mut i = 0;

        while i < tokens.len() {
            let token = &tokens[i];
            match &token.kind {
                TokenKind::DataBlock(name) => {
                    doc.containers.push(DataContainer::new(name));
                    i += 1;
                }
                TokenKind::Reserved(word) => {
                    doc.diagnostics
                        .push(format!("line {}: ignoring reserved word {}", token.line, word));
                    i += 1;
                }
                TokenKind::Value(value) => {
                    return Err(CifError::syntax(
                        token.line,
                        format!("unexpected value {:?} outside an item or loop", value),
                    ));
                }
                TokenKind::Tag(tag) => {
                    let container = doc.containers.last_mut().ok_or_else(|| {
                        CifError::syntax(token.line, "item before first data block")
                    })?;
                    let (category, attribute) = split_tag(tag, token.line)?;
                    let value = match tokens.get(i + 1) {
                        Some(Token {
                            kind: TokenKind::Value(v),
                            ..
                        }) => v.clone(),
                        _ => {
                            return Err(CifError::syntax(
                                token.line,
                                format!("missing value for {}", tag),
                            ))
                        }
                    };
                    if self.wants(category) {
                        container.category_mut(category).set_item(attribute, value);
                    }
                    i += 2;
                }
                TokenKind::Loop => {
                    let loop_line = token.line;
                    let container = doc.containers.last_mut().ok_or_else(|| {
                        CifError::syntax(loop_line, "loop_ before first data block")
                    })?;
                    i += 1;

                    let mut columns: Vec<(&str, &str)> = Vec::new();
                    while let Some(Token {
                        kind: TokenKind::Tag(tag),
                        line,
                    }) = tokens.get(i)
                    {
                        columns.push(split_tag(tag, *line)?);
                        i += 1;
                    }
                    let Some(&(category, _)) = columns.first() else {
                        return Err(CifError::syntax(loop_line, "loop_ without tags"));
                    };
                    if let Some((other, _)) = columns
                        .iter()
                        .find(|(c, _)| !c.eq_ignore_ascii_case(category))
                    {
                        return Err(CifError::syntax(
                            loop_line,
                            format!("loop mixes categories {} and {}", category, other),
                        ));
                    }

                    let mut values = Vec::new();
                    while let Some(Token {
                        kind: TokenKind::Value(v),
                        ..
                    }) = tokens.get(i)
                    {
                        values.push(v.clone());
                        i += 1;
                    }

                    let width = columns.len();
                    let partial = values.len() % width;
                    if partial != 0 {
                        doc.diagnostics.push(format!(
                            "line {}: loop {} has {} values for {} columns, dropping trailing partial row",
                            loop_line,
                            category,
                            values.len(),
                            width
                        ));
                        values.truncate(values.len() - partial);
                    }

                    if !self.wants(category) {
                        continue;
                    }

                    let attributes: Vec<String> =
                        columns.iter().map(|(_, a)| a.to_string()).collect();
                    let rows: Vec<Vec<String>> =
                        values.chunks(width).map(|chunk| chunk.to_vec()).collect();

                    let target = container.category_mut(category);
                    if target.attributes.is_empty() || target.attributes == attributes {
                        target.attributes = attributes;
                        target.rows.extend(rows);
                    } else {
                        doc.diagnostics.push(format!(
                            "line {}: category {} redefined with different columns, replacing",
                            loop_line, category
                        ));
                        target.attributes = attributes;
                        target.rows = rows;
                    }
                }
            }
        }

        Ok(doc)
    }
}

/// `_category.attribute` -> (category, attribute)
fn split_tag(tag: &str, line: usize) -> Result<(&str, &str), CifError> {
    let body = tag.strip_prefix('_').unwrap_or(tag);
    match body.split_once('.') {
        Some((category, attribute)) if !category.is_empty() && !attribute.is_empty() => {
            Ok((category, attribute))
        }
        _ => Err(CifError::syntax(line, format!("malformed tag {}", tag))),
    }
}

fn classify(word: &str) -> TokenKind {
    let lower = word.to_ascii_lowercase();
    if lower.starts_with("data_") {
        TokenKind::DataBlock(word[5..].to_string())
    } else if lower == "loop_" {
        TokenKind::Loop
    } else if lower.starts_with("save_") || lower == "global_" || lower == "stop_" {
        TokenKind::Reserved(word.to_string())
    } else if word.starts_with('_') {
        TokenKind::Tag(word.to_string())
    } else {
        TokenKind::Value(word.to_string())
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, CifError> {
    let mut tokens = Vec::new();
    let mut lines = text.lines().enumerate();

    while let Some((idx, line)) = lines.next() {
        let line_no = idx + 1;

        let Some(first) = line.strip_prefix(';') else {
            tokenize_line(line, line_no, &mut tokens)?;
            continue;
        };

        // Semicolon text field runs until the next line starting with ';'
        let mut parts: Vec<&str> = Vec::new();
        if !first.trim().is_empty() {
            parts.push(first);
        }
        let mut closing = None;
        for (next_idx, next) in lines.by_ref() {
            if let Some(rest) = next.strip_prefix(';') {
                closing = Some((next_idx + 1, rest));
                break;
            }
            parts.push(next);
        }
        let Some((close_line, rest)) = closing else {
            return Err(CifError::syntax(line_no, "unterminated text field"));
        };

        tokens.push(Token {
            kind: TokenKind::Value(parts.join("\n").trim_end().to_string()),
            line: line_no,
        });
        tokenize_line(rest, close_line, &mut tokens)?;
    }

    Ok(tokens)
}

fn tokenize_line(line: &str, line_no: usize, tokens: &mut Vec<Token>) -> Result<(), CifError> {
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '#' {
            break;
        }

        if c == '\'' || c == '"' {
            // A quote only closes when followed by whitespace or end of line
            let start = i + 1;
            let mut j = start;
            loop {
                if j >= chars.len() {
                    return Err(CifError::syntax(line_no, "unterminated quoted value"));
                }
                if chars[j] == c && chars.get(j + 1).map_or(true, |n| n.is_whitespace()) {
                    break;
                }
                j += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Value(chars[start..j].iter().collect()),
                line: line_no,
            });
            i = j + 1;
            continue;
        }

        let start = i;
        while i < chars.len() && !chars[i].is_whitespace() {
            i += 1;
        }
        let word: String = chars[start..i].iter().collect();
        tokens.push(Token {
            kind: classify(&word),
            line: line_no,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"data_1ABC
#
_struct.entry_id   1ABC
_struct.title      'Crystal structure of a "small" protein'
#
loop_
_entity_poly.entity_id
_entity_poly.type
_entity_poly.nstd_linkage
1 'polypeptide(L)' no
2 'polypeptide(L)' no
3 polydeoxyribonucleotide no
#
_pdbx_database_status.status_code  HPUB
_pdbx_database_status.title_suppression N
#
loop_
_audit_author.name
_audit_author.pdbx_ordinal
"O'Brien, P." 1
'Smith, J.'   2
"#;

    #[test]
    fn test_reads_items_and_loops() {
        let doc = CifReader::new().read_str(SAMPLE).unwrap();
        assert_eq!(doc.containers.len(), 1);
        let block = &doc.containers[0];
        assert_eq!(block.name, "1ABC");

        let entity_poly = block.category("entity_poly").unwrap();
        assert_eq!(entity_poly.attributes, vec!["entity_id", "type", "nstd_linkage"]);
        assert_eq!(entity_poly.row_count(), 3);
        assert_eq!(entity_poly.value(2, "type"), Some("polydeoxyribonucleotide"));

        let status = block.category("pdbx_database_status").unwrap();
        assert_eq!(status.row_count(), 1);
        assert_eq!(status.value(0, "title_suppression"), Some("N"));

        let title = block.category("struct").unwrap().value(0, "title");
        assert_eq!(title, Some(r#"Crystal structure of a "small" protein"#));

        // Embedded quote not followed by whitespace stays in the value
        let authors = block.category("audit_author").unwrap();
        assert_eq!(authors.value(0, "name"), Some("O'Brien, P."));
        assert!(doc.diagnostics.is_empty());
    }

    #[test]
    fn test_selective_read_skips_other_categories() {
        let doc = CifReader::new()
            .select(["entity_poly"])
            .read_str(SAMPLE)
            .unwrap();
        let block = &doc.containers[0];
        assert_eq!(block.category_names(), vec!["entity_poly"]);
    }

    #[test]
    fn test_text_field() {
        let text = "data_x\n_struct.title\n;Line one\nline two\n;\n_struct.entry_id X\n";
        let doc = CifReader::new().read_str(text).unwrap();
        let block = &doc.containers[0];
        let cat = block.category("struct").unwrap();
        assert_eq!(cat.value(0, "title"), Some("Line one\nline two"));
        assert_eq!(cat.value(0, "entry_id"), Some("X"));
    }

    #[test]
    fn test_multiple_blocks() {
        let text = "data_a\n_exptl.method 'X-RAY DIFFRACTION'\ndata_b\n_exptl.method 'ELECTRON MICROSCOPY'\n";
        let doc = CifReader::new().read_str(text).unwrap();
        assert_eq!(doc.containers.len(), 2);
        assert_eq!(
            doc.containers[1].category("exptl").unwrap().value(0, "method"),
            Some("ELECTRON MICROSCOPY")
        );
    }

    #[test]
    fn test_partial_loop_row_dropped_with_diagnostic() {
        let text = "data_a\nloop_\n_database_2.database_id\n_database_2.database_code\nPDB 1ABC\nWWPDB\n";
        let doc = CifReader::new().read_str(text).unwrap();
        let cat = doc.containers[0].category("database_2").unwrap();
        assert_eq!(cat.row_count(), 1);
        assert_eq!(doc.diagnostics.len(), 1);
        assert!(doc.diagnostics[0].contains("database_2"));
    }

    #[test]
    fn test_syntax_errors_carry_line_numbers() {
        let err = CifReader::new()
            .read_str("data_a\n_struct.title 'open\n")
            .unwrap_err();
        assert!(matches!(err, CifError::Syntax { line: 2, .. }));

        let err = CifReader::new().read_str("_struct.title x\n").unwrap_err();
        assert!(matches!(err, CifError::Syntax { line: 1, .. }));

        let err = CifReader::new()
            .read_str("data_a\n_struct.title\n;never closed\n")
            .unwrap_err();
        assert!(matches!(err, CifError::Syntax { line: 3, .. }));
    }

    #[test]
    fn test_comments_and_case() {
        let text = "DATA_A # block\nLOOP_\n_Entity.ID\n1 # one\n2\n";
        let doc = CifReader::new().select(["entity"]).read_str(text).unwrap();
        let cat = doc.containers[0].category("entity").unwrap();
        assert_eq!(cat.value(1, "id"), Some("2"));
    }
}
