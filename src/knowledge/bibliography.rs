//! Filename to citation lookup loaded from a `;`-separated table.
//!
//! The table has two columns, `opis` (the citation) and `filename`. A header
//! row is optional; when present the columns may appear in either order.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

const DELIMITER: char = ';';
const CITATION_COLUMN: &str = "opis";
const FILENAME_COLUMN: &str = "filename";

#[derive(Debug, Clone, Default)]
pub struct BibliographyResolver {
    entries: HashMap<String, String>,
}

impl BibliographyResolver {
    /// Load the table from disk. A missing or unreadable file yields an empty
    /// resolver, so every document falls back to its filename.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let resolver = Self::parse(&content);
                debug!(
                    path = %path.display(),
                    entries = resolver.len(),
                    "Loaded bibliography"
                );
                resolver
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Bibliography unavailable, citations fall back to file names"
                );
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Self {
        let content = content.trim_start_matches('\u{feff}');
        let mut lines = content.lines().filter(|line| !line.trim().is_empty());

        let mut citation_idx = 0;
        let mut filename_idx = 1;
        let mut entries = HashMap::new();

        let Some(first) = lines.next() else {
            return Self::default();
        };

        let first_fields = split_record(first);
        let lowered: Vec<String> = first_fields.iter().map(|f| f.to_lowercase()).collect();
        let header_filename = lowered.iter().position(|f| f == FILENAME_COLUMN);
        let header_citation = lowered.iter().position(|f| f == CITATION_COLUMN);

        let pending_first = if let Some(idx) = header_filename {
            filename_idx = idx;
            citation_idx = header_citation.unwrap_or(if idx == 0 { 1 } else { 0 });
            None
        } else {
            Some(first_fields)
        };

        let records = pending_first
            .into_iter()
            .chain(lines.map(split_record));

        for (row, fields) in records.enumerate() {
            let (Some(citation), Some(filename)) =
                (fields.get(citation_idx), fields.get(filename_idx))
            else {
                debug!(row, "Skipping malformed bibliography row");
                continue;
            };
            if citation.is_empty() || filename.is_empty() {
                debug!(row, "Skipping bibliography row with empty field");
                continue;
            }
            // Rows may carry a path; documents are looked up by bare name
            let filename = filename.rsplit(['/', '\\']).next().unwrap_or(filename.as_str());
            entries.insert(filename.to_string(), citation.clone());
        }

        Self { entries }
    }

    /// Citation for a document file name, if the table lists it
    pub fn get(&self, filename: &str) -> Option<&str> {
        self.entries.get(filename).map(String::as_str)
    }

    /// Citation for a document, falling back to the file name itself
    pub fn resolve(&self, filename: &str) -> String {
        self.get(filename)
            .map(str::to_string)
            .unwrap_or_else(|| filename.to_string())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Split one row on the delimiter, honouring double quotes (`""` escapes a
/// quote inside a quoted field). Fields are trimmed.
fn split_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            c if c == DELIMITER && !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            c => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}
