use std::sync::LazyLock;

use regex::Regex;

/// Decides whether a line of extracted text opens a new section.
pub trait StructureDetector: Send + Sync {
    /// Returns the section label when `line` is a heading. `next_line` is the
    /// following non-empty line, if any.
    fn detect(&self, line: &str, next_line: Option<&str>) -> Option<String>;
}

static MARKDOWN_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{1,6}\s+(\S.*)$").unwrap());

static KEYWORD_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(rozdział|część|krok|art\.|§)\s*\d+[a-z]?(\b|\.|:|\s|$)").unwrap()
});

static NUMBERED_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(\.\d+)*\.?\s+\p{Lu}").unwrap());

static CAPS_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\p{Lu}][\p{Lu}\d\s,\-–]+:?$").unwrap());

/// Line-formatting heuristics for Polish administrative documents
#[derive(Debug, Clone)]
pub struct HeadingHeuristics {
    /// Longest line still considered a heading
    pub max_heading_chars: usize,
    /// Most words a plain capitalised title may have
    pub max_title_words: usize,
    /// Shortest line that counts as body text after a plain title
    pub min_body_chars: usize,
}

impl Default for HeadingHeuristics {
    fn default() -> Self {
        Self {
            max_heading_chars: 100,
            max_title_words: 8,
            min_body_chars: 60,
        }
    }
}

impl HeadingHeuristics {
    fn is_plain_title(&self, line: &str, next_line: Option<&str>) -> bool {
        let Some(first) = line.chars().next() else {
            return false;
        };
        if !first.is_uppercase() {
            return false;
        }
        if line.ends_with(['.', ',', ';', '!', '?']) {
            return false;
        }
        if line.split_whitespace().count() > self.max_title_words {
            return false;
        }
        if !line.chars().any(char::is_alphabetic) {
            return false;
        }
        // A title must introduce body text, not another short line
        next_line.is_some_and(|next| next.chars().count() >= self.min_body_chars)
    }
}

impl StructureDetector for HeadingHeuristics {
    fn detect(&self, line: &str, next_line: Option<&str>) -> Option<String> {
        let line = line.trim();
        if line.is_empty() || line.chars().count() > self.max_heading_chars {
            return None;
        }

        if let Some(caps) = MARKDOWN_HEADING.captures(line) {
            return Some(clean_label(&caps[1]));
        }

        if KEYWORD_HEADING.is_match(line) {
            return Some(clean_label(line));
        }

        if NUMBERED_HEADING.is_match(line) && !line.ends_with(['.', ',', ';']) {
            return Some(clean_label(line));
        }

        let letters = line.chars().filter(|c| c.is_alphabetic()).count();
        if letters >= 3 && CAPS_TITLE.is_match(line) {
            return Some(clean_label(line));
        }

        if self.is_plain_title(line, next_line) {
            return Some(clean_label(line));
        }

        None
    }
}

fn clean_label(label: &str) -> String {
    label.trim().trim_end_matches(':').trim_end().to_string()
}
