use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use colored::Colorize;
use regex::Regex;

use crate::knowledge::types::{
    Answer, Chunk, FormattedSource, KnowledgeStats, RetrievedPassage, SourceDocument, SourceKind,
};

const TITLE_SEPARATORS: [&str; 4] = [" - ", " – ", " | ", ": "];

/// Section labels that only name a page ("Strona 5", "str. 5", "Page 5")
static PAGE_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(strona|str\.?|s\.|page|p\.)\s*\d+$").unwrap());

impl FormattedSource {
    /// One citation line, e.g. `Jan Kowalski, Guide, 2024, str. 3 - Wstęp`
    /// or `[Dofinansowanie](https://...)`
    pub fn render(&self) -> String {
        let mut line = match (self.kind, &self.url, self.page) {
            (SourceKind::Url, Some(url), _) => format!("[{}]({})", self.citation, url),
            (_, _, Some(page)) => format!("{}, str. {}", self.citation, page),
            _ => self.citation.clone(),
        };
        if let Some(section) = &self.section {
            line.push_str(" - ");
            line.push_str(section);
        }
        line
    }
}

/// Strip organisation names used as a title prefix or suffix
pub fn clean_title(title: &str, organisations: &[String]) -> String {
    let original = title.trim();
    let mut cleaned = original.to_string();

    loop {
        let before = cleaned.len();
        for org in organisations.iter().filter(|o| !o.is_empty()) {
            for sep in TITLE_SEPARATORS {
                let suffix = format!("{}{}", sep, org);
                if let Some(stripped) = cleaned.strip_suffix(suffix.as_str()) {
                    cleaned = stripped.trim_end().to_string();
                }
                let prefix = format!("{}{}", org, sep);
                if let Some(stripped) = cleaned.strip_prefix(prefix.as_str()) {
                    cleaned = stripped.trim_start().to_string();
                }
            }
        }
        if cleaned.len() == before {
            break;
        }
    }

    if cleaned.is_empty() {
        original.to_string()
    } else {
        cleaned
    }
}

/// Build the ordered, deduplicated source list for an answer.
///
/// Sources are grouped by citation in order of first appearance. Within a
/// citation each (page, section) pair appears once.
pub fn format_sources(passages: &[RetrievedPassage], organisations: &[String]) -> Vec<FormattedSource> {
    let mut groups: Vec<(String, Vec<FormattedSource>)> = Vec::new();

    for passage in passages {
        let chunk = &passage.chunk;
        let citation = match chunk.kind {
            SourceKind::Url => clean_title(&chunk.citation, organisations),
            _ => chunk.citation.clone(),
        };

        let source = FormattedSource {
            kind: chunk.kind,
            section: effective_section(chunk, &citation),
            page: chunk.page,
            url: chunk.url.clone(),
            citation: citation.clone(),
        };

        match groups.iter_mut().find(|(c, _)| *c == citation) {
            Some((_, entries)) => {
                if !entries.contains(&source) {
                    entries.push(source);
                }
            }
            None => groups.push((citation, vec![source])),
        }
    }

    groups.into_iter().flat_map(|(_, entries)| entries).collect()
}

/// The section worth printing for a chunk, if any. Labels that restate the
/// page or repeat the citation or title are dropped.
fn effective_section(chunk: &Chunk, citation: &str) -> Option<String> {
    let section = chunk.section.as_deref()?.trim();
    if section.is_empty() || PAGE_LABEL.is_match(section) {
        return None;
    }
    if section.eq_ignore_ascii_case(citation)
        || chunk
            .title
            .as_deref()
            .is_some_and(|t| section.eq_ignore_ascii_case(t.trim()))
    {
        return None;
    }
    Some(section.to_string())
}

/// Markdown block appended below an answer
pub fn format_source_lines(sources: &[FormattedSource]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s.render()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_answer(answer: &Answer) -> String {
    let mut output = String::new();

    if answer.grounded {
        output.push_str(&answer.answer);
    } else {
        output.push_str(&answer.answer.yellow().to_string());
    }
    output.push('\n');

    if !answer.sources.is_empty() {
        output.push('\n');
        output.push_str(&"Źródła:".bold().to_string());
        output.push('\n');
        output.push_str(&format_source_lines(&answer.sources));
        output.push('\n');
    }

    output
}

pub fn format_stats(stats: &KnowledgeStats) -> String {
    let mut output = String::new();

    output.push_str(&"Knowledge Base Statistics".bold().to_string());
    output.push('\n');
    output.push_str(&format!("State: {}", stats.phase));
    output.push('\n');
    output.push_str(&format!(
        "Documents: {} ({} PDF, {} web, {} facts)",
        stats.document_count, stats.pdf_count, stats.url_count, stats.fact_count
    ));
    output.push('\n');
    output.push_str(&format!("Total Chunks: {}", stats.chunk_count));
    output.push('\n');

    if stats.document_count > 0 {
        let avg = stats.chunk_count / stats.document_count;
        output.push_str(&format!("Average Chunks/Document: {}", avg));
        output.push('\n');
    }

    output.push_str(&format!("Bibliography Entries: {}", stats.bibliography_entries));
    output.push('\n');
    output.push_str(&format!("Conversation Turns: {}", stats.memory_turn_count));
    output.push('\n');

    if let Some(generation) = stats.generation {
        output.push_str(&format!("Index Generation: {}", generation));
        output.push('\n');
    }

    if let Some(built_at) = stats.built_at {
        output.push_str(&format!("Last Built: {}", format_relative_time(built_at)));
        output.push('\n');
    }

    if let Some(dim) = stats.vector_dim {
        output.push_str(&format!("Vector Dimensions: {}", dim));
        output.push('\n');
    }

    if let Some(footprint) = &stats.footprint {
        output.push_str(&format!(
            "Estimated Vector Memory: {:.2} MB",
            footprint.estimated_bytes as f64 / (1024.0 * 1024.0)
        ));
        output.push('\n');
        output.push_str(&format!("Size Category: {}", footprint.category));
        output.push('\n');
        output.push_str("Recommendations:");
        output.push('\n');
        for recommendation in &footprint.recommendations {
            output.push_str(&format!("  - {}", recommendation));
            output.push('\n');
        }
    }

    output
}

pub fn format_source_list(documents: &[SourceDocument]) -> String {
    if documents.is_empty() {
        return "No sources indexed".to_string();
    }

    let mut output = String::new();

    output.push_str(
        &format!("{:<10} {:<52} {:<8} {}\n", "Type", "Source", "Chunks", "Citation")
            .bold()
            .to_string(),
    );
    output.push_str(&"─".repeat(120));
    output.push('\n');

    for doc in documents {
        let id = if doc.id.chars().count() > 50 {
            format!("{}...", truncate_chars(&doc.id, 47))
        } else {
            doc.id.clone()
        };

        let citation = if doc.citation.chars().count() > 60 {
            format!("{}...", truncate_chars(&doc.citation, 57))
        } else {
            doc.citation.clone()
        };

        output.push_str(&format!(
            "{:<10} {:<52} {:<8} {}\n",
            doc.kind.as_str(),
            id,
            doc.chunk_count,
            citation
        ));
    }

    output
}

fn format_relative_time(dt: DateTime<Utc>) -> String {
    let now = Utc::now();
    let duration = now.signed_duration_since(dt);

    if duration.num_days() > 0 {
        format!("{} days ago", duration.num_days())
    } else if duration.num_hours() > 0 {
        format!("{} hours ago", duration.num_hours())
    } else if duration.num_minutes() > 0 {
        format!("{} minutes ago", duration.num_minutes())
    } else {
        "just now".to_string()
    }
}

fn truncate_chars(input: &str, max_chars: usize) -> String {
    input.chars().take(max_chars).collect()
}
