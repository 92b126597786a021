use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::vector_optimizer::IndexFootprint;

/// Where a document came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Pdf,
    Url,
    /// Fixed fact from configuration
    Hardcoded,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Pdf => "pdf",
            SourceKind::Url => "url",
            SourceKind::Hardcoded => "hardcoded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pdf" => Some(SourceKind::Pdf),
            "url" => Some(SourceKind::Url),
            "hardcoded" => Some(SourceKind::Hardcoded),
            _ => None,
        }
    }
}

/// One item of the corpus as it was loaded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    /// File name for PDFs, the URL for web pages, `fact:<title>` for facts
    pub id: String,
    pub kind: SourceKind,
    pub citation: String,
    pub chunk_count: usize,
}

/// Represents a chunk of knowledge content
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub kind: SourceKind,
    /// Human-readable bibliographic description of the source document
    pub citation: String,
    pub url: Option<String>,
    pub title: Option<String>,
    /// 1-based page the chunk starts on (PDF only)
    pub page: Option<u32>,
    /// Nearest preceding heading, if one was detected
    pub section: Option<String>,
    pub chunk_index: usize,
    pub content: String,
    pub char_start: usize,
    pub char_end: usize,
}

/// Search result with relevance score
#[derive(Debug, Clone)]
pub struct RetrievedPassage {
    pub chunk: Chunk,
    pub score: f32,
}

/// One deduplicated source reference attached to an answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedSource {
    pub kind: SourceKind,
    pub citation: String,
    pub page: Option<u32>,
    pub section: Option<String>,
    pub url: Option<String>,
}

/// Result of answering a question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<FormattedSource>,
    /// False when the assistant declined for lack of supporting context
    pub grounded: bool,
}

/// Lifecycle of the knowledge base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgePhase {
    Uninitialized,
    Building,
    Ready,
    Rebuilding,
    Failed,
}

impl std::fmt::Display for KnowledgePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            KnowledgePhase::Uninitialized => "uninitialized",
            KnowledgePhase::Building => "building",
            KnowledgePhase::Ready => "ready",
            KnowledgePhase::Rebuilding => "rebuilding",
            KnowledgePhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Statistics about the knowledge base
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeStats {
    pub phase: KnowledgePhase,
    pub document_count: usize,
    pub chunk_count: usize,
    pub pdf_count: usize,
    pub url_count: usize,
    pub fact_count: usize,
    pub bibliography_entries: usize,
    pub memory_turn_count: usize,
    pub generation: Option<u64>,
    pub built_at: Option<DateTime<Utc>>,
    pub vector_dim: Option<usize>,
    pub footprint: Option<IndexFootprint>,
}

/// Result of a reload request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Corpus unchanged, current snapshot kept
    Unchanged,
    /// Snapshot restored from the on-disk index cache
    Cached,
    Rebuilt { chunks: usize },
}
