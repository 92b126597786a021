//! Structure-aware chunking of page-delimited text.
//!
//! Text is first cut into blocks at detected headings, so a chunk never mixes
//! two sections. Each block is then split into overlapping windows measured
//! in characters. Offsets (`char_start`, `char_end`) refer to the whitespace
//! normalised document text.

use std::sync::Arc;

use crate::config::KnowledgeConfig;
use crate::knowledge::extract::PageText;
use crate::knowledge::structure::{HeadingHeuristics, StructureDetector};
use crate::knowledge::types::{Chunk, SourceKind};

/// Identity and provenance stamped on every chunk of a document
#[derive(Debug, Clone)]
pub struct DocumentMeta {
    pub id: String,
    pub kind: SourceKind,
    pub citation: String,
    pub url: Option<String>,
    pub title: Option<String>,
}

pub struct StructuralChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    detector: Arc<dyn StructureDetector>,
}

impl StructuralChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
            detector: Arc::new(HeadingHeuristics::default()),
        }
    }

    pub fn from_config(config: &KnowledgeConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Replace the heading detection strategy
    pub fn with_detector(mut self, detector: Arc<dyn StructureDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Chunk one document. Empty input yields no chunks.
    pub fn chunk(&self, meta: &DocumentMeta, pages: &[PageText]) -> Vec<Chunk> {
        let blocks = self.split_into_blocks(pages);

        let mut chunks: Vec<Chunk> = Vec::new();
        for block in &blocks {
            let chars: Vec<char> = block.text.chars().collect();
            for (start, end) in self.split_spans(&chars) {
                let raw: String = chars[start..end].iter().collect();
                let content = raw.trim();
                if content.is_empty() {
                    continue;
                }

                let lead = raw.chars().take_while(|c| c.is_whitespace()).count();
                let local_start = start + lead;
                let char_start = block.doc_offset + local_start;
                let char_end = char_start + content.chars().count();

                // After trimming, a span can start where the previous one did;
                // it then covers the previous chunk, so widen that one instead
                if let Some(last) = chunks.last_mut().filter(|last| last.char_start >= char_start) {
                    if char_end > last.char_end {
                        last.content = content.to_string();
                        last.char_end = char_end;
                    }
                    continue;
                }

                chunks.push(Chunk {
                    id: uuid::Uuid::new_v4().to_string(),
                    document_id: meta.id.clone(),
                    kind: meta.kind,
                    citation: meta.citation.clone(),
                    url: meta.url.clone(),
                    title: meta.title.clone(),
                    page: block.page_at(local_start),
                    section: block.section.clone(),
                    chunk_index: chunks.len(),
                    content: content.to_string(),
                    char_start,
                    char_end,
                });
            }
        }

        chunks
    }

    /// Group normalised lines into blocks that start at each detected heading
    fn split_into_blocks(&self, pages: &[PageText]) -> Vec<Block> {
        let lines: Vec<(Option<u32>, String)> = pages
            .iter()
            .flat_map(|p| p.text.lines().map(move |line| (p.page, normalize_line(line))))
            .collect();

        // Index of the next non-empty line for every position
        let mut next_text = vec![None; lines.len()];
        let mut upcoming = None;
        for idx in (0..lines.len()).rev() {
            next_text[idx] = upcoming;
            if !lines[idx].1.is_empty() {
                upcoming = Some(idx);
            }
        }

        let mut blocks = Vec::new();
        let mut doc_offset = 0;
        let mut current = BlockBuilder::new(None);

        for (idx, (page, line)) in lines.iter().enumerate() {
            if line.is_empty() {
                current.paragraph_break();
                continue;
            }

            let next_line = next_text[idx].map(|n: usize| lines[n].1.as_str());
            let heading = self.detector.detect(line, next_line);

            if let Some(label) = heading.as_ref() {
                let finished = std::mem::replace(&mut current, BlockBuilder::new(Some(label.clone())));
                if let Some(block) = finished.finish(&mut doc_offset) {
                    blocks.push(block);
                }
            }

            current.push_line(*page, line, heading.is_some());
        }

        if let Some(block) = current.finish(&mut doc_offset) {
            blocks.push(block);
        }

        blocks
    }

    /// Character spans of at most `chunk_size`, consecutive spans sharing at
    /// most `chunk_overlap` characters
    fn split_spans(&self, chars: &[char]) -> Vec<(usize, usize)> {
        let total = chars.len();
        let mut spans = Vec::new();
        let mut start = 0;

        while start < total {
            let hard_end = (start + self.chunk_size).min(total);
            let end = if hard_end < total {
                self.find_break(chars, start, hard_end)
            } else {
                hard_end
            };
            spans.push((start, end));

            if end >= total {
                break;
            }

            let next = end.saturating_sub(self.chunk_overlap);
            start = if next <= start {
                end
            } else {
                align_to_word(chars, next, end)
            };
        }

        spans
    }

    /// Best break position in the second half of the window: paragraph, then
    /// line, then sentence, then word. Falls back to a hard cut.
    fn find_break(&self, chars: &[char], start: usize, end: usize) -> usize {
        let lower = start + (self.chunk_size / 2).max(1);
        if lower >= end {
            return end;
        }

        let rfind = |pred: &dyn Fn(usize) -> bool| (lower + 1..=end).rev().find(|&p| pred(p));

        let paragraph = |p: usize| p >= 2 && chars[p - 1] == '\n' && chars[p - 2] == '\n';
        let line = |p: usize| chars[p - 1] == '\n';
        let sentence = |p: usize| {
            matches!(chars[p - 1], '.' | '!' | '?')
                && chars.get(p).is_none_or(|c| c.is_whitespace())
        };
        let word = |p: usize| chars.get(p).is_some_and(|c| c.is_whitespace());

        rfind(&paragraph)
            .or_else(|| rfind(&line))
            .or_else(|| rfind(&sentence))
            .or_else(|| rfind(&word))
            .unwrap_or(end)
    }
}

/// Move an overlap start forward to the next word so chunks do not open
/// mid-word. Only ever shrinks the overlap.
fn align_to_word(chars: &[char], start: usize, limit: usize) -> usize {
    if start == 0 || chars[start - 1].is_whitespace() || chars[start].is_whitespace() {
        return start;
    }
    match (start..limit).find(|&p| chars[p].is_whitespace()) {
        Some(space) if space + 1 < limit => space + 1,
        _ => start,
    }
}

fn normalize_line(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

struct Block {
    section: Option<String>,
    text: String,
    doc_offset: usize,
    /// (char offset within block, page) at every page change
    pages: Vec<(usize, Option<u32>)>,
}

impl Block {
    fn page_at(&self, offset: usize) -> Option<u32> {
        self.pages
            .iter()
            .take_while(|(start, _)| *start <= offset)
            .last()
            .or(self.pages.first())
            .and_then(|(_, page)| *page)
    }
}

struct BlockBuilder {
    section: Option<String>,
    text: String,
    char_len: usize,
    pages: Vec<(usize, Option<u32>)>,
    pending_paragraph: bool,
    has_body: bool,
}

impl BlockBuilder {
    fn new(section: Option<String>) -> Self {
        Self {
            section,
            text: String::new(),
            char_len: 0,
            pages: Vec::new(),
            pending_paragraph: false,
            has_body: false,
        }
    }

    fn paragraph_break(&mut self) {
        if !self.text.is_empty() {
            self.pending_paragraph = true;
        }
    }

    fn push_line(&mut self, page: Option<u32>, line: &str, is_heading: bool) {
        if !self.text.is_empty() {
            let separator = if self.pending_paragraph { "\n\n" } else { "\n" };
            self.text.push_str(separator);
            self.char_len += separator.len();
        }
        self.pending_paragraph = false;

        if self.pages.last().map(|(_, p)| *p) != Some(page) {
            self.pages.push((self.char_len, page));
        }

        self.text.push_str(line);
        self.char_len += line.chars().count();
        self.has_body |= !is_heading;
    }

    /// Heading-only blocks are dropped; their label still applies to the
    /// following block through the section cursor.
    fn finish(self, doc_offset: &mut usize) -> Option<Block> {
        if !self.has_body {
            return None;
        }
        let block = Block {
            section: self.section,
            text: self.text,
            doc_offset: *doc_offset,
            pages: self.pages,
        };
        *doc_offset += self.char_len + 2;
        Some(block)
    }
}
