use std::fmt::Write;
use std::sync::Arc;

use tracing::{debug, info};

use crate::completion::Completer;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::knowledge::formatting::format_sources;
use crate::knowledge::manager::KnowledgeBaseState;
use crate::knowledge::types::{Answer, RetrievedPassage, SourceKind};
use crate::memory::ConversationMemory;

/// Retrieval and prompt settings
#[derive(Debug, Clone)]
pub struct AnswerSettings {
    pub max_chunks: usize,
    /// Passages scoring below this cosine similarity are ignored
    pub similarity_threshold: f32,
    pub title_prefixes: Vec<String>,
    pub language: String,
    pub persona: String,
    pub no_answer_message: String,
}

impl AnswerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_chunks: config.search.max_chunks.max(1),
            similarity_threshold: config.search.similarity_threshold,
            title_prefixes: config.search.title_prefixes.clone(),
            language: config.assistant.language.clone(),
            persona: config.assistant.persona.clone(),
            no_answer_message: config.assistant.no_answer_message.clone(),
        }
    }
}

/// Answers questions strictly from retrieved knowledge base passages
pub struct RetrievalAnswerer {
    embedder: Arc<dyn Embedder>,
    completer: Arc<dyn Completer>,
    settings: AnswerSettings,
}

impl RetrievalAnswerer {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        completer: Arc<dyn Completer>,
        settings: AnswerSettings,
    ) -> Self {
        Self {
            embedder,
            completer,
            settings,
        }
    }

    /// Answer `question` against `state`. The completion service is only
    /// called when at least one passage clears the similarity threshold.
    /// Recording the turn in `memory` is left to the caller.
    pub async fn answer(
        &self,
        state: Option<&KnowledgeBaseState>,
        question: &str,
        memory: &ConversationMemory,
    ) -> KnowledgeResult<Answer> {
        let question = question.trim();
        let Some(state) = state.filter(|s| !s.index.is_empty()) else {
            debug!("Knowledge base empty, declining to answer");
            return Ok(self.no_answer());
        };
        if question.is_empty() {
            return Ok(self.no_answer());
        }

        let passages = self.retrieve(state, question).await?;
        if passages.is_empty() {
            info!("No passage cleared the similarity threshold");
            return Ok(self.no_answer());
        }

        let prompt = build_prompt(&self.settings, &passages, memory, question);
        let text = self
            .completer
            .complete(&prompt)
            .await
            .map_err(|e| KnowledgeError::backend("completion", e))?;

        Ok(Answer {
            answer: text,
            sources: format_sources(&passages, &self.settings.title_prefixes),
            grounded: true,
        })
    }

    /// Top passages for a question, best first, above the threshold
    pub async fn retrieve(
        &self,
        state: &KnowledgeBaseState,
        question: &str,
    ) -> KnowledgeResult<Vec<RetrievedPassage>> {
        let vector = self
            .embedder
            .embed(question)
            .await
            .map_err(|e| KnowledgeError::backend("embedding", e))?;

        let mut passages = state
            .index
            .search(&vector, self.settings.max_chunks)
            .await
            .map_err(KnowledgeError::Index)?;

        let found = passages.len();
        passages.retain(|p| p.score >= self.settings.similarity_threshold);
        passages.sort_by(|a, b| b.score.total_cmp(&a.score));
        passages.truncate(self.settings.max_chunks);

        debug!(
            found,
            kept = passages.len(),
            top_score = passages.first().map(|p| p.score),
            "Retrieved passages"
        );

        Ok(passages)
    }

    fn no_answer(&self) -> Answer {
        Answer {
            answer: self.settings.no_answer_message.clone(),
            sources: Vec::new(),
            grounded: false,
        }
    }
}

/// Assemble the grounded prompt: persona, passages with provenance,
/// recent turns, the question and the answering rules
pub fn build_prompt(
    settings: &AnswerSettings,
    passages: &[RetrievedPassage],
    memory: &ConversationMemory,
    question: &str,
) -> String {
    let mut prompt = String::new();

    if !settings.persona.is_empty() {
        prompt.push_str(&settings.persona);
        prompt.push_str("\n\n");
    }

    prompt.push_str("Kontekst z dokumentów:\n");
    for (i, passage) in passages.iter().enumerate() {
        let _ = writeln!(prompt, "[{}] {}", i + 1, passage_header(passage));
        prompt.push_str(passage.chunk.content.trim());
        prompt.push_str("\n\n");
    }

    if !memory.is_empty() {
        prompt.push_str("Historia rozmowy:\n");
        for turn in memory.recent() {
            let _ = writeln!(prompt, "Użytkownik: {}", turn.question);
            let _ = writeln!(prompt, "Asystent: {}", turn.answer);
        }
        prompt.push('\n');
    }

    let _ = write!(
        prompt,
        "Pytanie: {}\n\n\
         Instrukcje:\n\
         1. Odpowiadaj wyłącznie na podstawie powyższego kontekstu, bez wiedzy spoza niego.\n\
         2. Odpowiadaj w języku: {}.\n\
         3. Jeśli kontekst nie zawiera odpowiedzi, odpowiedz dokładnie: \"{}\"\n\
         4. Podawaj konkretne, praktyczne informacje i wskazuj, z którego fragmentu pochodzą.\n\n\
         Odpowiedź:",
        question, settings.language, settings.no_answer_message
    );

    prompt
}

/// `Źródło: ..., str. N, sekcja: ...` line shown above each passage
fn passage_header(passage: &RetrievedPassage) -> String {
    let chunk = &passage.chunk;
    let mut header = format!("Źródło: {}", chunk.citation);
    if let Some(page) = chunk.page {
        let _ = write!(header, ", str. {}", page);
    }
    if let Some(section) = &chunk.section {
        let _ = write!(header, ", sekcja: {}", section);
    }
    if chunk.kind == SourceKind::Url {
        if let Some(url) = &chunk.url {
            let _ = write!(header, " ({})", url);
        }
    }
    let _ = write!(header, " [trafność {:.2}]", passage.score);
    header
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::knowledge::store::VectorIndex;
    use crate::knowledge::types::Chunk;
    use crate::memory::ConversationTurn;

    struct FixedEmbedder {
        fail: bool,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            anyhow::ensure!(!self.fail, "embedding service down");
            Ok(vec![1.0, 0.0])
        }

        async fn embed_batch(&self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn model_id(&self) -> &str {
            "fake:fixed"
        }
    }

    /// Records prompts and replies with a canned answer
    struct RecordingCompleter {
        calls: AtomicUsize,
        last_prompt: Mutex<Option<String>>,
        fail: bool,
    }

    impl RecordingCompleter {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                last_prompt: Mutex::new(None),
                fail,
            })
        }
    }

    #[async_trait]
    impl Completer for RecordingCompleter {
        async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
            anyhow::ensure!(!self.fail, "rate limited");
            Ok("Pracodawca może otrzymać dofinansowanie.".to_string())
        }
    }

    struct FixedIndex {
        passages: Vec<RetrievedPassage>,
    }

    #[async_trait]
    impl VectorIndex for FixedIndex {
        async fn search(&self, _vector: &[f32], k: usize) -> anyhow::Result<Vec<RetrievedPassage>> {
            Ok(self.passages.iter().take(k).cloned().collect())
        }

        fn len(&self) -> usize {
            self.passages.len()
        }
    }

    fn passage(citation: &str, page: Option<u32>, section: Option<&str>, content: &str, score: f32) -> RetrievedPassage {
        RetrievedPassage {
            chunk: Chunk {
                id: format!("{}-{:?}", citation, page),
                document_id: citation.to_string(),
                kind: SourceKind::Pdf,
                citation: citation.to_string(),
                url: None,
                title: None,
                page,
                section: section.map(str::to_string),
                chunk_index: 0,
                content: content.to_string(),
                char_start: 0,
                char_end: content.chars().count(),
            },
            score,
        }
    }

    fn state(passages: Vec<RetrievedPassage>) -> KnowledgeBaseState {
        KnowledgeBaseState {
            generation: 1,
            fingerprints: BTreeMap::new(),
            documents: Vec::new(),
            chunk_count: passages.len(),
            vector_dim: 2,
            bibliography_entries: 0,
            built_at: Utc::now(),
            index: Arc::new(FixedIndex { passages }),
        }
    }

    fn answerer(completer: Arc<RecordingCompleter>, embed_fails: bool) -> RetrievalAnswerer {
        RetrievalAnswerer::new(
            Arc::new(FixedEmbedder { fail: embed_fails }),
            completer,
            AnswerSettings::from_config(&Config::default()),
        )
    }

    #[tokio::test]
    async fn test_empty_knowledge_base_skips_completion() {
        let completer = RecordingCompleter::new(false);
        let answerer = answerer(completer.clone(), false);
        let memory = ConversationMemory::default();

        let empty = state(Vec::new());
        for snapshot in [None, Some(&empty)] {
            let answer = answerer.answer(snapshot, "Jak uzyskać dofinansowanie?", &memory).await.unwrap();
            assert!(!answer.grounded);
            assert!(answer.sources.is_empty());
            assert_eq!(answer.answer, Config::default().assistant.no_answer_message);
        }
        assert_eq!(completer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_low_scores_yield_no_answer() {
        let completer = RecordingCompleter::new(false);
        let answerer = answerer(completer.clone(), false);
        let kb = state(vec![passage("guide.pdf", Some(1), None, "Nieistotny tekst.", 0.1)]);

        let answer = answerer
            .answer(Some(&kb), "Jak uzyskać dofinansowanie?", &ConversationMemory::default())
            .await
            .unwrap();
        assert!(!answer.grounded);
        assert_eq!(completer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_grounded_answer_with_deduplicated_sources() {
        let completer = RecordingCompleter::new(false);
        let answerer = answerer(completer.clone(), false);
        let kb = state(vec![
            passage("Jan Kowalski, Guide, 2024", Some(3), Some("Wstęp"), "Dofinansowanie przysługuje pracodawcy.", 0.9),
            passage("Jan Kowalski, Guide, 2024", Some(3), Some("Wstęp"), "Wniosek składa się co miesiąc.", 0.8),
            passage("unlisted.pdf", Some(5), Some("Strona 5"), "Termin wynosi 14 dni.", 0.7),
        ]);

        let mut memory = ConversationMemory::default();
        memory.append(ConversationTurn::new("Czym jest PFRON?", "Funduszem celowym."));

        let answer = answerer
            .answer(Some(&kb), "Jak uzyskać dofinansowanie?", &memory)
            .await
            .unwrap();

        assert!(answer.grounded);
        assert_eq!(answer.answer, "Pracodawca może otrzymać dofinansowanie.");
        let rendered: Vec<String> = answer.sources.iter().map(|s| s.render()).collect();
        assert_eq!(
            rendered,
            vec![
                "Jan Kowalski, Guide, 2024, str. 3 - Wstęp".to_string(),
                "unlisted.pdf, str. 5".to_string(),
            ]
        );

        let prompt = completer.last_prompt.lock().unwrap().clone().unwrap();
        let first = prompt.find("Dofinansowanie przysługuje").unwrap();
        let third = prompt.find("Termin wynosi").unwrap();
        assert!(first < third);
        assert!(prompt.contains("Użytkownik: Czym jest PFRON?"));
        assert!(prompt.contains("Pytanie: Jak uzyskać dofinansowanie?"));
        assert!(prompt.contains("polski"));
    }

    #[tokio::test]
    async fn test_backend_failures_are_distinguishable() {
        let kb = state(vec![passage("guide.pdf", Some(1), None, "Treść.", 0.9)]);
        let memory = ConversationMemory::default();

        let err = answerer(RecordingCompleter::new(false), true)
            .answer(Some(&kb), "Pytanie?", &memory)
            .await
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::Backend { operation: "embedding", .. }));

        let err = answerer(RecordingCompleter::new(true), false)
            .answer(Some(&kb), "Pytanie?", &memory)
            .await
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::Backend { operation: "completion", .. }));
    }

    #[test]
    fn test_prompt_without_history_omits_history_block() {
        let settings = AnswerSettings::from_config(&Config::default());
        let passages = vec![passage("guide.pdf", None, Some("Krok 1"), "Złóż wniosek.", 0.5)];
        let prompt = build_prompt(&settings, &passages, &ConversationMemory::default(), "Co dalej?");

        assert!(prompt.starts_with(&settings.persona));
        assert!(prompt.contains("[1] Źródło: guide.pdf, sekcja: Krok 1"));
        assert!(!prompt.contains("Historia rozmowy"));
        assert!(prompt.contains(&settings.no_answer_message));
    }
}
