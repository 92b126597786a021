use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{stream, StreamExt};
use tracing::{debug, info, warn};

use crate::config::{FactConfig, KnowledgeConfig};
use crate::error::{KnowledgeError, KnowledgeResult, SourceError};
use crate::knowledge::bibliography::BibliographyResolver;
use crate::knowledge::chunker::{DocumentMeta, StructuralChunker};
use crate::knowledge::extract::{PageText, TextExtractor};
use crate::knowledge::fetch::{is_http_url, WebFetcher};
use crate::knowledge::fingerprint::{CorpusFingerprint, Fingerprint};
use crate::knowledge::formatting::clean_title;
use crate::knowledge::types::{Chunk, SourceDocument, SourceKind};

/// PDFs above this size are skipped
pub const MAX_PDF_BYTES: u64 = 100 * 1024 * 1024;

const CONCURRENT_FETCHES: usize = 4;

/// Everything the corpus is built from, as discovered on disk
#[derive(Debug, Clone, Default)]
pub struct CorpusSources {
    pub pdfs: Vec<PathBuf>,
    pub urls: Vec<String>,
    pub facts: Vec<FactConfig>,
    pub bibliography_file: PathBuf,
    pub urls_file: PathBuf,
    /// Chunking parameters are part of the fingerprint: changing them
    /// invalidates every chunk
    pub chunking: (usize, usize),
}

impl CorpusSources {
    pub fn discover(config: &KnowledgeConfig) -> Self {
        Self {
            pdfs: discover_pdfs(&config.pdf_directory),
            urls: read_url_list(&config.urls_file),
            facts: config.facts.clone(),
            bibliography_file: config.bibliography_file.clone(),
            urls_file: config.urls_file.clone(),
            chunking: (config.chunk_size, config.chunk_overlap),
        }
    }

    pub fn fingerprint(&self) -> CorpusFingerprint {
        let mut fingerprints = CorpusFingerprint::new();

        for path in &self.pdfs {
            fingerprints.insert(format!("pdf:{}", file_name(path)), Fingerprint::of_file(path));
        }
        for url in &self.urls {
            fingerprints.insert(format!("url:{}", url), Fingerprint::of_content(url));
        }
        for (index, fact) in self.facts.iter().enumerate() {
            fingerprints.insert(
                fact_key(index, fact),
                Fingerprint::of_content(&fact.content),
            );
        }
        fingerprints.insert(
            "bibliography".to_string(),
            Fingerprint::of_file(&self.bibliography_file),
        );
        fingerprints.insert(
            "chunking".to_string(),
            Fingerprint::of_content(&format!("{}:{}", self.chunking.0, self.chunking.1)),
        );

        fingerprints
    }
}

/// PDF files directly inside `dir`, sorted by name. A missing directory is
/// an empty corpus part, not an error.
pub fn discover_pdfs(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "PDF directory unavailable");
            return Vec::new();
        }
    };

    let mut pdfs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .collect();
    pdfs.sort();
    pdfs
}

/// URLs from a one-per-line list. Blank lines and `#` comments are skipped,
/// as are entries that are not http(s). A missing file means no URLs.
pub fn read_url_list(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_url_list(&content),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "URL list unavailable");
            Vec::new()
        }
    }
}

pub fn parse_url_list(content: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !is_http_url(line) {
            warn!(entry = line, "Skipping URL list entry without http(s) scheme");
            continue;
        }
        if !urls.iter().any(|u| u == line) {
            urls.push(line.to_string());
        }
    }
    urls
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Facts are keyed by position as titles need not be unique
fn fact_key(index: usize, fact: &FactConfig) -> String {
    format!("fact:{}:{}", index, fact.title)
}

/// Result of loading the whole corpus
#[derive(Debug, Clone, Default)]
pub struct LoadedCorpus {
    pub chunks: Vec<Chunk>,
    pub documents: Vec<SourceDocument>,
    pub bibliography_entries: usize,
    /// Sources that failed and were skipped
    pub skipped: Vec<String>,
}

pub struct CorpusLoader {
    chunker: StructuralChunker,
    extractor: Arc<dyn TextExtractor>,
    fetcher: Arc<dyn WebFetcher>,
    organisations: Vec<String>,
}

impl CorpusLoader {
    pub fn new(
        chunker: StructuralChunker,
        extractor: Arc<dyn TextExtractor>,
        fetcher: Arc<dyn WebFetcher>,
    ) -> Self {
        Self {
            chunker,
            extractor,
            fetcher,
            organisations: Vec::new(),
        }
    }

    /// Organisation names stripped from web page titles
    pub fn with_title_prefixes(mut self, organisations: Vec<String>) -> Self {
        self.organisations = organisations;
        self
    }

    /// Load PDFs, then web pages, then facts. A failing source is logged and
    /// skipped; only an entirely empty result is an error.
    pub async fn load_all(&self, sources: &CorpusSources) -> KnowledgeResult<LoadedCorpus> {
        let bibliography = BibliographyResolver::load(&sources.bibliography_file);
        let mut corpus = LoadedCorpus {
            bibliography_entries: bibliography.len(),
            ..Default::default()
        };

        for path in &sources.pdfs {
            let result = self.load_pdf(path, &bibliography).await;
            corpus.absorb(file_name(path), result);
        }

        let pages: Vec<_> = stream::iter(sources.urls.iter())
            .map(|url| async move { (url.clone(), self.load_url(url).await) })
            .buffered(CONCURRENT_FETCHES)
            .collect()
            .await;
        for (url, result) in pages {
            corpus.absorb(url, result);
        }

        for (index, fact) in sources.facts.iter().enumerate() {
            corpus.absorb(fact_key(index, fact), self.load_fact(index, fact));
        }

        if corpus.chunks.is_empty() {
            return Err(KnowledgeError::EmptyCorpus);
        }

        info!(
            documents = corpus.documents.len(),
            chunks = corpus.chunks.len(),
            skipped = corpus.skipped.len(),
            "Corpus loaded"
        );

        Ok(corpus)
    }

    async fn load_pdf(
        &self,
        path: &Path,
        bibliography: &BibliographyResolver,
    ) -> Result<(SourceDocument, Vec<Chunk>), SourceError> {
        let name = file_name(path);
        let io_err = |source: std::io::Error| SourceError::Io {
            path: path.display().to_string(),
            source,
        };

        let size = tokio::fs::metadata(path).await.map_err(io_err)?.len();
        if size > MAX_PDF_BYTES {
            return Err(SourceError::Pdf {
                path: name,
                message: format!("file too large ({} bytes)", size),
            });
        }

        let bytes = tokio::fs::read(path).await.map_err(io_err)?;
        let extractor = Arc::clone(&self.extractor);
        let pages = tokio::task::spawn_blocking(move || extractor.extract(&bytes))
            .await
            .map_err(|e| SourceError::Pdf {
                path: name.clone(),
                message: format!("extraction task failed: {}", e),
            })?
            .map_err(|e| SourceError::Pdf {
                path: name.clone(),
                message: e.to_string(),
            })?;

        let meta = DocumentMeta {
            citation: bibliography.resolve(&name),
            id: name,
            kind: SourceKind::Pdf,
            url: None,
            title: None,
        };
        self.chunk_document(meta, &pages)
    }

    async fn load_url(&self, url: &str) -> Result<(SourceDocument, Vec<Chunk>), SourceError> {
        let page = self.fetcher.fetch(url).await?;
        let title = clean_title(&page.title, &self.organisations);

        let meta = DocumentMeta {
            id: url.to_string(),
            kind: SourceKind::Url,
            citation: title.clone(),
            url: Some(url.to_string()),
            title: Some(title),
        };
        self.chunk_document(meta, &[PageText::unpaged(page.text)])
    }

    /// Facts are indexed whole, one chunk each
    fn load_fact(
        &self,
        index: usize,
        fact: &FactConfig,
    ) -> Result<(SourceDocument, Vec<Chunk>), SourceError> {
        let id = fact_key(index, fact);
        let content = fact.content.trim();
        if content.is_empty() {
            return Err(SourceError::Empty(id));
        }

        let chunk = Chunk {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: id.clone(),
            kind: SourceKind::Hardcoded,
            citation: fact.title.clone(),
            url: None,
            title: Some(fact.title.clone()),
            page: None,
            section: None,
            chunk_index: 0,
            content: content.to_string(),
            char_start: 0,
            char_end: content.chars().count(),
        };
        let document = SourceDocument {
            id,
            kind: SourceKind::Hardcoded,
            citation: fact.title.clone(),
            chunk_count: 1,
        };
        Ok((document, vec![chunk]))
    }

    fn chunk_document(
        &self,
        meta: DocumentMeta,
        pages: &[PageText],
    ) -> Result<(SourceDocument, Vec<Chunk>), SourceError> {
        let chunks = self.chunker.chunk(&meta, pages);
        if chunks.is_empty() {
            return Err(SourceError::Empty(meta.id));
        }

        debug!(source = %meta.id, chunks = chunks.len(), "Chunked document");

        let document = SourceDocument {
            id: meta.id,
            kind: meta.kind,
            citation: meta.citation,
            chunk_count: chunks.len(),
        };
        Ok((document, chunks))
    }
}

impl LoadedCorpus {
    fn absorb(&mut self, source: String, result: Result<(SourceDocument, Vec<Chunk>), SourceError>) {
        match result {
            Ok((document, chunks)) => {
                self.documents.push(document);
                self.chunks.extend(chunks);
            }
            Err(e) => {
                warn!(source = %source, error = %e, "Skipping source");
                self.skipped.push(source);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::fetch::FetchedPage;
    use async_trait::async_trait;

    const BODY: &str = "Pracodawca zatrudniający osoby niepełnosprawne może otrzymać miesięczne dofinansowanie do wynagrodzenia. Wniosek składa się elektronicznie.";

    /// Treats file bytes as UTF-8 text with pages separated by form feeds;
    /// anything starting with `CORRUPT` fails.
    struct FakeExtractor;

    impl TextExtractor for FakeExtractor {
        fn extract(&self, bytes: &[u8]) -> anyhow::Result<Vec<PageText>> {
            let text = std::str::from_utf8(bytes)?;
            anyhow::ensure!(!text.starts_with("CORRUPT"), "broken xref table");
            Ok(text
                .split('\u{c}')
                .enumerate()
                .map(|(i, page)| PageText::numbered(i as u32 + 1, page))
                .collect())
        }
    }

    struct FakeFetcher;

    #[async_trait]
    impl WebFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage, SourceError> {
            if url.contains("down") {
                return Err(SourceError::Fetch {
                    url: url.to_string(),
                    message: "connection refused".to_string(),
                });
            }
            Ok(FetchedPage {
                title: "Dofinansowanie - Państwowy Fundusz Rehabilitacji Osób Niepełnosprawnych"
                    .to_string(),
                text: format!("# Terminy\n{}", BODY),
            })
        }
    }

    fn loader() -> CorpusLoader {
        CorpusLoader::new(
            StructuralChunker::new(1000, 200),
            Arc::new(FakeExtractor),
            Arc::new(FakeFetcher),
        )
        .with_title_prefixes(vec![
            "Państwowy Fundusz Rehabilitacji Osób Niepełnosprawnych".to_string(),
        ])
    }

    fn sources_in(dir: &Path) -> CorpusSources {
        let config = KnowledgeConfig {
            pdf_directory: dir.join("pdfs"),
            urls_file: dir.join("urls.txt"),
            bibliography_file: dir.join("bibliografia.csv"),
            ..Default::default()
        };
        CorpusSources::discover(&config)
    }

    #[test]
    fn test_parse_url_list() {
        let list = "# źródła\n\nhttps://www.pfron.org.pl/a\n  http://example.org/b  \nftp://nope\nhttps://www.pfron.org.pl/a\n";
        assert_eq!(
            parse_url_list(list),
            vec!["https://www.pfron.org.pl/a", "http://example.org/b"]
        );
    }

    #[test]
    fn test_discover_only_pdfs_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.pdf"), "x").unwrap();
        std::fs::write(dir.path().join("a.PDF"), "x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let names: Vec<String> = discover_pdfs(dir.path()).iter().map(|p| file_name(p)).collect();
        assert_eq!(names, vec!["a.PDF", "b.pdf"]);
        assert!(discover_pdfs(&dir.path().join("missing")).is_empty());
    }

    #[tokio::test]
    async fn test_load_all_stamps_citations_and_skips_failures() {
        let dir = tempfile::tempdir().unwrap();
        let pdfs = dir.path().join("pdfs");
        std::fs::create_dir_all(&pdfs).unwrap();
        std::fs::write(pdfs.join("guide.pdf"), format!("Wstęp\n{}\u{c}{}", BODY, BODY)).unwrap();
        std::fs::write(pdfs.join("unlisted.pdf"), BODY).unwrap();
        std::fs::write(pdfs.join("broken.pdf"), "CORRUPT").unwrap();
        std::fs::write(
            dir.path().join("bibliografia.csv"),
            "opis;filename\n\"Jan Kowalski, Guide, 2024\";guide.pdf\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("urls.txt"),
            "https://www.pfron.org.pl/dofinansowanie\nhttps://down.example.org\n",
        )
        .unwrap();

        let mut sources = sources_in(dir.path());
        sources.facts.push(FactConfig {
            title: "Wpłaty na PFRON".to_string(),
            content: "Obowiązek wpłat dotyczy pracodawców zatrudniających co najmniej 25 osób."
                .to_string(),
        });

        let corpus = loader().load_all(&sources).await.unwrap();

        assert_eq!(corpus.bibliography_entries, 1);
        assert_eq!(corpus.documents.len(), 4);
        assert_eq!(corpus.skipped, vec!["broken.pdf", "https://down.example.org"]);

        let guide: Vec<&Chunk> = corpus
            .chunks
            .iter()
            .filter(|c| c.document_id == "guide.pdf")
            .collect();
        assert_eq!(guide[0].citation, "Jan Kowalski, Guide, 2024");
        assert_eq!(guide[0].page, Some(1));
        assert_eq!(guide[0].section.as_deref(), Some("Wstęp"));

        let unlisted = corpus
            .chunks
            .iter()
            .find(|c| c.document_id == "unlisted.pdf")
            .unwrap();
        assert_eq!(unlisted.citation, "unlisted.pdf");

        let web = corpus
            .chunks
            .iter()
            .find(|c| c.kind == SourceKind::Url)
            .unwrap();
        assert_eq!(web.citation, "Dofinansowanie");
        assert_eq!(web.url.as_deref(), Some("https://www.pfron.org.pl/dofinansowanie"));
        assert_eq!(web.section.as_deref(), Some("Terminy"));

        let fact = corpus
            .chunks
            .iter()
            .find(|c| c.kind == SourceKind::Hardcoded)
            .unwrap();
        assert_eq!(fact.citation, "Wpłaty na PFRON");
        assert_eq!(fact.chunk_index, 0);
    }

    #[tokio::test]
    async fn test_facts_alone_make_a_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let mut sources = sources_in(dir.path());
        sources.facts.push(FactConfig {
            title: "Ulga".to_string(),
            content: "Pracodawca może obniżyć wpłaty na PFRON.".to_string(),
        });

        let corpus = loader().load_all(&sources).await.unwrap();
        assert_eq!(corpus.chunks.len(), 1);
    }

    #[tokio::test]
    async fn test_facts_sharing_a_title_stay_separate() {
        let dir = tempfile::tempdir().unwrap();
        let mut sources = sources_in(dir.path());
        for content in ["Pierwsza stawka ulgi.", "Druga stawka ulgi."] {
            sources.facts.push(FactConfig {
                title: "Ulga".to_string(),
                content: content.to_string(),
            });
        }

        let fingerprint = sources.fingerprint();
        assert!(fingerprint.contains_key("fact:0:Ulga"));
        assert!(fingerprint.contains_key("fact:1:Ulga"));

        let corpus = loader().load_all(&sources).await.unwrap();
        assert_eq!(corpus.documents.len(), 2);
        assert_ne!(corpus.documents[0].id, corpus.documents[1].id);
        assert_eq!(corpus.chunks.len(), 2);

        // Editing the second fact must not be hidden by the first
        let before = sources.fingerprint();
        sources.facts[1].content = "Nowa stawka ulgi.".to_string();
        let after = sources.fingerprint();
        assert_eq!(before.get("fact:0:Ulga"), after.get("fact:0:Ulga"));
        assert_ne!(before.get("fact:1:Ulga"), after.get("fact:1:Ulga"));
    }

    #[tokio::test]
    async fn test_empty_corpus_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let pdfs = dir.path().join("pdfs");
        std::fs::create_dir_all(&pdfs).unwrap();
        std::fs::write(pdfs.join("broken.pdf"), "CORRUPT").unwrap();

        let result = loader().load_all(&sources_in(dir.path())).await;
        assert!(matches!(result, Err(KnowledgeError::EmptyCorpus)));
    }

    #[test]
    fn test_fingerprint_covers_all_source_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let pdfs = dir.path().join("pdfs");
        std::fs::create_dir_all(&pdfs).unwrap();
        std::fs::write(pdfs.join("guide.pdf"), "x").unwrap();
        std::fs::write(dir.path().join("urls.txt"), "https://example.org\n").unwrap();

        let mut sources = sources_in(dir.path());
        sources.facts.push(FactConfig {
            title: "Ulga".to_string(),
            content: "treść".to_string(),
        });
        let fingerprint = sources.fingerprint();

        assert!(fingerprint.contains_key("pdf:guide.pdf"));
        assert!(fingerprint.contains_key("url:https://example.org"));
        assert!(fingerprint.contains_key("fact:0:Ulga"));
        assert_eq!(fingerprint.get("bibliography"), Some(&Fingerprint::Missing));
    }
}
