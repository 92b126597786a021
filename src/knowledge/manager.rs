//! Builds, caches and hot-swaps the searchable knowledge base.
//!
//! The live index is an immutable [`KnowledgeBaseState`] behind an `Arc`.
//! Readers clone the `Arc` and keep a consistent view for the whole request;
//! a rebuild prepares a complete new state and swaps the pointer. Rebuilds
//! are serialised by an async mutex, and a caller that waited for another
//! rebuild re-checks the corpus before doing any work.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::{Config, KnowledgeConfig};
use crate::embedding::Embedder;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::knowledge::chunker::StructuralChunker;
use crate::knowledge::extract::PdfExtractor;
use crate::knowledge::fetch::HttpFetcher;
use crate::knowledge::fingerprint::{CorpusFingerprint, FingerprintDiff};
use crate::knowledge::loader::{CorpusLoader, CorpusSources};
use crate::knowledge::store::{KnowledgeStore, VectorIndex};
use crate::knowledge::types::{
    Chunk, KnowledgePhase, KnowledgeStats, ReloadOutcome, SourceDocument, SourceKind,
};
use crate::vector_optimizer::VectorOptimizer;

const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_VERSION: u32 = 1;
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// One complete, immutable build of the knowledge base
pub struct KnowledgeBaseState {
    pub generation: u64,
    pub fingerprints: CorpusFingerprint,
    pub documents: Vec<SourceDocument>,
    pub chunk_count: usize,
    pub vector_dim: usize,
    pub bibliography_entries: usize,
    pub built_at: DateTime<Utc>,
    pub index: Arc<dyn VectorIndex>,
}

/// On-disk description of the last successful build
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheManifest {
    version: u32,
    generation: u64,
    embedding_model: String,
    fingerprints: CorpusFingerprint,
    documents: Vec<SourceDocument>,
    chunk_count: usize,
    #[serde(default)]
    vector_dim: usize,
    bibliography_entries: usize,
    built_at: DateTime<Utc>,
}

pub struct KnowledgeBaseManager {
    knowledge: KnowledgeConfig,
    batch_size: usize,
    loader: CorpusLoader,
    embedder: Arc<dyn Embedder>,
    store: KnowledgeStore,
    phase: Mutex<KnowledgePhase>,
    current: RwLock<Option<Arc<KnowledgeBaseState>>>,
    rebuild_lock: tokio::sync::Mutex<()>,
}

impl KnowledgeBaseManager {
    pub fn new(
        config: &Config,
        loader: CorpusLoader,
        embedder: Arc<dyn Embedder>,
        store: KnowledgeStore,
    ) -> Self {
        Self {
            knowledge: config.knowledge.clone(),
            batch_size: config.embedding.batch_size.max(1),
            loader,
            embedder,
            store,
            phase: Mutex::new(KnowledgePhase::Uninitialized),
            current: RwLock::new(None),
            rebuild_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Wire up the PDF extractor, HTTP fetcher and on-disk store from config
    pub async fn from_config(config: &Config, embedder: Arc<dyn Embedder>) -> anyhow::Result<Self> {
        let cache_dir = config.cache_directory()?;
        let store = KnowledgeStore::open(&cache_dir).await?;
        let loader = CorpusLoader::new(
            StructuralChunker::from_config(&config.knowledge),
            Arc::new(PdfExtractor),
            Arc::new(HttpFetcher::new(FETCH_TIMEOUT)?),
        )
        .with_title_prefixes(config.search.title_prefixes.clone());

        Ok(Self::new(config, loader, embedder, store))
    }

    pub fn phase(&self) -> KnowledgePhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: KnowledgePhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    /// Current state, if any build has succeeded
    pub fn snapshot(&self) -> Option<Arc<KnowledgeBaseState>> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn install(&self, state: Arc<KnowledgeBaseState>) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(state);
    }

    /// Make the knowledge base ready, reusing the on-disk index when it
    /// matches the current sources. A no-op when already initialized.
    pub async fn initialize(&self) -> KnowledgeResult<ReloadOutcome> {
        let _guard = self.rebuild_lock.lock().await;
        if self.snapshot().is_some() {
            return Ok(ReloadOutcome::Unchanged);
        }
        self.build_locked(true).await
    }

    /// Whether any source was added, removed or modified since the last
    /// build. Always true before the first build.
    pub fn has_changes(&self) -> bool {
        match self.snapshot() {
            None => true,
            Some(state) => !self.diff_against(&state).is_empty(),
        }
    }

    fn diff_against(&self, state: &KnowledgeBaseState) -> FingerprintDiff {
        let current = CorpusSources::discover(&self.knowledge).fingerprint();
        FingerprintDiff::between(&state.fingerprints, &current)
    }

    /// Rebuild only when sources changed. Returns whether a rebuild happened.
    pub async fn reload_if_needed(&self) -> KnowledgeResult<bool> {
        if !self.has_changes() {
            return Ok(false);
        }

        let _guard = self.rebuild_lock.lock().await;

        // Someone else may have rebuilt while we waited
        let first_build = match self.snapshot() {
            None => true,
            Some(state) => {
                let diff = self.diff_against(&state);
                if diff.is_empty() {
                    return Ok(false);
                }
                info!(
                    added = diff.added.len(),
                    removed = diff.removed.len(),
                    changed = diff.changed.len(),
                    "Corpus changed, rebuilding knowledge base"
                );
                false
            }
        };

        let outcome = self.build_locked(first_build).await?;
        Ok(matches!(outcome, ReloadOutcome::Rebuilt { .. }))
    }

    /// Unconditional rebuild
    pub async fn force_reload(&self) -> KnowledgeResult<bool> {
        let _guard = self.rebuild_lock.lock().await;
        self.build_locked(false).await?;
        Ok(true)
    }

    /// Drop the live state, the manifest and every cached table. Searches
    /// already running against the dropped state may fail.
    pub async fn clear_cache(&self) -> KnowledgeResult<usize> {
        let _guard = self.rebuild_lock.lock().await;

        *self.current.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.set_phase(KnowledgePhase::Uninitialized);

        let manifest = self.manifest_path();
        match tokio::fs::remove_file(&manifest).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(KnowledgeError::Index(
                    anyhow::Error::new(e).context("Failed to remove cache manifest"),
                ))
            }
        }

        let removed = self
            .store
            .remove_generations_except(&[])
            .await
            .map_err(KnowledgeError::Index)?;
        info!(tables = removed, "Knowledge cache cleared");
        Ok(removed)
    }

    /// Caller must hold `rebuild_lock`
    async fn build_locked(&self, allow_cache: bool) -> KnowledgeResult<ReloadOutcome> {
        let previous = self.snapshot();
        self.set_phase(if previous.is_some() {
            KnowledgePhase::Rebuilding
        } else {
            KnowledgePhase::Building
        });

        let sources = CorpusSources::discover(&self.knowledge);
        let fingerprints = sources.fingerprint();

        if allow_cache {
            if let Some(state) = self.load_cached(&fingerprints).await {
                info!(
                    generation = state.generation,
                    chunks = state.chunk_count,
                    "Reusing cached knowledge base"
                );
                self.install(state);
                self.set_phase(KnowledgePhase::Ready);
                return Ok(ReloadOutcome::Cached);
            }
        }

        match self.rebuild(&sources, fingerprints, previous.as_deref()).await {
            Ok(state) => {
                let chunks = state.chunk_count;
                self.install(state);
                self.set_phase(KnowledgePhase::Ready);
                Ok(ReloadOutcome::Rebuilt { chunks })
            }
            Err(e) => {
                error!(error = %e, "Knowledge base build failed");
                self.set_phase(KnowledgePhase::Failed);
                Err(e)
            }
        }
    }

    async fn rebuild(
        &self,
        sources: &CorpusSources,
        fingerprints: CorpusFingerprint,
        previous: Option<&KnowledgeBaseState>,
    ) -> KnowledgeResult<Arc<KnowledgeBaseState>> {
        let corpus = self.loader.load_all(sources).await?;
        let embeddings = self.embed_chunks(&corpus.chunks).await?;

        let generation = self.next_generation(previous).await?;
        let index = self
            .store
            .create_generation(generation, &corpus.chunks, &embeddings)
            .await
            .map_err(KnowledgeError::Index)?;

        let state = Arc::new(KnowledgeBaseState {
            generation,
            fingerprints,
            chunk_count: corpus.chunks.len(),
            vector_dim: embeddings.first().map(Vec::len).unwrap_or(0),
            documents: corpus.documents,
            bibliography_entries: corpus.bibliography_entries,
            built_at: Utc::now(),
            index: Arc::new(index),
        });

        if let Err(e) = self.write_manifest(&state).await {
            warn!(error = %e, "Failed to persist cache manifest, next start will rebuild");
        }

        // Keep the previous table for readers still holding the old snapshot
        let mut keep = vec![generation];
        keep.extend(previous.map(|p| p.generation));
        if let Err(e) = self.store.remove_generations_except(&keep).await {
            warn!(error = %e, "Failed to clean up superseded chunk tables");
        }

        info!(
            generation,
            documents = state.documents.len(),
            chunks = state.chunk_count,
            "Knowledge base built"
        );

        Ok(state)
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> KnowledgeResult<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(embedding_text).collect();
            let vectors = self
                .embedder
                .embed_batch(texts)
                .await
                .map_err(|e| KnowledgeError::backend("embedding", e))?;
            if vectors.len() != batch.len() {
                return Err(KnowledgeError::backend(
                    "embedding",
                    anyhow::anyhow!("expected {} vectors, got {}", batch.len(), vectors.len()),
                ));
            }
            embeddings.extend(vectors);
            debug!(done = embeddings.len(), total = chunks.len(), "Embedded chunks");
        }
        Ok(embeddings)
    }

    async fn next_generation(&self, previous: Option<&KnowledgeBaseState>) -> KnowledgeResult<u64> {
        let on_disk = self
            .store
            .generations()
            .await
            .map_err(KnowledgeError::Index)?
            .into_iter()
            .max()
            .unwrap_or(0);
        let live = previous.map(|p| p.generation).unwrap_or(0);
        Ok(on_disk.max(live) + 1)
    }

    fn manifest_path(&self) -> PathBuf {
        self.store.path().join(MANIFEST_FILE)
    }

    async fn read_manifest(path: &Path) -> anyhow::Result<CacheManifest> {
        let bytes = tokio::fs::read(path).await?;
        let manifest: CacheManifest = serde_json::from_slice(&bytes)?;
        anyhow::ensure!(
            manifest.version == MANIFEST_VERSION,
            "Unsupported manifest version {}",
            manifest.version
        );
        Ok(manifest)
    }

    async fn write_manifest(&self, state: &KnowledgeBaseState) -> anyhow::Result<()> {
        let manifest = CacheManifest {
            version: MANIFEST_VERSION,
            generation: state.generation,
            embedding_model: self.embedder.model_id().to_string(),
            fingerprints: state.fingerprints.clone(),
            documents: state.documents.clone(),
            chunk_count: state.chunk_count,
            vector_dim: state.vector_dim,
            bibliography_entries: state.bibliography_entries,
            built_at: state.built_at,
        };

        let path = self.manifest_path();
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&manifest)?)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    /// State restored from disk when the manifest matches the current sources
    /// and embedding model
    async fn load_cached(&self, fingerprints: &CorpusFingerprint) -> Option<Arc<KnowledgeBaseState>> {
        let manifest = match Self::read_manifest(&self.manifest_path()).await {
            Ok(manifest) => manifest,
            Err(e) => {
                debug!(error = %e, "No usable cache manifest");
                return None;
            }
        };

        if manifest.embedding_model != self.embedder.model_id() {
            info!(
                cached = %manifest.embedding_model,
                current = %self.embedder.model_id(),
                "Embedding model changed, cache ignored"
            );
            return None;
        }

        let diff = FingerprintDiff::between(&manifest.fingerprints, fingerprints);
        if !diff.is_empty() {
            info!(changes = diff.total(), "Sources changed since cache was built");
            return None;
        }

        let index = match self
            .store
            .open_generation(manifest.generation, manifest.chunk_count)
            .await
        {
            Ok(index) => index,
            Err(e) => {
                warn!(error = %e, "Cached chunk table unusable, rebuilding");
                return None;
            }
        };

        Some(Arc::new(KnowledgeBaseState {
            generation: manifest.generation,
            fingerprints: manifest.fingerprints,
            documents: manifest.documents,
            chunk_count: manifest.chunk_count,
            vector_dim: manifest.vector_dim,
            bibliography_entries: manifest.bibliography_entries,
            built_at: manifest.built_at,
            index: Arc::new(index),
        }))
    }

    pub fn stats(&self, memory_turn_count: usize) -> KnowledgeStats {
        let phase = self.phase();
        let Some(state) = self.snapshot() else {
            return KnowledgeStats {
                phase,
                document_count: 0,
                chunk_count: 0,
                pdf_count: 0,
                url_count: 0,
                fact_count: 0,
                bibliography_entries: 0,
                memory_turn_count,
                generation: None,
                built_at: None,
                vector_dim: None,
                footprint: None,
            };
        };

        let count = |kind: SourceKind| state.documents.iter().filter(|d| d.kind == kind).count();

        KnowledgeStats {
            phase,
            document_count: state.documents.len(),
            chunk_count: state.chunk_count,
            pdf_count: count(SourceKind::Pdf),
            url_count: count(SourceKind::Url),
            fact_count: count(SourceKind::Hardcoded),
            bibliography_entries: state.bibliography_entries,
            memory_turn_count,
            generation: Some(state.generation),
            built_at: Some(state.built_at),
            vector_dim: (state.vector_dim > 0).then_some(state.vector_dim),
            footprint: (state.vector_dim > 0)
                .then(|| VectorOptimizer::footprint(state.chunk_count, state.vector_dim)),
        }
    }

    /// Indexed documents of the live state
    pub fn documents(&self) -> Vec<SourceDocument> {
        self.snapshot()
            .map(|state| state.documents.clone())
            .unwrap_or_default()
    }
}

/// Text sent to the embedder: the citation and section give the vector
/// context the bare chunk lacks
fn embedding_text(chunk: &Chunk) -> String {
    match &chunk.section {
        Some(section) => format!("{} > {}\n\n{}", chunk.citation, section, chunk.content),
        None => format!("{}\n\n{}", chunk.citation, chunk.content),
    }
}
