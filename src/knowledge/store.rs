use anyhow::{Context, Result};
use arrow::record_batch::RecordBatchIterator;
use arrow_array::{Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::{
    connect,
    query::{ExecutableQuery, QueryBase},
    Connection, DistanceType, Table,
};
use std::iter::once;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::knowledge::types::{Chunk, RetrievedPassage, SourceKind};
use crate::vector_optimizer::VectorOptimizer;

const TABLE_PREFIX: &str = "chunks_";

/// Similarity search over embedded chunks
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Up to `k` nearest chunks, best first. Scores are cosine similarity.
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievedPassage>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// LanceDB database holding one chunk table per build generation
pub struct KnowledgeStore {
    db: Connection,
    db_path: PathBuf,
}

impl KnowledgeStore {
    pub async fn open(db_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(db_path)
            .with_context(|| format!("Failed to create cache directory {}", db_path.display()))?;

        let uri = db_path
            .to_str()
            .context("Cache directory path is not valid UTF-8")?;
        let db = connect(uri).execute().await?;

        Ok(Self {
            db,
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn table_name(generation: u64) -> String {
        format!("{}{:06}", TABLE_PREFIX, generation)
    }

    fn schema(vector_dim: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("document_id", DataType::Utf8, false),
            Field::new("kind", DataType::Utf8, false),
            Field::new("citation", DataType::Utf8, false),
            Field::new("url", DataType::Utf8, true),
            Field::new("title", DataType::Utf8, true),
            Field::new("page", DataType::Int32, true),
            Field::new("section", DataType::Utf8, true),
            Field::new("chunk_index", DataType::Int32, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("char_start", DataType::Int32, false),
            Field::new("char_end", DataType::Int32, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    vector_dim as i32,
                ),
                false,
            ),
        ]))
    }

    /// Write a new generation table with all chunks and their embeddings
    pub async fn create_generation(
        &self,
        generation: u64,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
    ) -> Result<LanceIndex> {
        anyhow::ensure!(!chunks.is_empty(), "Refusing to create an empty chunk table");
        anyhow::ensure!(
            chunks.len() == embeddings.len(),
            "Got {} embeddings for {} chunks",
            embeddings.len(),
            chunks.len()
        );

        let vector_dim = embeddings[0].len();
        anyhow::ensure!(vector_dim > 0, "Embedding provider returned empty vectors");
        if let Some(bad) = embeddings.iter().position(|e| e.len() != vector_dim) {
            anyhow::bail!(
                "Embedding {} has dimension {}, expected {}",
                bad,
                embeddings[bad].len(),
                vector_dim
            );
        }

        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        let document_ids: Vec<&str> = chunks.iter().map(|c| c.document_id.as_str()).collect();
        let kinds: Vec<&str> = chunks.iter().map(|c| c.kind.as_str()).collect();
        let citations: Vec<&str> = chunks.iter().map(|c| c.citation.as_str()).collect();
        let urls: Vec<Option<&str>> = chunks.iter().map(|c| c.url.as_deref()).collect();
        let titles: Vec<Option<&str>> = chunks.iter().map(|c| c.title.as_deref()).collect();
        let pages: Vec<Option<i32>> = chunks.iter().map(|c| c.page.map(|p| p as i32)).collect();
        let sections: Vec<Option<&str>> = chunks.iter().map(|c| c.section.as_deref()).collect();
        let chunk_indices: Vec<i32> = chunks.iter().map(|c| c.chunk_index as i32).collect();
        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let char_starts: Vec<i32> = chunks.iter().map(|c| c.char_start as i32).collect();
        let char_ends: Vec<i32> = chunks.iter().map(|c| c.char_end as i32).collect();

        let embedding_values: Vec<f32> =
            embeddings.iter().flat_map(|e| e.iter().copied()).collect();
        let embedding_array = FixedSizeListArray::try_new(
            Arc::new(Field::new("item", DataType::Float32, true)),
            vector_dim as i32,
            Arc::new(Float32Array::from(embedding_values)),
            None,
        )?;

        let schema = Self::schema(vector_dim);
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(document_ids)),
                Arc::new(StringArray::from(kinds)),
                Arc::new(StringArray::from(citations)),
                Arc::new(StringArray::from(urls)),
                Arc::new(StringArray::from(titles)),
                Arc::new(Int32Array::from(pages)),
                Arc::new(StringArray::from(sections)),
                Arc::new(Int32Array::from(chunk_indices)),
                Arc::new(StringArray::from(contents)),
                Arc::new(Int32Array::from(char_starts)),
                Arc::new(Int32Array::from(char_ends)),
                Arc::new(embedding_array),
            ],
        )?;

        let name = Self::table_name(generation);
        let batch_reader = RecordBatchIterator::new(once(Ok(batch)), schema);
        let table = self.db.create_table(&name, batch_reader).execute().await?;

        VectorOptimizer::ensure_optimal_index(&table, vector_dim).await?;

        tracing::debug!(table = %name, rows = chunks.len(), "Created chunk table");

        Ok(LanceIndex {
            table,
            rows: chunks.len(),
        })
    }

    /// Open an existing generation. Fails when the table is missing or its
    /// row count differs from what the manifest recorded.
    pub async fn open_generation(&self, generation: u64, expected_rows: usize) -> Result<LanceIndex> {
        let name = Self::table_name(generation);
        let table = self.db.open_table(&name).execute().await?;
        let rows = table.count_rows(None).await?;
        anyhow::ensure!(
            rows == expected_rows,
            "Table {} holds {} rows, manifest expects {}",
            name,
            rows,
            expected_rows
        );
        Ok(LanceIndex { table, rows })
    }

    /// Generation numbers of all chunk tables present on disk
    pub async fn generations(&self) -> Result<Vec<u64>> {
        let names = self.db.table_names().execute().await?;
        let mut generations: Vec<u64> = names
            .iter()
            .filter_map(|n| n.strip_prefix(TABLE_PREFIX))
            .filter_map(|g| g.parse().ok())
            .collect();
        generations.sort_unstable();
        Ok(generations)
    }

    /// Drop every generation table except the ones listed. Returns how many
    /// were dropped.
    pub async fn remove_generations_except(&self, keep: &[u64]) -> Result<usize> {
        let mut removed = 0;
        for generation in self.generations().await? {
            if keep.contains(&generation) {
                continue;
            }
            let name = Self::table_name(generation);
            self.db
                .drop_table(&name, &[])
                .await
                .with_context(|| format!("Failed to drop chunk table {}", name))?;
            tracing::debug!(table = %name, "Dropped superseded chunk table");
            removed += 1;
        }
        Ok(removed)
    }
}

/// One generation table opened for search
pub struct LanceIndex {
    table: Table,
    rows: usize,
}

#[async_trait]
impl VectorIndex for LanceIndex {
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievedPassage>> {
        let mut results = self
            .table
            .vector_search(vector)?
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await?;

        let mut passages = Vec::new();
        while let Some(batch) = results.try_next().await? {
            if batch.num_rows() == 0 {
                continue;
            }
            passages.extend(read_passages(&batch)?);
        }

        passages.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(passages)
    }

    fn len(&self) -> usize {
        self.rows
    }
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .with_context(|| format!("Missing column {}", name))?
        .as_any()
        .downcast_ref::<T>()
        .with_context(|| format!("Unexpected type for column {}", name))
}

fn optional_str(array: &StringArray, row: usize) -> Option<String> {
    (!array.is_null(row)).then(|| array.value(row).to_string())
}

fn read_passages(batch: &RecordBatch) -> Result<Vec<RetrievedPassage>> {
    let ids = column::<StringArray>(batch, "id")?;
    let document_ids = column::<StringArray>(batch, "document_id")?;
    let kinds = column::<StringArray>(batch, "kind")?;
    let citations = column::<StringArray>(batch, "citation")?;
    let urls = column::<StringArray>(batch, "url")?;
    let titles = column::<StringArray>(batch, "title")?;
    let pages = column::<Int32Array>(batch, "page")?;
    let sections = column::<StringArray>(batch, "section")?;
    let chunk_indices = column::<Int32Array>(batch, "chunk_index")?;
    let contents = column::<StringArray>(batch, "content")?;
    let char_starts = column::<Int32Array>(batch, "char_start")?;
    let char_ends = column::<Int32Array>(batch, "char_end")?;
    let distances = column::<Float32Array>(batch, "_distance")?;

    let mut passages = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let kind = SourceKind::parse(kinds.value(i))
            .with_context(|| format!("Unknown source kind {}", kinds.value(i)))?;

        let chunk = Chunk {
            id: ids.value(i).to_string(),
            document_id: document_ids.value(i).to_string(),
            kind,
            citation: citations.value(i).to_string(),
            url: optional_str(urls, i),
            title: optional_str(titles, i),
            page: (!pages.is_null(i)).then(|| pages.value(i) as u32),
            section: optional_str(sections, i),
            chunk_index: chunk_indices.value(i) as usize,
            content: contents.value(i).to_string(),
            char_start: char_starts.value(i) as usize,
            char_end: char_ends.value(i) as usize,
        };

        passages.push(RetrievedPassage {
            chunk,
            score: 1.0 - distances.value(i),
        });
    }

    Ok(passages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: usize, content: &str, page: Option<u32>) -> Chunk {
        Chunk {
            id: format!("chunk-{}", index),
            document_id: "guide.pdf".to_string(),
            kind: SourceKind::Pdf,
            citation: "Jan Kowalski, Guide, 2024".to_string(),
            url: None,
            title: None,
            page,
            section: (index == 0).then(|| "Wstęp".to_string()),
            chunk_index: index,
            content: content.to_string(),
            char_start: index * 10,
            char_end: index * 10 + content.chars().count(),
        }
    }

    #[tokio::test]
    async fn test_create_search_and_reopen_generation() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeStore::open(dir.path()).await.unwrap();

        let chunks = vec![chunk(0, "pierwszy", Some(3)), chunk(1, "drugi", None)];
        let embeddings = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]];
        let index = store.create_generation(1, &chunks, &embeddings).await.unwrap();
        assert_eq!(index.len(), 2);

        let hits = index.search(&[0.9, 0.1, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk, chunks[0]);
        assert!(hits[0].score > hits[1].score);
        assert_eq!(hits[1].chunk.page, None);
        assert_eq!(hits[1].chunk.section, None);

        let reopened = store.open_generation(1, 2).await.unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(store.open_generation(1, 5).await.is_err());
        assert!(store.open_generation(2, 2).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_superseded_generations() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeStore::open(dir.path()).await.unwrap();
        let chunks = vec![chunk(0, "treść", Some(1))];
        let embeddings = vec![vec![0.5, 0.5]];

        for generation in 1..=3 {
            store
                .create_generation(generation, &chunks, &embeddings)
                .await
                .unwrap();
        }
        assert_eq!(store.generations().await.unwrap(), vec![1, 2, 3]);

        let removed = store.remove_generations_except(&[3]).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.generations().await.unwrap(), vec![3]);
        assert!(store.open_generation(1, 1).await.is_err());

        // A fresh connection sees the same table list
        let reopened = KnowledgeStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.generations().await.unwrap(), vec![3]);
        assert_eq!(reopened.remove_generations_except(&[3]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mismatched_embeddings_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeStore::open(dir.path()).await.unwrap();
        let chunks = vec![chunk(0, "a", None), chunk(1, "b", None)];

        assert!(store
            .create_generation(1, &chunks, &[vec![1.0, 0.0]])
            .await
            .is_err());
        assert!(store
            .create_generation(1, &chunks, &[vec![1.0, 0.0], vec![1.0]])
            .await
            .is_err());
    }
}
