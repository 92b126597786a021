// Copyright 2026 Muvon Un Limited
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;

use anyhow::Result;
use lancedb::{index::Index, DistanceType, Table};
use serde::{Deserialize, Serialize};

/// Tables below this size are searched by brute force
pub const MIN_ROWS_FOR_INDEX: usize = 1000;

const MB: u64 = 1024 * 1024;
const LARGE_VECTOR_COUNT: usize = 10_000;

/// Parameters for vector index optimization
#[derive(Debug, Clone, PartialEq)]
pub struct IndexParams {
    pub should_create_index: bool,
    pub num_partitions: u32,
    pub num_sub_vectors: u32,
    pub num_bits: usize,
    pub distance_type: DistanceType,
}

/// Size class of the raw embedding data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeCategory {
    Small,
    Medium,
    Large,
    VeryLarge,
}

impl fmt::Display for SizeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SizeCategory::Small => "small (< 50 MB)",
            SizeCategory::Medium => "medium (50-200 MB)",
            SizeCategory::Large => "large (200 MB - 1 GB)",
            SizeCategory::VeryLarge => "very large (> 1 GB)",
        };
        f.write_str(label)
    }
}

/// Estimated footprint of one table's vectors with tuning advice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexFootprint {
    pub estimated_bytes: u64,
    pub category: SizeCategory,
    pub recommendations: Vec<String>,
}

/// Vector index optimizer for LanceDB
pub struct VectorOptimizer;

impl VectorOptimizer {
    /// Calculate optimal index parameters based on dataset size
    pub fn calculate_index_params(row_count: usize, vector_dim: usize) -> IndexParams {
        if row_count < MIN_ROWS_FOR_INDEX {
            return IndexParams {
                should_create_index: false,
                num_partitions: 0,
                num_sub_vectors: 0,
                num_bits: 0,
                distance_type: DistanceType::Cosine,
            };
        }

        // Calculate optimal partitions (sqrt of row count, min 2, max 256)
        let num_partitions = ((row_count as f64).sqrt() as u32).clamp(2, 256);

        // Calculate sub-vectors (vector_dim / 8, min 1, max 96)
        let num_sub_vectors = ((vector_dim / 8) as u32).clamp(1, 96);

        IndexParams {
            should_create_index: true,
            num_partitions,
            num_sub_vectors,
            num_bits: 8, // Standard 8-bit quantization
            distance_type: DistanceType::Cosine,
        }
    }

    /// Raw f32 embedding bytes, ignoring Lance metadata and text columns
    pub fn estimate_memory_bytes(row_count: usize, vector_dim: usize) -> u64 {
        row_count as u64 * vector_dim as u64 * std::mem::size_of::<f32>() as u64
    }

    pub fn classify_size(bytes: u64) -> SizeCategory {
        match bytes {
            b if b < 50 * MB => SizeCategory::Small,
            b if b < 200 * MB => SizeCategory::Medium,
            b if b < 1000 * MB => SizeCategory::Large,
            _ => SizeCategory::VeryLarge,
        }
    }

    pub fn recommendations(row_count: usize, bytes: u64) -> Vec<String> {
        let mut recommendations = Vec::new();

        if bytes > 2000 * MB {
            recommendations.push("Use a smaller embedding model or fewer dimensions".to_string());
            recommendations.push("Split the corpus into separate knowledge bases".to_string());
        } else if bytes > 500 * MB {
            recommendations.push("Monitor memory usage of the search process".to_string());
            recommendations.push("Raise chunk_size to reduce the number of vectors".to_string());
        }

        if row_count > LARGE_VECTOR_COUNT {
            recommendations.push("Large vector count, watch search latency".to_string());
        }

        if recommendations.is_empty() {
            recommendations.push("Index size is optimal".to_string());
        }

        recommendations
    }

    pub fn footprint(row_count: usize, vector_dim: usize) -> IndexFootprint {
        let estimated_bytes = Self::estimate_memory_bytes(row_count, vector_dim);
        IndexFootprint {
            estimated_bytes,
            category: Self::classify_size(estimated_bytes),
            recommendations: Self::recommendations(row_count, estimated_bytes),
        }
    }

    /// Create an IVF-PQ index on the embedding column when the table is big
    /// enough and has none yet
    pub async fn ensure_optimal_index(table: &Table, vector_dim: usize) -> Result<bool> {
        let row_count = table.count_rows(None).await?;
        let has_index = table
            .list_indices()
            .await?
            .iter()
            .any(|idx| idx.columns == vec!["embedding"]);

        if has_index {
            return Ok(false);
        }

        let params = Self::calculate_index_params(row_count, vector_dim);
        if !params.should_create_index {
            tracing::debug!(
                rows = row_count,
                "Skipping vector index, brute force is faster at this size"
            );
            return Ok(false);
        }

        tracing::info!(
            rows = row_count,
            partitions = params.num_partitions,
            sub_vectors = params.num_sub_vectors,
            "Creating vector index"
        );

        table
            .create_index(
                &["embedding"],
                Index::IvfPq(
                    lancedb::index::vector::IvfPqIndexBuilder::default()
                        .distance_type(params.distance_type)
                        .num_partitions(params.num_partitions)
                        .num_sub_vectors(params.num_sub_vectors)
                        .num_bits(params.num_bits as u32),
                ),
            )
            .execute()
            .await?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_tables_skip_index() {
        let params = VectorOptimizer::calculate_index_params(999, 1536);
        assert!(!params.should_create_index);
    }

    #[test]
    fn test_partitions_and_sub_vectors() {
        let params = VectorOptimizer::calculate_index_params(10_000, 1536);
        assert!(params.should_create_index);
        assert_eq!(params.num_partitions, 100);
        assert_eq!(params.num_sub_vectors, 96);
        assert_eq!(params.num_bits, 8);
    }

    #[test]
    fn test_parameters_are_clamped() {
        let huge = VectorOptimizer::calculate_index_params(1_000_000, 8);
        assert_eq!(huge.num_partitions, 256);
        assert_eq!(huge.num_sub_vectors, 1);
    }

    #[test]
    fn test_footprint_of_small_corpus() {
        let footprint = VectorOptimizer::footprint(500, 1536);
        assert_eq!(footprint.estimated_bytes, 500 * 1536 * 4);
        assert_eq!(footprint.category, SizeCategory::Small);
        assert_eq!(footprint.recommendations, vec!["Index size is optimal".to_string()]);
    }

    #[test]
    fn test_size_category_boundaries() {
        assert_eq!(VectorOptimizer::classify_size(50 * MB - 1), SizeCategory::Small);
        assert_eq!(VectorOptimizer::classify_size(50 * MB), SizeCategory::Medium);
        assert_eq!(VectorOptimizer::classify_size(200 * MB), SizeCategory::Large);
        assert_eq!(VectorOptimizer::classify_size(1000 * MB), SizeCategory::VeryLarge);
    }

    #[test]
    fn test_large_tables_get_advice() {
        // 100k vectors of 3072 dims is about 1.2 GB
        let footprint = VectorOptimizer::footprint(100_000, 3072);
        assert_eq!(footprint.category, SizeCategory::VeryLarge);
        assert_eq!(footprint.recommendations.len(), 3);
        assert!(footprint.recommendations[0].contains("Monitor memory"));
        assert!(footprint.recommendations[2].contains("vector count"));

        let huge = VectorOptimizer::footprint(200_000, 3072);
        assert!(huge.recommendations[0].contains("smaller embedding model"));
    }
}
