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

use async_trait::async_trait;

// Re-export embedding functionality from octolib
pub use octolib::embedding::{
    parse_provider_model, provider::create_embedding_provider_from_parts,
    provider::EmbeddingProvider, types::InputType,
};

/// Text to vector capability used by indexing and retrieval
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    async fn embed_batch(&self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>>;

    /// Identifier recorded with the index; a different model invalidates it
    fn model_id(&self) -> &str;
}

/// Create embedding provider from config
pub async fn create_embedding_provider(
    config: &crate::config::Config,
) -> anyhow::Result<Box<dyn EmbeddingProvider>> {
    let (provider, model) = parse_provider_model(&config.embedding.model)?;
    create_embedding_provider_from_parts(&provider, &model).await
}

/// Generate embeddings for a single text
pub async fn generate_embedding(
    text: &str,
    provider: &dyn EmbeddingProvider,
) -> anyhow::Result<Vec<f32>> {
    provider.generate_embedding(text).await
}

/// Generate embeddings for multiple texts using batch API
pub async fn generate_embeddings_batch(
    texts: Vec<String>,
    provider: &dyn EmbeddingProvider,
) -> anyhow::Result<Vec<Vec<f32>>> {
    provider
        .generate_embeddings_batch(texts, InputType::None)
        .await
}

/// [`Embedder`] backed by an octolib provider (`provider:model` strings)
pub struct OctolibEmbedder {
    provider: Box<dyn EmbeddingProvider>,
    model: String,
}

impl OctolibEmbedder {
    pub async fn from_config(config: &crate::config::Config) -> anyhow::Result<Self> {
        let provider = create_embedding_provider(config).await?;
        Ok(Self {
            provider,
            model: config.embedding.model.clone(),
        })
    }
}

#[async_trait]
impl Embedder for OctolibEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        generate_embedding(text, self.provider.as_ref()).await
    }

    async fn embed_batch(&self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>> {
        let expected = texts.len();
        let vectors = generate_embeddings_batch(texts, self.provider.as_ref()).await?;
        anyhow::ensure!(
            vectors.len() == expected,
            "Embedding provider returned {} vectors for {} texts",
            vectors.len(),
            expected
        );
        Ok(vectors)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
