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

/// Errors surfaced by the knowledge base and the answering pipeline.
///
/// Per-source problems never show up here: the corpus loader logs and skips
/// them (see [`SourceError`]). Only conditions that stop the system from
/// producing grounded answers cross the public API.
#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    /// Embedding or completion service failed.
    #[error("backend service failed during {operation}: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("no chunks could be produced from any configured source")]
    EmptyCorpus,

    #[error("vector index error: {0}")]
    Index(#[source] anyhow::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl KnowledgeError {
    pub fn backend(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Backend { operation, source }
    }

    /// True for failures of the external embedding or completion services.
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend { .. })
    }
}

/// Failure to turn a single source into chunks. Recovered locally.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("PDF extraction failed for {path}: {message}")]
    Pdf { path: String, message: String },

    #[error("fetching {url} failed: {message}")]
    Fetch { url: String, message: String },

    #[error("{0} produced no usable text")]
    Empty(String),
}

pub type KnowledgeResult<T> = std::result::Result<T, KnowledgeError>;
