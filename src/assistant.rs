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

//! Entry point for application code: one knowledge base, many conversations.

use std::sync::Arc;

use crate::completion::{Completer, OpenAiCompleter};
use crate::config::Config;
use crate::embedding::{Embedder, OctolibEmbedder};
use crate::error::KnowledgeResult;
use crate::knowledge::answerer::{AnswerSettings, RetrievalAnswerer};
use crate::knowledge::manager::KnowledgeBaseManager;
use crate::knowledge::types::{Answer, KnowledgeStats, ReloadOutcome, SourceDocument};
use crate::memory::{ConversationMemory, ConversationTurn};

pub struct KnowledgeAssistant {
    manager: KnowledgeBaseManager,
    answerer: RetrievalAnswerer,
    memory_window: usize,
}

impl KnowledgeAssistant {
    pub fn new(manager: KnowledgeBaseManager, answerer: RetrievalAnswerer, memory_window: usize) -> Self {
        Self {
            manager,
            answerer,
            memory_window,
        }
    }

    /// Connect the configured embedding provider, completion endpoint and
    /// cache directory. Does not build the knowledge base.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::new(OctolibEmbedder::from_config(config).await?);
        let completer: Arc<dyn Completer> = Arc::new(OpenAiCompleter::from_config(&config.llm)?);

        let manager = KnowledgeBaseManager::from_config(config, embedder.clone()).await?;
        let answerer = RetrievalAnswerer::new(embedder, completer, AnswerSettings::from_config(config));

        Ok(Self::new(manager, answerer, config.memory.window))
    }

    /// Fresh conversation sized by the configured window
    pub fn new_conversation(&self) -> ConversationMemory {
        ConversationMemory::new(self.memory_window)
    }

    pub async fn initialize(&self) -> KnowledgeResult<ReloadOutcome> {
        self.manager.initialize().await
    }

    pub fn has_changes(&self) -> bool {
        self.manager.has_changes()
    }

    pub async fn reload_if_needed(&self) -> KnowledgeResult<bool> {
        self.manager.reload_if_needed().await
    }

    pub async fn force_reload(&self) -> KnowledgeResult<bool> {
        self.manager.force_reload().await
    }

    /// Answer from the current snapshot and record the turn in `memory`.
    /// A failed answer leaves `memory` untouched.
    pub async fn answer(&self, question: &str, memory: &mut ConversationMemory) -> KnowledgeResult<Answer> {
        let snapshot = self.manager.snapshot();
        let answer = self
            .answerer
            .answer(snapshot.as_deref(), question, memory)
            .await?;
        memory.append(ConversationTurn::new(question.trim(), answer.answer.clone()));
        Ok(answer)
    }

    pub fn stats(&self, memory: &ConversationMemory) -> KnowledgeStats {
        self.manager.stats(memory.len())
    }

    pub fn sources(&self) -> Vec<SourceDocument> {
        self.manager.documents()
    }

    pub async fn clear_cache(&self) -> KnowledgeResult<usize> {
        self.manager.clear_cache().await
    }
}
