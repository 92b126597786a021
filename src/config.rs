// Copyright 2025 Muvon Un Limited
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

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::KnowledgeError;

const ENV_PREFIX: &str = "KOREKTOR_";

/// A fixed domain fact indexed as its own single-chunk document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactConfig {
    pub title: String,
    pub content: String,
}

/// Corpus locations and chunking parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    pub pdf_directory: PathBuf,
    pub urls_file: PathBuf,
    pub bibliography_file: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Overrides the default `<storage>/knowledge/<corpus id>` cache location
    pub cache_directory: Option<PathBuf>,
    pub facts: Vec<FactConfig>,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            pdf_directory: PathBuf::from("pdfs"),
            urls_file: PathBuf::from("urls.txt"),
            bibliography_file: PathBuf::from("bibliografia.csv"),
            chunk_size: 1000,
            chunk_overlap: 200,
            cache_directory: None,
            facts: Vec::new(),
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "openai:text-embedding-3-small".to_string(),
            batch_size: 32,
        }
    }
}

/// Text-completion service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub base_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.3,
            max_tokens: 1024,
            timeout_secs: 60,
        }
    }
}

/// Search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub max_chunks: usize,
    pub similarity_threshold: f32,
    /// Organisation names stripped from web page titles in citations
    pub title_prefixes: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_chunks: 5,
            similarity_threshold: 0.3,
            title_prefixes: vec![
                "Państwowy Fundusz Rehabilitacji Osób Niepełnosprawnych".to_string(),
                "PFRON".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { window: 5 }
    }
}

/// Prompt wording for the answering step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub language: String,
    pub persona: String,
    pub no_answer_message: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            language: "polski".to_string(),
            persona: "Jesteś ekspertem HR specjalizującym się w zatrudnianiu osób z niepełnosprawnościami w Polsce.".to_string(),
            no_answer_message:
                "Niestety, nie posiadam informacji na ten temat w mojej bazie wiedzy.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also write JSON logs with daily rotation to `<storage>/logs`
    pub file: bool,
}

/// Main configuration for korektor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub knowledge: KnowledgeConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub memory: MemoryConfig,
    pub assistant: AssistantConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from config.toml file
    /// First tries to load from system config directory, falls back to embedded template
    pub fn load() -> Result<Self> {
        let config_path = crate::storage::get_system_config_path()?;

        let mut config = if config_path.exists() {
            Self::from_file(&config_path)?
        } else {
            // Config doesn't exist, create from template
            let template_content = include_str!("../config-templates/default.toml");
            let config: Self = toml::from_str(template_content)?;

            if let Some(parent) = config_path.parent() {
                if !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(&config_path, template_content)?;

            config
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load an explicit config file, then apply environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Apply `KOREKTOR_*` overrides. The lookup is injected so tests do not
    /// touch the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(value) = var("PDF_DIR") {
            self.knowledge.pdf_directory = PathBuf::from(value);
        }
        if let Some(value) = var("URLS_FILE") {
            self.knowledge.urls_file = PathBuf::from(value);
        }
        if let Some(value) = var("BIBLIOGRAPHY_FILE") {
            self.knowledge.bibliography_file = PathBuf::from(value);
        }
        if let Some(value) = var("CHUNK_SIZE") {
            self.knowledge.chunk_size = value
                .parse()
                .with_context(|| format!("{}CHUNK_SIZE must be an integer", ENV_PREFIX))?;
        }
        if let Some(value) = var("CHUNK_OVERLAP") {
            self.knowledge.chunk_overlap = value
                .parse()
                .with_context(|| format!("{}CHUNK_OVERLAP must be an integer", ENV_PREFIX))?;
        }
        if let Some(value) = var("EMBEDDING_MODEL") {
            self.embedding.model = value;
        }
        if let Some(value) = var("LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = var("MAX_CHUNKS") {
            self.search.max_chunks = value
                .parse()
                .with_context(|| format!("{}MAX_CHUNKS must be an integer", ENV_PREFIX))?;
        }
        if let Some(value) = var("TEMPERATURE") {
            self.llm.temperature = value
                .parse()
                .with_context(|| format!("{}TEMPERATURE must be a number", ENV_PREFIX))?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), KnowledgeError> {
        let knowledge = &self.knowledge;
        if knowledge.chunk_size == 0 {
            return Err(KnowledgeError::Config(
                "chunk_size must be greater than 0".into(),
            ));
        }
        if knowledge.chunk_overlap >= knowledge.chunk_size {
            return Err(KnowledgeError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                knowledge.chunk_overlap, knowledge.chunk_size
            )));
        }
        if self.memory.window == 0 {
            return Err(KnowledgeError::Config(
                "memory window must be greater than 0".into(),
            ));
        }
        if self.search.max_chunks == 0 {
            return Err(KnowledgeError::Config(
                "max_chunks must be greater than 0".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(KnowledgeError::Config(format!(
                "temperature must be between 0 and 2, got {}",
                self.llm.temperature
            )));
        }
        if self.embedding.batch_size == 0 {
            return Err(KnowledgeError::Config(
                "embedding batch_size must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Directory holding the persisted vector index
    pub fn cache_directory(&self) -> Result<PathBuf> {
        match &self.knowledge.cache_directory {
            Some(dir) => Ok(dir.clone()),
            None => crate::storage::get_corpus_cache_path(&self.knowledge.pdf_directory),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_template_parses_and_validates() {
        let template = include_str!("../config-templates/default.toml");
        let config: Config = toml::from_str(template).unwrap();
        config.validate().unwrap();
        assert_eq!(config.knowledge.chunk_size, 1000);
        assert_eq!(config.knowledge.chunk_overlap, 200);
        assert_eq!(config.memory.window, 5);
        assert_eq!(config.search.max_chunks, 5);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str("[knowledge]\nchunk_size = 500\n").unwrap();
        assert_eq!(config.knowledge.chunk_size, 500);
        assert_eq!(config.knowledge.chunk_overlap, 200);
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("KOREKTOR_PDF_DIR", "/data/pdfs"),
            ("KOREKTOR_CHUNK_SIZE", "1500"),
            ("KOREKTOR_LLM_MODEL", "gpt-4o"),
            ("KOREKTOR_TEMPERATURE", "0.7"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.knowledge.pdf_directory, PathBuf::from("/data/pdfs"));
        assert_eq!(config.knowledge.chunk_size, 1500);
        assert_eq!(config.llm.model, "gpt-4o");
        assert!((config.llm.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = Config::default();
        let result = config.apply_env_overrides(|key| {
            (key == "KOREKTOR_CHUNK_SIZE").then(|| "lots".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_overlap_not_smaller_than_size() {
        let mut config = Config::default();
        config.knowledge.chunk_overlap = config.knowledge.chunk_size;
        assert!(matches!(
            config.validate(),
            Err(KnowledgeError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_temperature() {
        let mut config = Config::default();
        config.llm.temperature = 2.5;
        assert!(config.validate().is_err());
    }
}
