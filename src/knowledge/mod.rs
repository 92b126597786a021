pub mod answerer;
pub mod bibliography;
pub mod chunker;
pub mod extract;
pub mod fetch;
pub mod fingerprint;
pub mod formatting;
pub mod loader;
pub mod manager;
pub mod store;
pub mod structure;
pub mod types;


pub use answerer::{AnswerSettings, RetrievalAnswerer};
pub use bibliography::BibliographyResolver;
pub use chunker::StructuralChunker;
pub use loader::CorpusLoader;
pub use manager::{KnowledgeBaseManager, KnowledgeBaseState};
pub use types::*;
