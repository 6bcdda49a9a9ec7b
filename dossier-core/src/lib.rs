//! # Dossier Core
//!
//! Library behind the `dossier` research CLI: the research pipeline, its
//! pluggable stages, the generation and embedding backends it talks to,
//! and the configuration that wires them together.

pub mod brain;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod providers;
pub mod research;

pub use brain::{CompletionRequest, CompletionResponse, LlmProvider, MockLlmProvider};
pub use config::{AppConfig, load_config};
pub use embeddings::{Embedder, LocalEmbedder, create_embedder};
pub use error::{DossierError, ResearchError, Result};
pub use providers::create_provider;
pub use research::{ResearchBrief, ResearchConfig, ResearchEngine};
