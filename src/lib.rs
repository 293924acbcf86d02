pub mod chunking;
pub mod config;
pub mod context;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod llm;
pub mod memory;
pub mod ollama;
pub mod pipeline;
pub mod rag;
pub mod similarity;

pub use error::{Error, ProviderError, Result};
