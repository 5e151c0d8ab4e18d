// src/embedding/mod.rs

pub mod embedder;
pub mod openai;

pub use embedder::{embed_texts, Embedder};
pub use openai::OpenAiEmbedder;
