// src/lib.rs
//! Similarity-based merging of interview questions collected from several sources.
//!
//! A rebuild fetches every raw question, embeds its text, groups near-duplicates
//! by cosine similarity and replaces the merged tables in one transaction.

pub mod clustering;
pub mod embedding;
pub mod merging;
pub mod models;
pub mod utils;
