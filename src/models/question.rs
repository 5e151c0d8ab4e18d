// src/models/question.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One scraped question as stored in public.raw_questions.
/// Owned by the ingestion side; the merge engine only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawQuestion {
    pub id: Uuid,
    pub content: String,
    /// Translated / normalized English text produced upstream, if any.
    pub english_content: Option<String>,
    pub source: String,
    pub source_url: Option<String>,
    pub company: Option<String>,
    /// Single label assigned by the scraper.
    pub question_type: Option<String>,
    /// Multi-label classification assigned by the language model.
    pub llm_types: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
    pub published_at: Option<DateTime<Utc>>,
}

impl RawQuestion {
    /// Minimal constructor; optional fields start empty.
    pub fn new(id: Uuid, content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
            english_content: None,
            source: source.into(),
            source_url: None,
            company: None,
            question_type: None,
            llm_types: None,
            metadata: None,
            published_at: None,
        }
    }

    /// Text used both for embedding and for canonical selection:
    /// the English text when present and non-blank, otherwise the raw content.
    pub fn embed_text(&self) -> &str {
        match self.english_content.as_deref() {
            Some(english) if !english.trim().is_empty() => english,
            _ => &self.content,
        }
    }
}

/// The deduplicated question written to public.merged_questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedQuestion {
    pub id: Uuid,
    pub canonical_content: String,
    pub english_content: String,
    /// Primary label kept for single-label consumers (first of `question_types`).
    pub question_type: Option<String>,
    pub question_types: Vec<String>,
    pub frequency: i32,
    pub first_seen_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Provenance edge raw question -> merged question (public.question_mappings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionMapping {
    pub raw_question_id: Uuid,
    pub merged_question_id: Uuid,
    pub similarity_score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
}
