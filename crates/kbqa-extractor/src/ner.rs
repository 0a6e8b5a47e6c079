//! Tagging-based Named Entity Recognition (NER)
//!
//! Encodes the question one character per token, asks the tag predictor
//! for a label per character and decodes the first entity span.

use std::sync::Arc;

use kbqa_core::{Result, TagPredictor, TextEncoder};

use crate::span::{self, TagScheme};
use crate::EntityRecognizer;

/// Default encoded question length
pub const DEFAULT_MAX_LENGTH: usize = 64;

/// NER over an opaque sequence-tagging model
pub struct TaggingNer {
    encoder: Arc<dyn TextEncoder>,
    predictor: Arc<dyn TagPredictor>,
    scheme: TagScheme,
    max_length: usize,
}

impl TaggingNer {
    /// Create a new tagging NER with the default `O/B-LOC/I-LOC` scheme
    pub fn new(encoder: Arc<dyn TextEncoder>, predictor: Arc<dyn TagPredictor>) -> Self {
        Self {
            encoder,
            predictor,
            scheme: TagScheme::default(),
            max_length: DEFAULT_MAX_LENGTH,
        }
    }

    /// Set tag scheme
    pub fn with_scheme(mut self, scheme: TagScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Set encoded length
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    /// Characters the tagger labels: the trimmed question without whitespace
    pub fn question_chars(question: &str) -> Vec<char> {
        question
            .trim()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect()
    }

    /// Extract the entity of a question; empty when none is tagged
    pub async fn extract_entity(&self, question: &str) -> Result<String> {
        let chars = Self::question_chars(question);
        if chars.is_empty() {
            tracing::info!("Empty question, no entity");
            return Ok(String::new());
        }

        // One token per character
        let text = chars
            .iter()
            .map(char::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        let input = self.encoder.encode(&text, self.max_length)?;
        tracing::debug!("Encoded {} of {} positions", input.real_len(), input.len());

        let tags = self.predictor.predict_tags(&input).await?;
        tracing::debug!(
            "{} returned {} tags for {} chars",
            self.predictor.name(),
            tags.len(),
            chars.len()
        );

        let (tags, chars) = span::align(&tags, &chars, self.max_length)?;
        let entity = span::decode(tags, chars, &self.scheme)?;

        if entity.is_empty() {
            tracing::info!("No entity found in question [{}]", question);
        } else {
            tracing::debug!("Entity: {}", entity);
        }

        Ok(entity)
    }
}

#[async_trait::async_trait]
impl EntityRecognizer for TaggingNer {
    async fn recognize(&self, question: &str) -> Result<String> {
        self.extract_entity(question).await
    }
}

// ============================================================================
// Tests
// ============================================================================
