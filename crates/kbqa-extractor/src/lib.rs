//! KBQA Extractor - Question entity extraction
//!
//! Recognises the entity a question asks about from the per-character
//! output of a BIO sequence tagger.

use kbqa_core::Result;

/// Trait for question entity recognizers
#[async_trait::async_trait]
pub trait EntityRecognizer: Send + Sync {
    /// Entity mentioned in the question, or the empty string when none is found
    async fn recognize(&self, question: &str) -> Result<String>;
}

pub mod ner;
pub mod span;
pub mod tokenizer;

pub use ner::TaggingNer;
pub use span::{align, decode, entity_span, TagScheme};
pub use tokenizer::BertTextEncoder;
