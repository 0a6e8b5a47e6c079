//! KBQA QA - Question answering pipeline
//!
//! This crate answers a natural-language question from a fact store:
//! - Entity recognition over a BIO sequence tagger
//! - Fact retrieval for the recognised entity
//! - Two-stage candidate ranking (exact match, then semantic scoring)
//!
//! Unanswered entities are handed to a fallback lookup that runs in the
//! background and never affects the returned outcome. Call
//! [`KbqaOrchestrator::drain`] before exit to let those lookups finish.

use std::sync::Arc;
use std::time::Instant;

use kbqa_core::{
    AppConfig, Candidate, FactStore, FallbackLookup, MatchResult, QueryOutcome, Result,
};
use kbqa_extractor::{BertTextEncoder, EntityRecognizer, TagScheme, TaggingNer};

pub mod fallback;
pub mod model;
pub mod ranker;

pub use fallback::{parse_infobox, InfoboxLookup, NoopFallback};
pub use model::{HttpPairScorer, HttpTagPredictor};
pub use ranker::{softmax, CandidateRanker};

// ============================================================================
// Query states
// ============================================================================

/// Pipeline state of a single query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Start,
    EntityExtracted,
    NoEntity,
    CandidatesFetched,
    NoCandidates,
    Matched,
    NoMatch,
    Done,
}

impl QueryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::EntityExtracted => "ENTITY_EXTRACTED",
            Self::NoEntity => "NO_ENTITY",
            Self::CandidatesFetched => "CANDIDATES_FETCHED",
            Self::NoCandidates => "NO_CANDIDATES",
            Self::Matched => "MATCHED",
            Self::NoMatch => "NO_MATCH",
            Self::Done => "DONE",
        }
    }
}

impl std::fmt::Display for QueryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// KBQA orchestrator
///
/// Runs one question through recognition, retrieval and ranking. Stages are
/// awaited strictly in order with no retries.
pub struct KbqaOrchestrator {
    recognizer: Arc<dyn EntityRecognizer>,
    store: Arc<dyn FactStore>,
    ranker: CandidateRanker,
    fallback: Arc<dyn FallbackLookup>,
}

impl KbqaOrchestrator {
    /// Create a new orchestrator
    pub fn new(
        recognizer: Arc<dyn EntityRecognizer>,
        store: Arc<dyn FactStore>,
        ranker: CandidateRanker,
        fallback: Arc<dyn FallbackLookup>,
    ) -> Self {
        Self {
            recognizer,
            store,
            ranker,
            fallback,
        }
    }

    /// Build the production pipeline from config around an existing store
    pub fn from_config(config: &AppConfig, store: Arc<dyn FactStore>) -> Result<Self> {
        let encoder = Arc::new(BertTextEncoder::from_file(&config.model.tokenizer_path)?);
        let tagger = Arc::new(HttpTagPredictor::from_config(&config.model)?);
        let scorer = Arc::new(HttpPairScorer::from_config(&config.model)?);

        let recognizer = TaggingNer::new(encoder.clone(), tagger)
            .with_scheme(TagScheme::from_config(&config.tagging)?)
            .with_max_length(config.model.max_length);
        let ranker = CandidateRanker::from_config(encoder, scorer, &config.ranker);

        let fallback: Arc<dyn FallbackLookup> = if config.fallback.enabled {
            Arc::new(InfoboxLookup::from_config(&config.fallback, store.clone())?)
        } else {
            Arc::new(NoopFallback)
        };

        Ok(Self::new(Arc::new(recognizer), store, ranker, fallback))
    }

    /// Answer a question
    pub async fn query(&self, question: &str) -> Result<QueryOutcome> {
        let start_time = Instant::now();
        tracing::debug!(state = %QueryState::Start, "Query started");

        let entity = self.recognizer.recognize(question).await?;
        tracing::debug!(state = %QueryState::EntityExtracted, entity = %entity);

        let outcome = if entity.is_empty() {
            tracing::debug!(state = %QueryState::NoEntity);
            QueryOutcome::NoEntity
        } else {
            self.answer_for_entity(question, entity).await?
        };

        if outcome.needs_fallback() {
            if let Some(entity) = outcome.entity() {
                self.fallback.trigger(entity);
            }
        }

        tracing::debug!(state = %QueryState::Done);
        tracing::info!(
            "Query finished in {}ms: {}",
            start_time.elapsed().as_millis(),
            outcome
        );
        Ok(outcome)
    }

    /// Answer a question as display text
    pub async fn answer(&self, question: &str) -> Result<String> {
        Ok(self.query(question).await?.to_string())
    }

    /// Wait for background fallback lookups before shutdown
    pub async fn drain(&self) {
        self.fallback.drain().await;
    }

    async fn answer_for_entity(&self, question: &str, entity: String) -> Result<QueryOutcome> {
        let facts = self.store.find_by_entity(&entity).await?;
        let (attributes, answers) = facts
            .into_iter()
            .map(|fact| (fact.attribute, fact.answer))
            .unzip();
        let mut candidates = Candidate::zip(attributes, answers)?;
        tracing::debug!(
            state = %QueryState::CandidatesFetched,
            "{} candidates from {}",
            candidates.len(),
            self.store.name()
        );

        if candidates.is_empty() {
            tracing::debug!(state = %QueryState::NoCandidates);
            return Ok(QueryOutcome::NoCandidates { entity });
        }

        match self.ranker.rank(question, &candidates).await? {
            MatchResult::Matched(idx) => {
                tracing::debug!(state = %QueryState::Matched, index = idx);
                let Candidate { attribute, answer } = candidates.swap_remove(idx);
                Ok(QueryOutcome::Matched {
                    entity,
                    attribute,
                    answer,
                })
            }
            MatchResult::NoMatch => {
                tracing::debug!(state = %QueryState::NoMatch);
                Ok(QueryOutcome::NoMatch { entity })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(QueryState::EntityExtracted.to_string(), "ENTITY_EXTRACTED");
        assert_eq!(QueryState::NoCandidates.as_str(), "NO_CANDIDATES");
    }
}
