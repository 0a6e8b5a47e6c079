//! Candidate ranking
//!
//! Picks which retrieved (attribute, answer) pair answers a question:
//! - Exact match: the first candidate whose attribute occurs in the question
//! - Semantic match: every (question, attribute) pair is scored by the pair
//!   scorer in fixed-size batches; the most probable match wins, provided at
//!   least one pair is predicted to match

use std::sync::Arc;

use kbqa_core::{
    Candidate, EncodedInput, KbqaError, MatchResult, PairScorer, RankerConfig, Result,
    TextEncoder,
};

/// Pairs scored per predictor call
pub const DEFAULT_BATCH_SIZE: usize = 128;

/// Encoded length of a (question, attribute) pair
pub const DEFAULT_MAX_LENGTH: usize = 64;

/// Class index of "matching" in the scorer output
const MATCHING: usize = 1;

/// Two-stage candidate ranker
pub struct CandidateRanker {
    encoder: Arc<dyn TextEncoder>,
    scorer: Arc<dyn PairScorer>,
    batch_size: usize,
    max_length: usize,
    pad_segment_id: i64,
}

impl CandidateRanker {
    /// Create a new ranker with default batching
    pub fn new(encoder: Arc<dyn TextEncoder>, scorer: Arc<dyn PairScorer>) -> Self {
        Self {
            encoder,
            scorer,
            batch_size: DEFAULT_BATCH_SIZE,
            max_length: DEFAULT_MAX_LENGTH,
            pad_segment_id: 1,
        }
    }

    /// Create from config
    pub fn from_config(
        encoder: Arc<dyn TextEncoder>,
        scorer: Arc<dyn PairScorer>,
        config: &RankerConfig,
    ) -> Self {
        Self::new(encoder, scorer)
            .with_batch_size(config.batch_size)
            .with_max_length(config.max_length)
            .with_pad_segment_id(config.pad_segment_id)
    }

    /// Set batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set encoded pair length
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    /// Set segment id of padding positions
    pub fn with_pad_segment_id(mut self, pad_segment_id: i64) -> Self {
        self.pad_segment_id = pad_segment_id;
        self
    }

    /// Index of the first candidate whose attribute occurs in the question.
    ///
    /// The scan stops at the first hit. A hit with an empty attribute or
    /// answer is not an answer, so `None` sends ranking on to the scorer.
    pub fn exact_match(question: &str, candidates: &[Candidate]) -> Option<usize> {
        let idx = candidates
            .iter()
            .position(|c| question.contains(&c.attribute))?;

        let hit = &candidates[idx];
        (!hit.attribute.is_empty() && !hit.answer.is_empty()).then_some(idx)
    }

    /// Rank candidates against a question
    pub async fn rank(&self, question: &str, candidates: &[Candidate]) -> Result<MatchResult> {
        if candidates.is_empty() {
            return Err(KbqaError::PreconditionViolation(
                "ranking requires at least one candidate".to_string(),
            ));
        }

        if let Some(idx) = Self::exact_match(question, candidates) {
            tracing::debug!("Exact match on attribute {}", candidates[idx].attribute);
            return Ok(MatchResult::Matched(idx));
        }

        self.semantic_match(question, candidates).await
    }

    /// Score every candidate with the pair scorer and select the best match
    pub async fn semantic_match(
        &self,
        question: &str,
        candidates: &[Candidate],
    ) -> Result<MatchResult> {
        let distributions = self.score(question, candidates).await?;
        let result = select(&distributions);

        tracing::debug!(
            "Semantic match over {} candidates: {:?}",
            candidates.len(),
            result
        );
        Ok(result)
    }

    /// Normalised {not-matching, matching} distribution per candidate, in order
    async fn score(&self, question: &str, candidates: &[Candidate]) -> Result<Vec<[f32; 2]>> {
        if self.batch_size == 0 {
            return Err(KbqaError::PreconditionViolation(
                "batch size must be at least 1".to_string(),
            ));
        }

        let inputs = candidates
            .iter()
            .map(|c| {
                self.encoder.encode_pair(
                    question,
                    &c.attribute,
                    self.max_length,
                    self.pad_segment_id,
                )
            })
            .collect::<Result<Vec<EncodedInput>>>()?;

        let mut distributions = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(self.batch_size) {
            let logits = self.scorer.score_pairs(batch).await?;
            if logits.len() != batch.len() {
                return Err(KbqaError::PredictorError(format!(
                    "{} returned {} rows for a batch of {}",
                    self.scorer.name(),
                    logits.len(),
                    batch.len()
                )));
            }

            for row in logits {
                let probs = softmax(&row);
                let &[not_matching, matching] = probs.as_slice() else {
                    return Err(KbqaError::PredictorError(format!(
                        "{} returned {} classes, expected 2",
                        self.scorer.name(),
                        row.len()
                    )));
                };
                distributions.push([not_matching, matching]);
            }
        }

        tracing::info!(
            "Scored {} candidates in {} batches",
            distributions.len(),
            inputs.len().div_ceil(self.batch_size)
        );
        Ok(distributions)
    }
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Predicted class of a distribution; ties go to the lower class
fn predicted_class(probs: &[f32; 2]) -> usize {
    if probs[MATCHING] > probs[1 - MATCHING] {
        MATCHING
    } else {
        1 - MATCHING
    }
}

/// Most probable match, or `NoMatch` when no candidate is predicted to match
fn select(distributions: &[[f32; 2]]) -> MatchResult {
    if !distributions.iter().any(|p| predicted_class(p) == MATCHING) {
        return MatchResult::NoMatch;
    }

    let mut best = 0;
    for (idx, probs) in distributions.iter().enumerate() {
        if probs[MATCHING] > distributions[best][MATCHING] {
            best = idx;
        }
    }
    MatchResult::Matched(best)
}

// ============================================================================
// Tests
// ============================================================================
