//! KBQA Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout the KBQA system:
//! - Fact triples and the (attribute, answer) candidates ranked per query
//! - Encoded model inputs shared by both predictors
//! - Query outcomes and the user-facing messages they render to
//! - Common error types
//! - Collaborator traits (encoder, predictors, fact store, fallback lookup)
//! - Configuration management

pub mod config;

pub use config::{
    AppConfig, ConfigError, DatabaseConfig, FallbackConfig, LoggingConfig, ModelConfig,
    RankerConfig, TaggingConfig,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for KBQA operations
#[derive(Error, Debug)]
pub enum KbqaError {
    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("Predictor error: {0}")]
    PredictorError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Lookup error: {0}")]
    LookupError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Parse error at line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ConfigError> for KbqaError {
    fn from(err: ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KbqaError>;

// ============================================================================
// Knowledge Base Models
// ============================================================================

/// Label code emitted by the sequence tagger, one per input character
pub type TagCode = u32;

/// A row of the fact store: (entity, attribute, answer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactTriple {
    pub entity: String,
    pub attribute: String,
    pub answer: String,
}

impl FactTriple {
    /// Create a new triple
    pub fn new(
        entity: impl Into<String>,
        attribute: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            attribute: attribute.into(),
            answer: answer.into(),
        }
    }
}

/// An (attribute, answer) pair retrieved for one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub attribute: String,
    pub answer: String,
}

impl Candidate {
    /// Create a new candidate
    pub fn new(attribute: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            answer: answer.into(),
        }
    }

    /// Pair attribute and answer columns positionally.
    ///
    /// Lists of different length are rejected rather than truncated.
    pub fn zip(attributes: Vec<String>, answers: Vec<String>) -> Result<Vec<Candidate>> {
        if attributes.len() != answers.len() {
            return Err(KbqaError::PreconditionViolation(format!(
                "attribute/answer length mismatch: {} vs {}",
                attributes.len(),
                answers.len()
            )));
        }

        Ok(attributes
            .into_iter()
            .zip(answers)
            .map(|(attribute, answer)| Candidate { attribute, answer })
            .collect())
    }
}

// ============================================================================
// Ranking and Query Outcomes
// ============================================================================

/// Result of ranking candidates against a question
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    /// Index of the selected candidate
    Matched(usize),
    /// No candidate answers the question
    NoMatch,
}

/// Message returned when the question contains no entity
pub const NO_ENTITY_MESSAGE: &str = "未发现实体";

/// Terminal state of a single query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// The tagger found no entity in the question
    NoEntity,
    /// The store holds no facts for the entity
    NoCandidates { entity: String },
    /// Facts exist but none answers the question
    NoMatch { entity: String },
    /// A fact answers the question
    Matched {
        entity: String,
        attribute: String,
        answer: String,
    },
}

impl QueryOutcome {
    /// Entity the query resolved to, if any
    pub fn entity(&self) -> Option<&str> {
        match self {
            Self::NoEntity => None,
            Self::NoCandidates { entity }
            | Self::NoMatch { entity }
            | Self::Matched { entity, .. } => Some(entity),
        }
    }

    /// Whether this outcome triggers the fallback lookup
    pub fn needs_fallback(&self) -> bool {
        matches!(self, Self::NoCandidates { .. } | Self::NoMatch { .. })
    }
}

impl std::fmt::Display for QueryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoEntity => write!(f, "{NO_ENTITY_MESSAGE}"),
            Self::NoCandidates { entity } | Self::NoMatch { entity } => {
                write!(f, "未找到 {entity} 相关信息，尝试通过网络查找...")
            }
            Self::Matched {
                entity,
                attribute,
                answer,
            } => write!(f, "{entity}的{attribute}是{answer}"),
        }
    }
}

// ============================================================================
// Encoded Model Inputs
// ============================================================================

/// Fixed-length model input shared by the tagger and the pair scorer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedInput {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub token_type_ids: Vec<i64>,
}

impl EncodedInput {
    /// Build from already padded arrays, checking all three have `max_length` entries
    pub fn new(
        input_ids: Vec<i64>,
        attention_mask: Vec<i64>,
        token_type_ids: Vec<i64>,
        max_length: usize,
    ) -> Result<Self> {
        for (name, len) in [
            ("input_ids", input_ids.len()),
            ("attention_mask", attention_mask.len()),
            ("token_type_ids", token_type_ids.len()),
        ] {
            if len != max_length {
                return Err(KbqaError::PreconditionViolation(format!(
                    "Error with input length {name}: {len} vs {max_length}"
                )));
            }
        }

        Ok(Self {
            input_ids,
            attention_mask,
            token_type_ids,
        })
    }

    /// Right-pad unpadded token and segment ids to `max_length`.
    ///
    /// Token ids pad with `pad_token`, the attention mask with 0 and segment
    /// ids with `pad_segment_id`. Sequences longer than `max_length` are an
    /// error: truncation belongs to the encoder.
    pub fn padded(
        mut input_ids: Vec<i64>,
        mut token_type_ids: Vec<i64>,
        max_length: usize,
        pad_token: i64,
        pad_segment_id: i64,
    ) -> Result<Self> {
        if input_ids.len() != token_type_ids.len() {
            return Err(KbqaError::PreconditionViolation(format!(
                "token/segment length mismatch: {} vs {}",
                input_ids.len(),
                token_type_ids.len()
            )));
        }
        if input_ids.len() > max_length {
            return Err(KbqaError::PreconditionViolation(format!(
                "sequence of {} tokens exceeds max length {max_length}",
                input_ids.len()
            )));
        }

        let mut attention_mask = vec![1; input_ids.len()];
        input_ids.resize(max_length, pad_token);
        attention_mask.resize(max_length, 0);
        token_type_ids.resize(max_length, pad_segment_id);

        Self::new(input_ids, attention_mask, token_type_ids, max_length)
    }

    /// Padded length
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Number of non-padding positions
    pub fn real_len(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m != 0).count()
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Turns raw text into fixed-length model inputs
pub trait TextEncoder: Send + Sync {
    /// Encode a single sequence; segment ids pad with 0
    fn encode(&self, text: &str, max_length: usize) -> Result<EncodedInput>;

    /// Encode a (text, pair) sequence pair
    fn encode_pair(
        &self,
        text: &str,
        pair: &str,
        max_length: usize,
        pad_segment_id: i64,
    ) -> Result<EncodedInput>;
}

/// Sequence-tagging model: one label code per input character
#[async_trait::async_trait]
pub trait TagPredictor: Send + Sync {
    /// Predict tags for one encoded question, special tokens excluded
    async fn predict_tags(&self, input: &EncodedInput) -> Result<Vec<TagCode>>;

    /// Get predictor name for logging
    fn name(&self) -> &str;
}

/// Pairwise relevance model over (question, attribute) pairs
#[async_trait::async_trait]
pub trait PairScorer: Send + Sync {
    /// Raw logits over {not-matching, matching}, one row per input, in order
    async fn score_pairs(&self, batch: &[EncodedInput]) -> Result<Vec<Vec<f32>>>;

    /// Get scorer name for logging
    fn name(&self) -> &str;
}

/// Storage of (entity, attribute, answer) facts
#[async_trait::async_trait]
pub trait FactStore: Send + Sync {
    /// All facts for an entity in retrieval order; empty when the entity is unknown
    async fn find_by_entity(&self, entity: &str) -> Result<Vec<FactTriple>>;

    /// Store a single fact
    async fn insert(&self, triple: &FactTriple) -> Result<()>;

    /// Store many facts, returning how many were written
    async fn insert_batch(&self, triples: &[FactTriple]) -> Result<u64> {
        let mut written = 0;
        for triple in triples {
            self.insert(triple).await?;
            written += 1;
        }
        Ok(written)
    }

    /// Get store name for logging
    fn name(&self) -> &str;
}

/// Best-effort external search for an entity the local store cannot answer.
///
/// `trigger` must return immediately; the query never consumes the result.
/// Work started by `trigger` may outlive the query and is awaited by `drain`.
#[async_trait::async_trait]
pub trait FallbackLookup: Send + Sync {
    fn trigger(&self, entity: &str);

    /// Wait for every lookup started so far
    async fn drain(&self) {}
}

// ============================================================================
// Tests
// ============================================================================
