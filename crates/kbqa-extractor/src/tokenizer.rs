//! WordPiece text encoder backed by a HuggingFace `tokenizer.json`
//!
//! Produces BERT-style `[CLS] a [SEP] b [SEP]` inputs, truncated longest-first
//! from the left and right-padded to a fixed length.

use std::path::Path;
use std::sync::Mutex;

use kbqa_core::{EncodedInput, KbqaError, Result, TextEncoder};
use tokenizers::{
    EncodeInput, Encoding, Tokenizer, TruncationDirection, TruncationParams, TruncationStrategy,
};

/// Padding token id of BERT vocabularies
pub const PAD_TOKEN_ID: i64 = 0;

/// BERT text encoder
///
/// The tokenizer sits behind a `Mutex` because truncation is configured
/// on the tokenizer itself and follows the `max_length` of each call.
pub struct BertTextEncoder {
    tokenizer: Mutex<Tokenizer>,
}

impl BertTextEncoder {
    /// Load from a tokenizer.json file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = Tokenizer::from_file(path).map_err(|e| {
            KbqaError::EncodingError(format!(
                "Cannot load tokenizer from '{}': {e}",
                path.display()
            ))
        })?;

        tracing::info!("Loaded tokenizer from {}", path.display());
        Ok(Self::new(tokenizer))
    }

    /// Wrap an existing tokenizer
    pub fn new(mut tokenizer: Tokenizer) -> Self {
        // Padding is applied by EncodedInput::padded
        tokenizer.with_padding(None);
        Self {
            tokenizer: Mutex::new(tokenizer),
        }
    }

    fn encode_with<'s>(
        &self,
        input: impl Into<EncodeInput<'s>>,
        max_length: usize,
        pad_segment_id: i64,
    ) -> Result<EncodedInput> {
        let mut tokenizer = self
            .tokenizer
            .lock()
            .map_err(|_| KbqaError::EncodingError("Tokenizer lock poisoned".to_string()))?;

        if tokenizer.get_truncation().map(|t| t.max_length) != Some(max_length) {
            tokenizer
                .with_truncation(Some(TruncationParams {
                    max_length,
                    strategy: TruncationStrategy::LongestFirst,
                    direction: TruncationDirection::Left,
                    ..Default::default()
                }))
                .map_err(|e| KbqaError::EncodingError(format!("Invalid truncation: {e}")))?;
        }

        let encoding = tokenizer
            .encode(input, true)
            .map_err(|e| KbqaError::EncodingError(format!("Tokenization failed: {e}")))?;

        to_encoded_input(&encoding, max_length, pad_segment_id)
    }
}

fn to_encoded_input(
    encoding: &Encoding,
    max_length: usize,
    pad_segment_id: i64,
) -> Result<EncodedInput> {
    let input_ids = encoding.get_ids().iter().map(|&id| id as i64).collect();
    let token_type_ids = encoding
        .get_type_ids()
        .iter()
        .map(|&id| id as i64)
        .collect();

    EncodedInput::padded(
        input_ids,
        token_type_ids,
        max_length,
        PAD_TOKEN_ID,
        pad_segment_id,
    )
}

impl TextEncoder for BertTextEncoder {
    fn encode(&self, text: &str, max_length: usize) -> Result<EncodedInput> {
        self.encode_with(text, max_length, 0)
    }

    fn encode_pair(
        &self,
        text: &str,
        pair: &str,
        max_length: usize,
        pad_segment_id: i64,
    ) -> Result<EncodedInput> {
        self.encode_with((text, pair), max_length, pad_segment_id)
    }
}
