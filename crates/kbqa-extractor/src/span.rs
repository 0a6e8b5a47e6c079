//! Entity span decoding
//!
//! Turns a per-character BIO tag sequence into a single contiguous entity.
//! Only the first span is ever returned; a leading inside label with no
//! begin label still opens a span.

use std::ops::Range;

use kbqa_core::{KbqaError, Result, TagCode, TaggingConfig};

/// Begin/inside codes of a tag scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagScheme {
    pub begin: TagCode,
    pub inside: TagCode,
}

impl TagScheme {
    /// Create from explicit codes
    pub fn new(begin: TagCode, inside: TagCode) -> Self {
        Self { begin, inside }
    }

    /// Resolve codes from label names; a label's code is its index
    pub fn from_labels(labels: &[String], begin_label: &str, inside_label: &str) -> Result<Self> {
        let code_of = |label: &str| {
            labels
                .iter()
                .position(|l| l == label)
                .map(|idx| idx as TagCode)
                .ok_or_else(|| {
                    KbqaError::ConfigError(format!("tag label {label} not in scheme {labels:?}"))
                })
        };

        Ok(Self {
            begin: code_of(begin_label)?,
            inside: code_of(inside_label)?,
        })
    }

    /// Create from configuration
    pub fn from_config(config: &TaggingConfig) -> Result<Self> {
        Self::from_labels(&config.labels, &config.begin_label, &config.inside_label)
    }
}

impl Default for TagScheme {
    /// `["O", "B-LOC", "I-LOC"]`
    fn default() -> Self {
        Self::new(1, 2)
    }
}

/// Locate the first entity span in a tag sequence
pub fn entity_span(tags: &[TagCode], scheme: &TagScheme) -> Option<Range<usize>> {
    let start = tags
        .iter()
        .position(|&t| t == scheme.begin)
        .or_else(|| tags.iter().position(|&t| t == scheme.inside))?;

    let run = tags[start + 1..]
        .iter()
        .take_while(|&&t| t == scheme.inside)
        .count();

    Some(start..start + 1 + run)
}

/// Decode the entity covered by `tags` over `chars`.
///
/// Returns the empty string when the sequence holds no begin or inside label.
pub fn decode(tags: &[TagCode], chars: &[char], scheme: &TagScheme) -> Result<String> {
    if tags.len() != chars.len() {
        return Err(KbqaError::PreconditionViolation(format!(
            "tag/char length mismatch: {} vs {}",
            tags.len(),
            chars.len()
        )));
    }

    Ok(entity_span(tags, scheme)
        .map(|span| chars[span].iter().collect())
        .unwrap_or_default())
}

/// Align tagger output with the question characters.
///
/// The tagger yields either one tag per character or `max_length - 2` tags
/// (special tokens removed, padding positions kept). Questions longer than
/// the window lose their leading characters, matching left truncation in
/// the encoder.
pub fn align<'a>(
    tags: &'a [TagCode],
    chars: &'a [char],
    max_length: usize,
) -> Result<(&'a [TagCode], &'a [char])> {
    if tags.len() == chars.len() {
        return Ok((tags, chars));
    }

    let window = max_length.saturating_sub(2);
    if tags.len() != window {
        return Err(KbqaError::PreconditionViolation(format!(
            "tagger returned {} tags for {} chars (window {window})",
            tags.len(),
            chars.len()
        )));
    }

    if chars.len() < window {
        Ok((&tags[..chars.len()], chars))
    } else {
        Ok((tags, &chars[chars.len() - window..]))
    }
}
