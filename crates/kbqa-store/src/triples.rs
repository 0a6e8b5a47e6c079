//! NLPCC triple files
//!
//! One fact per line: `entity ||| attribute ||| answer`. Blank lines are
//! skipped; everything after the second separator belongs to the answer.

use std::path::Path;

use kbqa_core::{FactTriple, KbqaError, Result};

const SEPARATOR: &str = "|||";

/// Parse triple file content
pub fn parse_triples(content: &str) -> Result<Vec<FactTriple>> {
    let mut triples = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut fields = line.splitn(3, SEPARATOR).map(str::trim);
        let (Some(entity), Some(attribute), Some(answer)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(KbqaError::ParseError {
                line: idx + 1,
                message: format!("expected 3 fields separated by '{SEPARATOR}'"),
            });
        };

        if entity.is_empty() || attribute.is_empty() {
            return Err(KbqaError::ParseError {
                line: idx + 1,
                message: "empty entity or attribute".to_string(),
            });
        }

        triples.push(FactTriple::new(entity, attribute, answer));
    }

    Ok(triples)
}

/// Read and parse a triple file
pub async fn read_triples_file(path: impl AsRef<Path>) -> Result<Vec<FactTriple>> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        KbqaError::DatabaseError(format!("Failed to read {}: {e}", path.display()))
    })?;

    let triples = parse_triples(&content)?;
    tracing::info!("Read {} triples from {}", triples.len(), path.display());
    Ok(triples)
}
