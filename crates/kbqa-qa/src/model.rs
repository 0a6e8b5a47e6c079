//! Model server clients
//!
//! The sequence tagger and the pair scorer are served over HTTP as JSON
//! endpoints. Both take the encoded tensors exactly as the encoder produced
//! them.

use std::time::Duration;

use async_trait::async_trait;
use kbqa_core::{
    EncodedInput, KbqaError, ModelConfig, PairScorer, Result, TagCode, TagPredictor,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| KbqaError::PredictorError(format!("Failed to build HTTP client: {e}")))
}

async fn post_json<Req, Resp>(client: &Client, url: &str, body: &Req) -> Result<Resp>
where
    Req: Serialize + ?Sized,
    Resp: for<'de> Deserialize<'de>,
{
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| KbqaError::PredictorError(format!("Request to {url} failed: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        return Err(KbqaError::PredictorError(format!(
            "{url} returned {status}: {error_text}"
        )));
    }

    response
        .json()
        .await
        .map_err(|e| KbqaError::PredictorError(format!("Failed to parse response: {e}")))
}

// ============================================================================
// Sequence tagger
// ============================================================================

/// Tag predictor backed by an HTTP model server
///
/// Request: `{"input_ids": [..], "attention_mask": [..], "token_type_ids": [..]}`
/// Response: `{"tags": [..]}`
pub struct HttpTagPredictor {
    client: Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct TagResponse {
    tags: Vec<TagCode>,
}

impl HttpTagPredictor {
    /// Create a new tagger client
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.into(),
        })
    }

    /// Create from config
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        Self::new(
            config.tagger_url.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Endpoint URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TagPredictor for HttpTagPredictor {
    async fn predict_tags(&self, input: &EncodedInput) -> Result<Vec<TagCode>> {
        let response: TagResponse = post_json(&self.client, &self.url, input).await?;
        Ok(response.tags)
    }

    fn name(&self) -> &str {
        "http-tagger"
    }
}

// ============================================================================
// Pair scorer
// ============================================================================

/// Pair scorer backed by an HTTP model server
///
/// Request: `{"instances": [{"input_ids": .., "attention_mask": .., "token_type_ids": ..}, ..]}`
/// Response: `{"logits": [[not_matching, matching], ..]}`
pub struct HttpPairScorer {
    client: Client,
    url: String,
}

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    instances: &'a [EncodedInput],
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    logits: Vec<Vec<f32>>,
}

impl HttpPairScorer {
    /// Create a new scorer client
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            url: url.into(),
        })
    }

    /// Create from config
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        Self::new(
            config.scorer_url.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Endpoint URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PairScorer for HttpPairScorer {
    async fn score_pairs(&self, batch: &[EncodedInput]) -> Result<Vec<Vec<f32>>> {
        let request = ScoreRequest { instances: batch };
        let response: ScoreResponse = post_json(&self.client, &self.url, &request).await?;

        tracing::debug!("Scored batch of {} pairs", batch.len());
        Ok(response.logits)
    }

    fn name(&self) -> &str {
        "http-scorer"
    }
}
