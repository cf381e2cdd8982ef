//! Ollama embedding provider (`POST /api/embed`).

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::{EmbeddingModelSpec, EmbeddingProvider};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Blocking client for an Ollama server's embedding endpoint.
pub struct OllamaEmbeddingProvider {
    client: Client,
    endpoint: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbeddingProvider {
    pub fn new(spec: &EmbeddingModelSpec) -> Result<Self> {
        anyhow::ensure!(
            !spec.base_url.trim().is_empty(),
            "ollama provider requires embedding.base_url"
        );
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: embed_endpoint(&spec.base_url),
            model: spec.model.clone(),
        })
    }
}

impl EmbeddingProvider for OllamaEmbeddingProvider {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .with_context(|| format!("embedding request to {} failed", self.endpoint))?;

        anyhow::ensure!(
            response.status().is_success(),
            "ollama returned HTTP {} for model {}",
            response.status(),
            self.model
        );

        let body: EmbedResponse = response
            .json()
            .context("failed to decode ollama embedding response")?;
        anyhow::ensure!(
            body.embeddings.len() == texts.len(),
            "ollama returned {} embeddings for {} inputs",
            body.embeddings.len(),
            texts.len()
        );

        tracing::debug!(model = %self.model, count = texts.len(), "ollama batch embedded");
        Ok(body.embeddings)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

fn embed_endpoint(base_url: &str) -> String {
    format!("{}/api/embed", base_url.trim_end_matches('/'))
}
