//! The LLM backend contract.
//!
//! Grounded on `src/llm/adapters/mod.rs`'s `LlmAdapter` trait and
//! `factory.rs`'s config-driven construction, generalised to `async-trait`
//! since every caller in this workspace is already tokio-async.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::EngineConfig;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm backend request failed: {0}")]
    Request(String),
    #[error("llm backend returned an unparseable response: {0}")]
    BadResponse(String),
    #[error("llm backend timed out")]
    Timeout,
}

/// A single chat-style message passed to `complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// The narrow surface every LLM-backed component in this workspace needs:
/// text completion for classification/adaptation prompts, and embedding
/// for similarity search. Concrete backends implement this once and are
/// otherwise invisible to callers.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Human-readable backend name, used in logs and the `status` CLI mode.
    fn provider_name(&self) -> &str;

    /// Produce a single completion for the given message history.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;

    /// Embed a single piece of text into a fixed-width vector. Callers may
    /// assume the returned vector always has `EngineConfig::embedding_dim`
    /// entries and is L2-normalised.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

/// Deterministic backend used by tests and the `demo` CLI mode. Never makes
/// a network call. `complete` echoes a canned reply derived from the last
/// user message; `embed` hashes the text into a stable pseudo-embedding so
/// that identical inputs always produce identical (and therefore
/// similarity-matchable) vectors.
pub struct StubBackend {
    embedding_dim: usize,
}

impl StubBackend {
    pub fn new(embedding_dim: usize) -> Self {
        Self { embedding_dim }
    }

    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self::new(cfg.embedding_dim)
    }
}

#[async_trait]
impl LlmBackend for StubBackend {
    fn provider_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let last = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("");
        Ok(format!("stub-response: {last}"))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        Ok(deterministic_embedding(text, self.embedding_dim))
    }
}

/// Hash-seeded, length-normalised pseudo-embedding. Same text always yields
/// the same vector; unrelated text yields near-orthogonal vectors, which is
/// all the pathway cache and decomposition learner need from a test double.
fn deterministic_embedding(text: &str, dim: usize) -> Vec<f32> {
    use sha2::{Digest, Sha256};

    let mut v = Vec::with_capacity(dim);
    let mut counter: u32 = 0;
    while v.len() < dim {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(counter.to_le_bytes());
        let digest = hasher.finalize();
        for chunk in digest.chunks(4) {
            if v.len() >= dim {
                break;
            }
            let mut bytes = [0u8; 4];
            bytes[..chunk.len()].copy_from_slice(chunk);
            let as_u32 = u32::from_le_bytes(bytes);
            v.push((as_u32 as f32 / u32::MAX as f32) * 2.0 - 1.0);
        }
        counter += 1;
    }
    normalize(&mut v);
    v
}

fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Concrete OpenAI-compatible completion/embedding backend. The one real
/// network implementation carried over from the teacher's multi-provider
/// adapter enum (GLM/Ollama dropped — see DESIGN.md).
pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    embedding_model: String,
}

impl OpenAiBackend {
    pub fn new(cfg: &EngineConfig, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: cfg.llm_base_url.clone(),
            api_key: api_key.into(),
            model: cfg.llm_model.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Deserialize)]
struct ChatCompletionChoice {
    message: ChatMessage,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    fn provider_name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let body = ChatCompletionRequest { model: &self.model, messages };
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let parsed: ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::BadResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::BadResponse("empty choices array".to_string()))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let body = EmbeddingRequest { model: &self.embedding_model, input: text };
        let resp = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::BadResponse(e.to_string()))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LlmError::BadResponse("empty embedding data array".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_embeddings_are_deterministic_and_normalised() {
        let backend = StubBackend::new(384);
        let a = backend.embed("list the files in /tmp").await.unwrap();
        let b = backend.embed("list the files in /tmp").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 384);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn stub_embeddings_differ_for_different_text() {
        let backend = StubBackend::new(384);
        let a = backend.embed("list the files in /tmp").await.unwrap();
        let b = backend.embed("delete all logs older than a week").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn stub_completion_echoes_last_user_message() {
        let backend = StubBackend::new(8);
        let out = backend
            .complete(&[ChatMessage::system("sys"), ChatMessage::user("hello")])
            .await
            .unwrap();
        assert!(out.contains("hello"));
    }
}
