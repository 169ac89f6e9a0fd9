//! Google Gemini fragment source
//!
//! SECURITY: the API key is ONLY sent to the configured Gemini endpoint.

use super::prompt::SYSTEM_PROMPT;
use super::streaming::SseDecoder;
use super::{FragmentSource, FragmentStream, LlmError, Message, Role};
use crate::config::GeminiConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::env;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_stream::wrappers::ReceiverStream;

/// Official Google Gemini API endpoint
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Abort the turn if the service goes silent for this long
const STREAM_CHUNK_TIMEOUT: Duration = Duration::from_secs(60);

pub struct GeminiSource {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    base_url: String,
}

impl GeminiSource {
    /// Create a source using `GEMINI_API_KEY` from the environment
    pub fn new(config: &GeminiConfig) -> Result<Self> {
        let api_key =
            env::var("GEMINI_API_KEY").context("GEMINI_API_KEY environment variable not set")?;
        if api_key.trim().is_empty() {
            anyhow::bail!("GEMINI_API_KEY is empty");
        }
        Ok(Self::with_api_key(api_key, config))
    }

    pub fn with_api_key(api_key: impl Into<String>, config: &GeminiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            base_url: GEMINI_API_BASE.to_string(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn build_request(&self, messages: &[Message]) -> GeminiRequest {
        let mut system = vec![SYSTEM_PROMPT.to_string()];
        let mut contents: Vec<GeminiContent> = Vec::new();

        for msg in messages {
            let role = match msg.role {
                Role::System => {
                    system.push(msg.content.clone());
                    continue;
                }
                Role::User => "user",
                // Gemini expects the conversation to open with a user turn
                Role::Assistant if contents.is_empty() => continue,
                Role::Assistant => "model",
            };
            contents.push(GeminiContent {
                role: role.to_string(),
                parts: vec![GeminiPart {
                    text: Some(msg.content.clone()),
                }],
            });
        }

        GeminiRequest {
            contents,
            system_instruction: GeminiSystemInstruction {
                parts: vec![GeminiPart {
                    text: Some(system.join("\n\n")),
                }],
            },
            generation_config: GeminiGenerationConfig {
                max_output_tokens: self.max_tokens,
                temperature: self.temperature,
            },
        }
    }
}

#[async_trait]
impl FragmentSource for GeminiSource {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn stream_turn(&self, messages: &[Message]) -> Result<FragmentStream, LlmError> {
        let request = self.build_request(messages);
        let url = format!(
            "{}/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, self.model, self.api_key
        );

        tracing::debug!(
            "Streaming turn from Gemini model {} ({} messages)",
            self.model,
            request.contents.len()
        );
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(LlmError::from_network_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_http_status(status, error_text));
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(pump_sse(response, tx));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Read the SSE body and forward text parts until the stream or the
/// receiver ends
async fn pump_sse(response: reqwest::Response, tx: mpsc::Sender<Result<String, LlmError>>) {
    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    loop {
        let chunk = match timeout(STREAM_CHUNK_TIMEOUT, body.next()).await {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(e))) => {
                let _ = tx.send(Err(LlmError::from_network_error(e))).await;
                return;
            }
            Ok(None) => break,
            Err(_) => {
                let _ = tx
                    .send(Err(LlmError::Network(format!(
                        "Stream timeout - no response from Gemini for {} seconds",
                        STREAM_CHUNK_TIMEOUT.as_secs()
                    ))))
                    .await;
                return;
            }
        };

        for payload in decoder.push(&chunk) {
            if !forward(&payload, &tx).await {
                return;
            }
        }
    }

    for payload in decoder.finish() {
        if !forward(&payload, &tx).await {
            return;
        }
    }
}

/// Forward one SSE payload; `false` once nobody is listening or the
/// service reported an error
async fn forward(payload: &str, tx: &mpsc::Sender<Result<String, LlmError>>) -> bool {
    match chunk_texts(payload) {
        Ok(texts) => {
            for text in texts {
                if tx.send(Ok(text)).await.is_err() {
                    tracing::debug!("Turn receiver dropped, stopping Gemini stream");
                    return false;
                }
            }
            true
        }
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            false
        }
    }
}

/// Text parts of one streamed chunk, in order
fn chunk_texts(payload: &str) -> Result<Vec<String>, LlmError> {
    let chunk: GeminiStreamChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!("Skipping undecodable Gemini chunk: {}", e);
            return Ok(Vec::new());
        }
    };

    if let Some(error) = chunk.error {
        return Err(LlmError::ServiceError(error.message));
    }

    Ok(chunk
        .candidates
        .into_iter()
        .take(1)
        .filter_map(|c| c.content)
        .flat_map(|content| content.parts)
        .filter_map(|part| part.text)
        .filter(|text| !text.is_empty())
        .collect())
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    system_instruction: GeminiSystemInstruction,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    max_output_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GeminiStreamChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    error: Option<GeminiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> GeminiSource {
        GeminiSource::with_api_key("test-key", &GeminiConfig::default())
    }

    #[test]
    fn test_request_skips_leading_greeting_and_maps_roles() {
        let messages = vec![
            Message::assistant("Hello! What should we build?"),
            Message::user("A bakery site"),
            Message::assistant("Pick a style"),
            Message::user("Modern"),
        ];
        let request = source().build_request(&messages);
        let roles: Vec<&str> = request.contents.iter().map(|c| c.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
        assert_eq!(
            request.contents[0].parts[0].text.as_deref(),
            Some("A bakery site")
        );
    }

    #[test]
    fn test_request_serializes_system_instruction() {
        let messages = vec![Message::system("Prefer blue."), Message::user("Go")];
        let request = source().build_request(&messages);
        let json = serde_json::to_value(&request).unwrap();
        let system = json["systemInstruction"]["parts"][0]["text"].as_str().unwrap();
        assert!(system.starts_with("You are Flowr"));
        assert!(system.ends_with("Prefer blue."));
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 8192);
        assert!(json["generationConfig"]["temperature"].as_f64().unwrap() > 0.69);
        assert_eq!(json["contents"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_chunk_texts() {
        let payload = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello, "}, {"text": "world"}]}
            }],
            "usageMetadata": {"promptTokenCount": 10}
        }"#;
        assert_eq!(chunk_texts(payload).unwrap(), vec!["Hello, ", "world"]);
    }

    #[test]
    fn test_chunk_without_text_yields_nothing() {
        let payload = r#"{"candidates": [{"finishReason": "STOP"}]}"#;
        assert!(chunk_texts(payload).unwrap().is_empty());
        assert!(chunk_texts("not json").unwrap().is_empty());
    }

    #[test]
    fn test_error_chunk_is_service_error() {
        let payload = r#"{"error": {"code": 500, "message": "Internal error"}}"#;
        let err = chunk_texts(payload).unwrap_err();
        assert!(matches!(err, LlmError::ServiceError(ref m) if m == "Internal error"));
    }

    #[test]
    fn test_base_url_override() {
        let source = source()
            .with_base_url("http://localhost:9999/models/")
            .with_model("gemini-pro");
        assert_eq!(source.base_url, "http://localhost:9999/models");
        assert_eq!(source.model, "gemini-pro");
    }
}
