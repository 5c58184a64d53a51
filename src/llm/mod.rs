//! LLM Envoy (C1). Synchronous and streaming chat-completion calls against an
//! OpenAI-style `/chat/completions` endpoint, plus the decision-JSON
//! extractor used by the Plan Compiler (§4.1).

pub mod extractor;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{ConfigStore, LlmConfig, TimeoutKind};
use crate::errors::LlmError;

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage { role: "user".into(), content: content.into() }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

pub struct LlmEnvoy {
    client: reqwest::Client,
    config: LlmConfig,
    timeout: Duration,
    /// Set once, read many; a benign race per §5.
    verified: AtomicBool,
}

impl LlmEnvoy {
    pub fn new(config_store: &ConfigStore) -> Self {
        LlmEnvoy {
            client: reqwest::Client::new(),
            config: config_store.llm().clone(),
            timeout: config_store.timeout(TimeoutKind::LlmApi),
            verified: AtomicBool::new(false),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.config.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    async fn ensure_verified(&self) {
        if self.verified.swap(true, Ordering::Relaxed) {
            return;
        }
        let _ = self
            .raw_request(&[ChatMessage::user("ping")], Some(10), Some(0.0), false)
            .await;
    }

    /// Lazy sequence of text deltas; finite, not restartable (§4.1).
    pub async fn stream_complete(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        max_tokens: Option<u32>,
        temperature: Option<f64>,
    ) -> Result<impl futures::Stream<Item = String>, LlmError> {
        self.ensure_verified().await;

        let mut messages = Vec::new();
        if let Some(sys) = system_prompt {
            messages.push(ChatMessage::system(sys));
        }
        messages.push(ChatMessage::user(prompt));

        let body = self.request_body(&messages, max_tokens, temperature, true);
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let mut builder = self.client.post(&url).json(&body).timeout(self.timeout);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(map_request_error)?;
        let response = check_status(response).await?;

        let byte_stream = response.bytes_stream();
        Ok(sse_text_deltas(byte_stream))
    }

    async fn raw_request(
        &self,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
        temperature: Option<f64>,
        stream: bool,
    ) -> Result<ChatCompletionResponse, LlmError> {
        let body = self.request_body(messages, max_tokens, temperature, stream);
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let mut builder = self.client.post(&url).json(&body).timeout(self.timeout);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(map_request_error)?;
        let response = check_status(response).await?;

        response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }

    fn request_body(
        &self,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
        temperature: Option<f64>,
        stream: bool,
    ) -> Value {
        json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": max_tokens.unwrap_or(self.config.max_tokens),
            "temperature": temperature.unwrap_or(self.config.temperature),
            "stream": stream,
        })
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(match status.as_u16() {
        401 => LlmError::AuthFailed,
        429 => LlmError::RateLimited,
        s if (500..600).contains(&s) => LlmError::ServerError(s),
        s => LlmError::HttpError(s),
    })
}

fn map_request_error(err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::NetworkError(err.to_string())
    }
}

/// Parses `data: {json}\n\n` SSE frames, skipping unparseable lines, and
/// stops at the `[DONE]` sentinel (§4.1).
fn sse_text_deltas(
    byte_stream: impl futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
) -> impl futures::Stream<Item = String> {
    async_stream::stream! {
        futures::pin_mut!(byte_stream);
        let mut buf = String::new();
        while let Some(chunk) = byte_stream.next().await {
            let Ok(chunk) = chunk else { break };
            let Ok(text) = std::str::from_utf8(&chunk) else { continue };
            buf.push_str(text);

            while let Some(idx) = buf.find('\n') {
                let line = buf[..idx].trim_end_matches('\r').to_string();
                buf.drain(..=idx);

                let Some(payload) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
                    continue;
                };
                let payload = payload.trim();
                if payload.is_empty() {
                    continue;
                }
                if payload == "[DONE]" {
                    return;
                }
                let Ok(value) = serde_json::from_str::<Value>(payload) else { continue };
                if let Some(delta) = value["choices"][0]["delta"]["content"].as_str() {
                    yield delta.to_string();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn verify_probe_runs_exactly_once_against_reachable_endpoint() {
        let server = httpmock::MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/chat/completions");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body("data: {\"choices\":[{\"delta\":{\"content\":\"pong\"}}]}\n\ndata: [DONE]\n\n");
            })
            .await;

        let mut cfg = ConfigStore::default().llm().clone();
        cfg.base_url = server.base_url();
        cfg.api_key = Some("test-key".into());
        let llm = LlmEnvoy {
            client: reqwest::Client::new(),
            config: cfg,
            timeout: Duration::from_secs(5),
            verified: AtomicBool::new(false),
        };

        let stream = llm.stream_complete("hi", None, None, None).await.unwrap();
        futures::pin_mut!(stream);
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            text.push_str(&chunk);
        }
        assert_eq!(text, "pong");
        mock.assert_hits_async(2).await; // verify probe + real call
    }
}
