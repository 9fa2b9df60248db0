use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::debug;

use super::AgentEvent;
use crate::config::ConfidantConfig;
use crate::types::{ChatMessage, GenerationParams};

/// Trait for generation backends.
///
/// `complete` is used for the extraction prompts, `call_streaming` for the
/// user-facing reply. A streaming call reports backend-side failures as
/// [`AgentEvent::Error`] and always finishes with [`AgentEvent::Done`];
/// transport failures are returned as `Err`. A body that ends without the
/// backend's end-of-reply marker is reported as [`TRUNCATED_STREAM`].
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
    ) -> anyhow::Result<String>;

    async fn call_streaming(
        &self,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
        tx: mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<()>;

    /// Names of models the backend can serve.
    async fn list_models(&self) -> anyhow::Result<Vec<String>>;
}

fn build_client(timeout: Duration) -> anyhow::Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(timeout)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build HTTP client: {e}"))
}

/// Reported when a body ends before the backend's end-of-reply marker.
pub const TRUNCATED_STREAM: &str = "stream ended before the reply was complete";

/// Split the next `delimiter`-terminated frame off the front of `buffer`.
///
/// Bytes are framed before decoding so a multi-byte character split across
/// network chunks is reassembled intact.
fn next_frame(buffer: &mut Vec<u8>, delimiter: &[u8]) -> Option<Vec<u8>> {
    let pos = buffer
        .windows(delimiter.len())
        .position(|window| window == delimiter)?;
    let frame = buffer[..pos].to_vec();
    buffer.drain(..pos + delimiter.len());
    Some(frame)
}

fn with_system(messages: &[ChatMessage], system_prompt: Option<&str>) -> Vec<serde_json::Value> {
    let mut all_messages = Vec::with_capacity(messages.len() + 1);
    if let Some(system) = system_prompt {
        all_messages.push(ChatMessage::system(system).as_provider_message());
    }
    all_messages.extend(messages.iter().map(ChatMessage::as_provider_message));
    all_messages
}

/// Native Ollama `/api/chat` backend.
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    params: GenerationParams,
}

impl OllamaProvider {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        params: GenerationParams,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            params,
        })
    }

    fn body(
        &self,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
        stream: bool,
    ) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": with_system(messages, system_prompt),
            "stream": stream,
            "options": {
                "temperature": self.params.temperature,
                "num_predict": self.params.max_tokens,
                "num_ctx": self.params.context_window,
                "top_p": self.params.top_p,
                "top_k": self.params.top_k,
            },
        })
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
    ) -> anyhow::Result<String> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&self.body(messages, system_prompt, false))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("ollama returned {status}: {text}");
        }

        let parsed: serde_json::Value = response.json().await?;
        Ok(parsed
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn call_streaming(
        &self,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
        tx: mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<()> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&self.body(messages, system_prompt, true))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let _ = tx
                .send(AgentEvent::Error(format!("{status}: {text}")))
                .await;
            let _ = tx.send(AgentEvent::Done).await;
            return Ok(());
        }

        // Newline-delimited JSON: one object per line, the last has `done: true`.
        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);

            while let Some(frame) = next_frame(&mut buffer, b"\n") {
                let line = match String::from_utf8(frame) {
                    Ok(line) => line,
                    Err(e) => {
                        debug!("skipping non-UTF-8 stream line: {e}");
                        continue;
                    }
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let parsed: serde_json::Value = match serde_json::from_str(line) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("skipping unparseable stream line: {e}");
                        continue;
                    }
                };

                if let Some(error) = parsed.get("error").and_then(|e| e.as_str()) {
                    let _ = tx.send(AgentEvent::Error(error.to_string())).await;
                    let _ = tx.send(AgentEvent::Done).await;
                    return Ok(());
                }

                if let Some(text) = parsed
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(|c| c.as_str())
                {
                    if !text.is_empty() {
                        let _ = tx.send(AgentEvent::Text(text.into())).await;
                    }
                }

                if parsed.get("done").and_then(|d| d.as_bool()) == Some(true) {
                    let _ = tx.send(AgentEvent::Done).await;
                    return Ok(());
                }
            }
        }

        let _ = tx.send(AgentEvent::Error(TRUNCATED_STREAM.into())).await;
        let _ = tx.send(AgentEvent::Done).await;
        Ok(())
    }

    async fn list_models(&self) -> anyhow::Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await?
            .error_for_status()?;
        let parsed: serde_json::Value = response.json().await?;
        Ok(parsed
            .get("models")
            .and_then(|m| m.as_array())
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// OpenAI-compatible `/chat/completions` backend (OpenAI itself, llama.cpp,
/// vLLM, LM Studio).
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    params: GenerationParams,
}

impl OpenAiProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        params: GenerationParams,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            params,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .header("content-type", "application/json");
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }

    fn body(
        &self,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
        stream: bool,
    ) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": with_system(messages, system_prompt),
            "max_tokens": self.params.max_tokens,
            "temperature": self.params.temperature,
            "top_p": self.params.top_p,
            "stream": stream,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
    ) -> anyhow::Result<String> {
        let response = self
            .request(reqwest::Method::POST, "/chat/completions")
            .json(&self.body(messages, system_prompt, false))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("chat completion returned {status}: {text}");
        }

        let parsed: serde_json::Value = response.json().await?;
        Ok(parsed
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn call_streaming(
        &self,
        messages: &[ChatMessage],
        system_prompt: Option<&str>,
        tx: mpsc::Sender<AgentEvent>,
    ) -> anyhow::Result<()> {
        let response = self
            .request(reqwest::Method::POST, "/chat/completions")
            .json(&self.body(messages, system_prompt, true))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let _ = tx
                .send(AgentEvent::Error(format!("{status}: {text}")))
                .await;
            let _ = tx.send(AgentEvent::Done).await;
            return Ok(());
        }

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);

            while let Some(frame) = next_frame(&mut buffer, b"\n\n") {
                let event = match String::from_utf8(frame) {
                    Ok(event) => event,
                    Err(e) => {
                        debug!("skipping non-UTF-8 SSE event: {e}");
                        continue;
                    }
                };

                let Some(data) = event.trim().strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    let _ = tx.send(AgentEvent::Done).await;
                    return Ok(());
                }

                let parsed: serde_json::Value = match serde_json::from_str(data) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("skipping unparseable SSE data: {e}");
                        continue;
                    }
                };

                if let Some(text) = parsed
                    .get("choices")
                    .and_then(|c| c.as_array())
                    .and_then(|choices| choices.first())
                    .and_then(|choice| choice.get("delta"))
                    .and_then(|d| d.get("content"))
                    .and_then(|c| c.as_str())
                {
                    if !text.is_empty() {
                        let _ = tx.send(AgentEvent::Text(text.into())).await;
                    }
                }
            }
        }

        let _ = tx.send(AgentEvent::Error(TRUNCATED_STREAM.into())).await;
        let _ = tx.send(AgentEvent::Done).await;
        Ok(())
    }

    async fn list_models(&self) -> anyhow::Result<Vec<String>> {
        let response = self
            .request(reqwest::Method::GET, "/models")
            .timeout(Duration::from_secs(5))
            .send()
            .await?
            .error_for_status()?;
        let parsed: serde_json::Value = response.json().await?;
        Ok(parsed
            .get("data")
            .and_then(|d| d.as_array())
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("id").and_then(|n| n.as_str()))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Create a provider from config.
pub fn from_config(config: &ConfidantConfig) -> anyhow::Result<Box<dyn LlmProvider>> {
    let agent = &config.agent;
    let timeout = Duration::from_secs(agent.request_timeout_secs);

    match agent.provider.as_str() {
        "ollama" => Ok(Box::new(OllamaProvider::new(
            agent.base_url(),
            agent.model.clone(),
            config.generation.clone(),
            timeout,
        )?)),
        "openai" => Ok(Box::new(OpenAiProvider::new(
            agent.base_url(),
            agent.api_key.clone(),
            agent.model.clone(),
            config.generation.clone(),
            timeout,
        )?)),
        other => anyhow::bail!("unknown provider: {other}"),
    }
}
