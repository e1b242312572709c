//! Chat-completions backend client, SSE streaming, and instance registry.
//!
//! [`BackendClient`] talks to any OpenAI-compatible endpoint. All failures —
//! transport, HTTP status, body shape, in-band API errors — are normalized
//! into [`Error::Backend`] so the lifecycle loop only ever branches on one
//! error value. Streaming mode parses SSE `data:` lines and surfaces
//! incremental content and reasoning deltas through a callback.
//!
//! [`BackendRegistry`] caches one client per `(name, index)` so repeated
//! lookups within a session reuse the same connection pool. The registry is
//! an owned map passed through the caller, never process-global state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::Message;
use crate::config::{BackendConfig, Config};
use crate::error::{Error, Result};

/// Request timeout for a single completion call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Identifying facts about a backend, for logs and exchange records.
#[derive(Serialize, Clone, Debug)]
pub struct BackendInfo {
    pub name: String,
    pub model: String,
    pub url: String,
}

/// Per-request generation parameters.
#[derive(Clone, Debug)]
pub struct RequestOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    /// Stream the response, emitting reasoning deltas to stderr as they arrive.
    pub stream: bool,
    /// Strip markdown code fences from the response (commands, not explanations).
    pub strip_fences: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            temperature: 0.2,
            stream: false,
            strip_fences: true,
        }
    }
}

impl RequestOptions {
    /// Options for a command generation, temperature nudged up per
    /// regeneration so retries don't reproduce the declined command verbatim.
    pub fn command(regeneration_count: usize, stream: bool) -> Self {
        Self {
            temperature: (0.2 + 0.1 * regeneration_count as f32).min(1.0),
            stream,
            ..Self::default()
        }
    }

    /// Options for a free-text explanation.
    pub fn explanation(stream: bool) -> Self {
        Self {
            max_tokens: 1000,
            stream,
            strip_fences: false,
            ..Self::default()
        }
    }
}

/// The narrow seam the lifecycle controller and tool selector depend on.
/// Production code uses [`BackendClient`]; tests drive scripted impls.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send a conversation and return the assistant's text.
    async fn send(&self, messages: &[Message], opts: &RequestOptions) -> Result<String>;

    /// Model-specific context window in tokens, if the backend reports one.
    async fn context_window(&self) -> Option<usize> {
        None
    }

    fn info(&self) -> BackendInfo;
}

// ── Wire types ─────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

#[derive(Deserialize, Debug)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
    reasoning: Option<String>,
}

/// A single event from an SSE stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// An incremental text content delta.
    TextDelta(String),
    /// An incremental reasoning/thinking delta.
    ReasoningDelta(String),
    /// The stream is complete.
    Done,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for one configured backend.
pub struct BackendClient {
    client: reqwest::Client,
    config: BackendConfig,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("shellm/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Backend(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn is_reasoning_model(&self) -> bool {
        self.config.is_reasoning_model
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.url.trim_end_matches('/'))
    }

    /// Send a chat completion request and return the raw assistant text.
    async fn chat(&self, messages: &[Message], opts: &RequestOptions) -> Result<String> {
        let body = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: opts.temperature,
            max_tokens: opts.max_tokens,
            stream: false,
        };
        debug!(
            "LLM request: backend={}, model={}, messages={}, max_tokens={}, temp={}",
            self.config.name,
            self.config.model,
            messages.len(),
            opts.max_tokens,
            opts.temperature,
        );

        let start = Instant::now();
        let resp = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Backend(format!("request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::Backend(format!("failed to read response: {e}")))?;
        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(Error::Backend(format!("API HTTP {status}: {text}")));
        }

        let parsed: RawChatResponse = serde_json::from_str(&text)
            .map_err(|e| Error::Backend(format!("failed to parse response: {e}")))?;
        if let Some(err) = parsed.error {
            return Err(Error::Backend(format!("API error: {}", err.message)));
        }

        parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .ok_or_else(|| Error::Backend("empty response (no choices)".to_string()))
    }

    /// Send a streaming chat request, invoking `on_event` for each event as
    /// it arrives off the wire. Returns the assembled content text.
    pub async fn chat_stream(
        &self,
        messages: &[Message],
        opts: &RequestOptions,
        mut on_event: impl FnMut(&StreamEvent) + Send,
    ) -> Result<String> {
        let body = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: opts.temperature,
            max_tokens: opts.max_tokens,
            stream: true,
        };
        debug!(
            "LLM streaming request: backend={}, model={}, messages={}",
            self.config.name,
            self.config.model,
            messages.len(),
        );

        let mut resp = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Backend(format!("streaming request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Backend(format!("API HTTP {status}: {text}")));
        }

        let mut content = String::new();
        let mut buffer = String::new();
        let mut done = false;

        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| Error::Backend(format!("failed to read streaming chunk: {e}")))?
        {
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Process all complete lines in the buffer.
            while let Some(newline_pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline_pos).collect();
                let line = line.trim();
                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                if line == "data: [DONE]" {
                    on_event(&StreamEvent::Done);
                    done = true;
                    break;
                }
                if let Some(data) = line.strip_prefix("data: ") {
                    for event in parse_sse_data(data) {
                        if let StreamEvent::TextDelta(ref delta) = event {
                            content.push_str(delta);
                        }
                        on_event(&event);
                    }
                }
            }
            if done {
                break;
            }
        }

        // Incomplete final line without a trailing newline.
        let remaining = buffer.trim();
        if !remaining.is_empty()
            && remaining != "data: [DONE]"
            && let Some(data) = remaining.strip_prefix("data: ")
        {
            for event in parse_sse_data(data) {
                if let StreamEvent::TextDelta(ref delta) = event {
                    content.push_str(delta);
                }
                on_event(&event);
            }
        }
        if !done {
            on_event(&StreamEvent::Done);
        }

        debug!("Stream completed: {} chars of content", content.len());
        Ok(content.trim().to_string())
    }
}

#[async_trait]
impl ChatBackend for BackendClient {
    async fn send(&self, messages: &[Message], opts: &RequestOptions) -> Result<String> {
        let text = if opts.stream {
            // Verbose mode: show reasoning live on stderr while the command
            // itself is presented once complete.
            self.chat_stream(messages, opts, |event| match event {
                StreamEvent::ReasoningDelta(delta) => eprint!("{delta}"),
                StreamEvent::Done => eprintln!(),
                StreamEvent::TextDelta(_) => {}
            })
            .await?
        } else {
            self.chat(messages, opts).await?
        };
        if text.is_empty() {
            return Err(Error::Backend("empty response from model".to_string()));
        }
        Ok(if opts.strip_fences {
            strip_code_fences(&text)
        } else {
            text
        })
    }

    /// Ask the backend for this model's context window. Any failure, any
    /// unexpected shape, means `None` — the caller keeps its default budget.
    async fn context_window(&self) -> Option<usize> {
        let url = format!(
            "{}/models/{}",
            self.config.url.trim_end_matches('/'),
            self.config.model
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            trace!("model metadata query returned HTTP {}", resp.status());
            return None;
        }
        let value: serde_json::Value = resp.json().await.ok()?;
        let tokens = ["context_length", "max_context_length", "context_window"]
            .iter()
            .find_map(|key| value.get(key).and_then(|v| v.as_u64()))?;
        debug!("backend reports context window of {tokens} tokens");
        Some(tokens as usize)
    }

    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: self.config.name.clone(),
            model: self.config.model.clone(),
            url: self.config.url.clone(),
        }
    }
}

/// Parse a single SSE `data:` payload into stream events.
fn parse_sse_data(data: &str) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            for choice in chunk.choices.unwrap_or_default() {
                let Some(delta) = choice.delta else { continue };
                if let Some(content) = delta.content
                    && !content.is_empty()
                {
                    events.push(StreamEvent::TextDelta(content));
                }
                if let Some(reasoning) = delta.reasoning
                    && !reasoning.is_empty()
                {
                    events.push(StreamEvent::ReasoningDelta(reasoning));
                }
            }
        }
        Err(e) => {
            warn!("Failed to parse SSE chunk: {e} — data: {data}");
        }
    }
    events
}

/// Strip a wrapping markdown code fence (or inline backticks) from a
/// generated command. Models routinely fence their output despite
/// instructions not to.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        let inner: Vec<&str> = trimmed
            .lines()
            .skip(1)
            .take_while(|line| !line.trim_start().starts_with("```"))
            .collect();
        return inner.join("\n").trim().to_string();
    }
    if let Some(stripped) = trimmed
        .strip_prefix('`')
        .and_then(|s| s.strip_suffix('`'))
        && !stripped.contains('`')
    {
        return stripped.trim().to_string();
    }
    trimmed.to_string()
}

/// Send a request, racing it against Ctrl+C. A cancelled in-flight request
/// simply has its eventual result discarded; the user gets
/// [`Error::Interrupted`] immediately.
pub async fn send_interruptible(
    backend: &dyn ChatBackend,
    messages: &[Message],
    opts: &RequestOptions,
) -> Result<String> {
    tokio::select! {
        result = backend.send(messages, opts) => result,
        _ = tokio::signal::ctrl_c() => Err(Error::Interrupted),
    }
}

// ── Registry ───────────────────────────────────────────────────────

/// Explicit backend-instance cache keyed by `(name, index)`.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<(String, usize), Arc<BackendClient>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the client for the requested backend index. Repeated
    /// lookups for the same logical backend return the same instance.
    pub fn get(&mut self, config: &Config, index: Option<usize>) -> Result<Arc<BackendClient>> {
        let backend_config = config.backend(index)?;
        let key = (backend_config.name.clone(), config.backend_index(index));
        if let Some(client) = self.backends.get(&key) {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(BackendClient::new(backend_config.clone())?);
        self.backends.insert(key, Arc::clone(&client));
        Ok(client)
    }
}
