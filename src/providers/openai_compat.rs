use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures_util::{StreamExt, TryStreamExt, future, stream};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::prompt::Prompt;
use crate::providers::http_errors::{ProviderError, classify_request_error, classify_status};
use crate::providers::{ChunkStream, ResponseSource};

const DONE_MARKER: &str = "[DONE]";

/// Where and how to reach one OpenAI-compatible chat completions server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub name: &'static str,
    pub base_url: String,
    pub api_key: Option<String>,
    pub key_hint: &'static str,
    pub headers: Vec<(&'static str, String)>,
    pub timeout_secs: u64,
}

impl Endpoint {
    pub fn groq(cfg: &Config) -> Self {
        Self {
            name: "groq",
            base_url: cfg.groq_base_url.clone(),
            api_key: cfg.groq_api_key.clone(),
            key_hint: "GROQ_API_KEY",
            headers: Vec::new(),
            timeout_secs: cfg.model_timeout_secs,
        }
    }

    pub fn openrouter(cfg: &Config) -> Self {
        let mut headers = Vec::new();
        if let Some(url) = &cfg.openrouter_app_url {
            headers.push(("HTTP-Referer", url.clone()));
        }
        if let Some(title) = &cfg.openrouter_app_title {
            headers.push(("X-Title", title.clone()));
        }
        Self {
            name: "openrouter",
            base_url: cfg.openrouter_base_url.clone(),
            api_key: cfg.openrouter_api_key.clone(),
            key_hint: "OPENROUTER_API_KEY",
            headers,
            timeout_secs: cfg.model_timeout_secs,
        }
    }

    /// LM Studio's local server; it takes no key.
    pub fn local(cfg: &Config) -> Self {
        Self {
            name: "local",
            base_url: cfg.local_base_url.clone(),
            api_key: None,
            key_hint: "LOCAL_MODEL_BASE_URL",
            headers: Vec::new(),
            timeout_secs: cfg.model_timeout_secs,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    stream: bool,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamErrorBody {
    message: String,
}

fn completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

fn is_done(event: &Result<Event, EventStreamError<reqwest::Error>>) -> bool {
    matches!(event, Ok(ev) if ev.data.trim() == DONE_MARKER)
}

/// Returns the text carried by one SSE `data` payload, possibly empty.
fn parse_event_data(data: &str) -> Result<String, ProviderError> {
    if data.trim().is_empty() {
        return Ok(String::new());
    }
    let chunk: StreamChunk =
        serde_json::from_str(data).map_err(|err| ProviderError::Decode(err.to_string()))?;
    if let Some(error) = chunk.error {
        return Err(ProviderError::Stream(error.message));
    }
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .unwrap_or_default())
}

pub struct OpenAiCompatible<'a> {
    client: &'a Client,
    endpoint: Endpoint,
}

impl<'a> OpenAiCompatible<'a> {
    pub fn new(client: &'a Client, endpoint: Endpoint) -> Self {
        Self { client, endpoint }
    }

    async fn open(
        &self,
        prompt: &Prompt,
        model: &str,
    ) -> Result<ChunkStream<'static>, ProviderError> {
        let api_url = completions_url(&self.endpoint.base_url);
        let body = ChatCompletionRequest {
            model,
            stream: true,
            messages: prompt
                .messages
                .iter()
                .map(|msg| ChatMessage {
                    role: msg.role.as_str(),
                    content: &msg.content,
                })
                .collect(),
        };
        debug!(
            provider = self.endpoint.name,
            api_url = %api_url,
            model = %model,
            message_count = prompt.messages.len(),
            prompt_tokens = prompt.token_count,
            "opening streamed chat completion"
        );

        let mut request = self.client.post(&api_url).json(&body);
        if let Some(key) = &self.endpoint.api_key {
            request = request.bearer_auth(key);
        }
        for (name, value) in &self.endpoint.headers {
            request = request.header(*name, value);
        }

        let response = request.send().await.map_err(|err| {
            warn!(
                provider = self.endpoint.name,
                api_url = %api_url,
                error = %err,
                "chat completion request failed"
            );
            classify_request_error(err, &api_url, self.endpoint.timeout_secs)
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let response_body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read response body>".to_string());
            warn!(
                provider = self.endpoint.name,
                api_url = %api_url,
                status = %status,
                response_body_len = response_body.len(),
                "chat completion returned non-success status"
            );
            return Err(classify_status(status, response_body, self.endpoint.key_hint));
        }

        let chunks = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| future::ready(!is_done(event)))
            .map(|event| match event {
                Ok(event) => parse_event_data(&event.data),
                Err(err) => Err(ProviderError::Stream(err.to_string())),
            });
        Ok(Box::pin(chunks))
    }
}

impl ResponseSource for OpenAiCompatible<'_> {
    fn stream<'a>(&'a self, prompt: &'a Prompt, model: &'a str) -> ChunkStream<'a> {
        Box::pin(stream::once(self.open(prompt, model)).try_flatten())
    }
}
