//! OpenAI chat-completions wire format.
//!
//! Shared by OpenAI, DeepSeek, Groq, custom compatible gateways, and Ollama
//! instances addressed through their `/v1` endpoint.

use super::{Completion, CompletionProtocol, StreamEvent, Usage, UpstreamError};
use serde::Deserialize;
use serde_json::{Value, json};

/// Chat-completions request and response handling.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiProtocol;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<Message>,
    delta: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    total_tokens: Option<u64>,
}

impl From<WireUsage> for Usage {
    fn from(wire: WireUsage) -> Self {
        Self::new(wire.prompt_tokens, wire.completion_tokens, wire.total_tokens)
    }
}

impl CompletionProtocol for OpenAiProtocol {
    fn endpoint(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }

    fn request_body(&self, model: &str, prompt: &str, stream: bool) -> Value {
        let mut body = json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": stream,
        });
        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    fn parse_response(&self, body: &str) -> Result<Completion, UpstreamError> {
        let response: ChatResponse = serde_json::from_str(body)
            .map_err(|_| UpstreamError::Format(super::error::extract_error_detail(body)))?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .ok_or_else(|| UpstreamError::Format(super::error::extract_error_detail(body)))?;

        Ok(Completion {
            text,
            usage: response.usage.map(Usage::from),
        })
    }

    fn parse_stream_line(&self, line: &str) -> Result<Vec<StreamEvent>, UpstreamError> {
        let Some(payload) = line.trim().strip_prefix("data:") else {
            // blank separators, comments and `event:` lines
            return Ok(Vec::new());
        };
        let payload = payload.trim();
        if payload.is_empty() {
            return Ok(Vec::new());
        }
        if payload == "[DONE]" {
            return Ok(vec![StreamEvent::Done]);
        }

        let chunk: ChatResponse = serde_json::from_str(payload)
            .map_err(|e| UpstreamError::Format(format!("invalid stream event: {e}")))?;

        let mut events = Vec::new();
        if let Some(content) = chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content)
            .filter(|content| !content.is_empty())
        {
            events.push(StreamEvent::Text(content));
        }
        if let Some(usage) = chunk.usage {
            events.push(StreamEvent::Usage(usage.into()));
        }
        Ok(events)
    }
}
