//! Native Ollama `/api/chat` format.

use super::{Completion, CompletionProtocol, StreamEvent, Usage, UpstreamError};
use serde::Deserialize;
use serde_json::{Value, json};

/// Ollama chat request and response handling (newline-delimited JSON when streaming).
#[derive(Debug, Clone, Copy, Default)]
pub struct OllamaProtocol;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<Message>,
    #[serde(default)]
    done: bool,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
}

impl ChatResponse {
    fn usage(&self) -> Option<Usage> {
        if self.prompt_eval_count.is_none() && self.eval_count.is_none() {
            return None;
        }
        Some(Usage::new(
            self.prompt_eval_count.unwrap_or(0),
            self.eval_count.unwrap_or(0),
            None,
        ))
    }
}

impl CompletionProtocol for OllamaProtocol {
    fn endpoint(&self, base_url: &str) -> String {
        format!("{}/api/chat", base_url.trim_end_matches('/'))
    }

    fn request_body(&self, model: &str, prompt: &str, stream: bool) -> Value {
        // Ollama streams unless told otherwise
        json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": stream,
        })
    }

    fn parse_response(&self, body: &str) -> Result<Completion, UpstreamError> {
        let response: ChatResponse = serde_json::from_str(body)
            .map_err(|_| UpstreamError::Format(super::error::extract_error_detail(body)))?;
        let usage = response.usage();

        let text = response
            .message
            .and_then(|message| message.content)
            .ok_or_else(|| UpstreamError::Format(super::error::extract_error_detail(body)))?;

        Ok(Completion { text, usage })
    }

    fn parse_stream_line(&self, line: &str) -> Result<Vec<StreamEvent>, UpstreamError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Vec::new());
        }

        let chunk: ChatResponse = serde_json::from_str(line)
            .map_err(|e| UpstreamError::Format(format!("invalid stream line: {e}")))?;

        let mut events = Vec::new();
        if let Some(content) = chunk
            .message
            .as_ref()
            .and_then(|message| message.content.clone())
            .filter(|content| !content.is_empty())
        {
            events.push(StreamEvent::Text(content));
        }
        if chunk.done {
            if let Some(usage) = chunk.usage() {
                events.push(StreamEvent::Usage(usage));
            }
            events.push(StreamEvent::Done);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_endpoint_and_body() {
        assert_eq!(
            OllamaProtocol.endpoint("http://localhost:11434/"),
            "http://localhost:11434/api/chat"
        );
        let body = OllamaProtocol.request_body("llama3", "hello", false);
        assert_eq!(body["stream"], false);
        assert_eq!(body["model"], "llama3");
    }

    #[test]
    fn test_parse_native_response() {
        let body = r#"{"message":{"role":"assistant","content":"Hi"},"done":true,
            "prompt_eval_count":26,"eval_count":298}"#;
        let completion = OllamaProtocol.parse_response(body).unwrap();
        assert_eq!(completion.text, "Hi");
        assert_eq!(completion.usage.unwrap().total_tokens, 324);
    }

    #[test]
    fn test_parse_stream_final_line() {
        let events = OllamaProtocol
            .parse_stream_line(r#"{"message":{"content":"The"},"done":false}"#)
            .unwrap();
        assert_eq!(events, vec![StreamEvent::Text("The".to_string())]);

        let events = OllamaProtocol
            .parse_stream_line(
                r#"{"message":{"content":""},"done":true,"prompt_eval_count":5,"eval_count":7}"#,
            )
            .unwrap();
        assert_eq!(events, vec![
            StreamEvent::Usage(Usage::new(5, 7, None)),
            StreamEvent::Done
        ]);
    }
}
