//! Outbound AI completion clients.
//!
//! A stored `ai_services` row is turned into a [`ServiceTarget`], whose
//! [`ServiceKind`] selects the wire protocol. [`AiClient`] performs the HTTP
//! call either as one request/response or as a stream of text fragments.

pub mod error;
pub mod ollama;
pub mod openai;
pub mod stream;

pub use error::UpstreamError;
pub use stream::SseLineDecoder;

use crate::entities::ai_service;
use crate::errors::{Error, Result};
use futures_util::{Stream, StreamExt};
use ollama::OllamaProtocol;
use openai::OpenAiProtocol;
use serde::Serialize;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

/// Provider tag stored in `ai_services.service_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    /// api.openai.com
    OpenAi,
    /// DeepSeek (OpenAI schema)
    DeepSeek,
    /// Groq (OpenAI schema)
    Groq,
    /// Any gateway speaking the OpenAI schema
    CustomOpenAiCompatible,
    /// Local Ollama server
    Ollama,
}

impl ServiceKind {
    /// Every supported tag.
    pub const ALL: [Self; 5] = [
        Self::OpenAi,
        Self::DeepSeek,
        Self::Groq,
        Self::CustomOpenAiCompatible,
        Self::Ollama,
    ];

    /// Tag as stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::DeepSeek => "deepseek",
            Self::Groq => "groq",
            Self::CustomOpenAiCompatible => "custom_openai_compatible",
            Self::Ollama => "ollama",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let tag = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == tag)
            .ok_or_else(|| Error::validation(format!("Unsupported service type: {s}")))
    }
}

/// Token counts reported by the upstream service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Usage {
    /// Tokens in the prompt
    pub prompt_tokens: u64,
    /// Tokens generated
    pub completion_tokens: u64,
    /// Billed total
    pub total_tokens: u64,
}

impl Usage {
    /// Builds a usage record; a missing total is the sum of both parts.
    #[must_use]
    pub fn new(prompt_tokens: u64, completion_tokens: u64, total_tokens: Option<u64>) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: total_tokens.unwrap_or_else(|| prompt_tokens.saturating_add(completion_tokens)),
        }
    }
}

/// A finished non-streaming completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Assistant message
    pub text: String,
    /// Token usage, when the service reported it
    pub usage: Option<Usage>,
}

/// Item produced by [`AiClient::stream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionChunk {
    /// Next fragment of generated text
    Text(String),
    /// Always the last item; carries usage if any was seen
    Finished(Option<Usage>),
}

/// One decoded event from a streamed body line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Generated text
    Text(String),
    /// Usage totals
    Usage(Usage),
    /// End-of-stream marker
    Done,
}

/// Finite stream of completion chunks.
pub type CompletionStream = Pin<Box<dyn Stream<Item = CompletionChunk> + Send>>;

/// Wire format of one provider family.
pub trait CompletionProtocol: Send + Sync {
    /// Full URL of the chat endpoint for a base URL.
    fn endpoint(&self, base_url: &str) -> String;

    /// JSON request body for a single user prompt.
    fn request_body(&self, model: &str, prompt: &str, stream: bool) -> serde_json::Value;

    /// Parses a non-streaming response body.
    fn parse_response(&self, body: &str) -> std::result::Result<Completion, UpstreamError>;

    /// Parses one line of a streaming response body.
    fn parse_stream_line(&self, line: &str)
    -> std::result::Result<Vec<StreamEvent>, UpstreamError>;
}

/// Everything needed to call one configured service.
#[derive(Debug, Clone)]
pub struct ServiceTarget {
    /// Service display name, for logs
    pub name: String,
    /// Provider family
    pub kind: ServiceKind,
    /// Base URL without the endpoint path
    pub base_url: String,
    /// Model identifier sent in the request
    pub model: String,
    /// Bearer token, if the service needs one
    pub api_key: Option<String>,
}

impl ServiceTarget {
    /// Validates a stored service row.
    ///
    /// Missing base URL or model name is a configuration error raised before
    /// any request is made.
    pub fn from_model(service: &ai_service::Model) -> Result<Self> {
        let kind: ServiceKind = service.service_type.parse()?;

        let base_url = service
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| Error::Config {
                message: format!("Service '{}' has no base URL configured", service.name),
            })?;
        let model = service
            .model_name
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .ok_or_else(|| Error::Config {
                message: format!("Service '{}' has no model name configured", service.name),
            })?;

        if service.api_key.is_none() && !service.is_system_service {
            tracing::warn!("User service '{}' has no API key", service.name);
        }

        Ok(Self {
            name: service.name.clone(),
            kind,
            base_url: base_url.to_string(),
            model: model.to_string(),
            api_key: service.api_key.clone().filter(|key| !key.is_empty()),
        })
    }

    /// Protocol spoken by this target.
    ///
    /// Ollama addressed through a `/v1` base URL uses its OpenAI-compatible API.
    #[must_use]
    pub fn protocol(&self) -> &'static dyn CompletionProtocol {
        match self.kind {
            ServiceKind::Ollama if !self.base_url.contains("/v1") => &OllamaProtocol,
            _ => &OpenAiProtocol,
        }
    }
}

/// HTTP client for completion endpoints.
#[derive(Debug, Clone)]
pub struct AiClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl AiClient {
    /// Creates a client with the given request timeout.
    ///
    /// The timeout also bounds every read of a streamed body, so an upstream
    /// that stalls mid-answer ends the stream.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(
                    "Could not build AI HTTP client ({}), falling back to one without connect or read timeouts",
                    e
                );
                reqwest::Client::new()
            });
        Self { http, timeout }
    }

    fn request(&self, target: &ServiceTarget, prompt: &str, stream: bool) -> reqwest::RequestBuilder {
        let protocol = target.protocol();
        let endpoint = protocol.endpoint(&target.base_url);
        tracing::info!(
            service = %target.name,
            kind = %target.kind,
            model = %target.model,
            stream,
            "Calling AI service at {}",
            endpoint
        );

        let request = self
            .http
            .post(endpoint)
            .json(&protocol.request_body(&target.model, prompt, stream));
        match target.api_key.as_deref() {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout.as_secs()
    }

    /// Sends one request and waits for the whole answer.
    pub async fn complete(
        &self,
        target: &ServiceTarget,
        prompt: &str,
    ) -> std::result::Result<Completion, UpstreamError> {
        let response = self
            .request(target, prompt, false)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(&e, self.timeout_secs()))?;
        let response = check_status(target, response).await?;

        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::from_reqwest(&e, self.timeout_secs()))?;

        let completion = target.protocol().parse_response(&body).inspect_err(|e| {
            tracing::error!("AI service '{}' returned an unexpected body: {}", target.name, e);
        })?;
        tracing::debug!(
            "AI service '{}' answered with {} characters",
            target.name,
            completion.text.chars().count()
        );
        Ok(completion)
    }

    /// Starts a streaming request.
    ///
    /// Fails only if the request cannot be sent or the status is not a success.
    /// Errors after that end the stream early; the final
    /// [`CompletionChunk::Finished`] is emitted either way.
    pub async fn stream(
        &self,
        target: &ServiceTarget,
        prompt: &str,
    ) -> std::result::Result<CompletionStream, UpstreamError> {
        let send = self.request(target, prompt, true).send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| UpstreamError::Timeout {
                seconds: self.timeout_secs(),
            })?
            .map_err(|e| UpstreamError::from_reqwest(&e, self.timeout_secs()))?;
        let response = check_status(target, response).await?;

        let protocol = target.protocol();
        let service = target.name.clone();
        let mut bytes = Box::pin(response.bytes_stream());

        Ok(Box::pin(async_stream::stream! {
            let mut decoder = SseLineDecoder::new();
            let mut usage = None;
            let mut done = false;

            'body: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::error!("Stream from '{}' broke off: {}", service, e);
                        break;
                    }
                };

                for line in decoder.push(&chunk) {
                    match protocol.parse_stream_line(&line) {
                        Ok(events) => {
                            for event in events {
                                match event {
                                    StreamEvent::Text(text) => yield CompletionChunk::Text(text),
                                    StreamEvent::Usage(seen) => usage = Some(seen),
                                    StreamEvent::Done => {
                                        done = true;
                                        break 'body;
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            tracing::error!("Stream from '{}' could not be decoded: {}", service, e);
                            done = true;
                            break 'body;
                        }
                    }
                }
            }

            if !done {
                if let Some(line) = decoder.flush() {
                    if let Ok(events) = protocol.parse_stream_line(&line) {
                        for event in events {
                            match event {
                                StreamEvent::Text(text) => yield CompletionChunk::Text(text),
                                StreamEvent::Usage(seen) => usage = Some(seen),
                                StreamEvent::Done => {}
                            }
                        }
                    }
                }
            }

            yield CompletionChunk::Finished(usage);
        }))
    }
}

async fn check_status(
    target: &ServiceTarget,
    response: reqwest::Response,
) -> std::result::Result<reqwest::Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = error::extract_error_detail(&body);
    tracing::error!(
        "AI service '{}' failed with status {}: {}",
        target.name,
        status,
        detail
    );
    Err(UpstreamError::Http {
        status: status.as_u16(),
        detail,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use axum::{
        Json, Router,
        http::{HeaderMap, StatusCode, header},
        response::IntoResponse,
        routing::post,
    };
    use serde_json::{Value, json};

    async fn spawn_upstream(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn target(kind: ServiceKind, base_url: String) -> ServiceTarget {
        ServiceTarget {
            name: "test".to_string(),
            kind,
            base_url,
            model: "test-model".to_string(),
            api_key: Some("sk-test".to_string()),
        }
    }

    fn service_model(base_url: Option<&str>, model: Option<&str>) -> ai_service::Model {
        ai_service::Model {
            id: 1,
            name: "svc".to_string(),
            service_type: "openai".to_string(),
            api_key: None,
            base_url: base_url.map(str::to_string),
            model_name: model.map(str::to_string),
            is_system_service: true,
            owner_id: None,
            is_default: false,
            enable_streaming: false,
        }
    }

    #[test]
    fn test_service_kind_parsing() {
        assert_eq!("openai".parse::<ServiceKind>().unwrap(), ServiceKind::OpenAi);
        assert_eq!(
            "custom_openai_compatible".parse::<ServiceKind>().unwrap(),
            ServiceKind::CustomOpenAiCompatible
        );
        assert!(matches!(
            "anthropic".parse::<ServiceKind>(),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_target_requires_base_url_and_model() {
        assert!(matches!(
            ServiceTarget::from_model(&service_model(None, Some("m"))),
            Err(Error::Config { .. })
        ));
        assert!(matches!(
            ServiceTarget::from_model(&service_model(Some("http://x"), Some("  "))),
            Err(Error::Config { .. })
        ));
        let target = ServiceTarget::from_model(&service_model(Some("http://x"), Some("m"))).unwrap();
        assert_eq!(target.kind, ServiceKind::OpenAi);
    }

    #[test]
    fn test_ollama_protocol_selection() {
        let native = target(ServiceKind::Ollama, "http://localhost:11434".to_string());
        assert_eq!(
            native.protocol().endpoint(&native.base_url),
            "http://localhost:11434/api/chat"
        );
        let compat = target(ServiceKind::Ollama, "http://localhost:11434/v1".to_string());
        assert_eq!(
            compat.protocol().endpoint(&compat.base_url),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn test_complete_round_trip() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let auth = headers
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                Json(json!({
                    "choices": [{ "message": { "content": format!("{auth}|{}", body["model"]) } }],
                    "usage": { "prompt_tokens": 200, "completion_tokens": 50, "total_tokens": 250 }
                }))
            }),
        );
        let base = spawn_upstream(router).await;
        let client = AiClient::new(Duration::from_secs(5));

        let completion = client
            .complete(&target(ServiceKind::OpenAi, base), "hello")
            .await
            .unwrap();
        assert_eq!(completion.text, "Bearer sk-test|\"test-model\"");
        assert_eq!(completion.usage.unwrap().total_tokens, 250);
    }

    #[tokio::test]
    async fn test_http_error_is_classified() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "error": { "message": "Invalid API key" } })),
                )
            }),
        );
        let base = spawn_upstream(router).await;
        let client = AiClient::new(Duration::from_secs(5));

        let err = client
            .complete(&target(ServiceKind::Groq, base), "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Http { status: 401, ref detail } if detail == "Invalid API key"));
        assert!(!err.user_message().contains("Invalid"));
    }

    #[tokio::test]
    async fn test_complete_times_out() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(json!({}))
            }),
        );
        let base = spawn_upstream(router).await;
        let client = AiClient::new(Duration::from_millis(200));

        let err = client
            .complete(&target(ServiceKind::OpenAi, base), "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_stream_openai_events() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                let body = concat!(
                    "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
                    "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":2,\"completion_tokens\":3,\"total_tokens\":5}}\n\n",
                    "data: [DONE]\n\n",
                );
                ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
            }),
        );
        let base = spawn_upstream(router).await;
        let client = AiClient::new(Duration::from_secs(5));

        let chunks: Vec<CompletionChunk> = client
            .stream(&target(ServiceKind::DeepSeek, base), "hello")
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(chunks, vec![
            CompletionChunk::Text("Hel".to_string()),
            CompletionChunk::Text("lo".to_string()),
            CompletionChunk::Finished(Some(Usage::new(2, 3, Some(5)))),
        ]);
    }

    #[tokio::test]
    async fn test_stream_ollama_ndjson() {
        let router = Router::new().route(
            "/api/chat",
            post(|| async {
                concat!(
                    "{\"message\":{\"content\":\"A\"},\"done\":false}\n",
                    "{\"message\":{\"content\":\"B\"},\"done\":false}\n",
                    "{\"message\":{\"content\":\"\"},\"done\":true,\"prompt_eval_count\":4,\"eval_count\":6}\n",
                )
            }),
        );
        let base = spawn_upstream(router).await;
        let client = AiClient::new(Duration::from_secs(5));

        let chunks: Vec<CompletionChunk> = client
            .stream(&target(ServiceKind::Ollama, base), "hello")
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(chunks, vec![
            CompletionChunk::Text("A".to_string()),
            CompletionChunk::Text("B".to_string()),
            CompletionChunk::Finished(Some(Usage::new(4, 6, None))),
        ]);
    }

    #[tokio::test]
    async fn test_stream_ends_on_garbage() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\ndata: {broken\n\n"
            }),
        );
        let base = spawn_upstream(router).await;
        let client = AiClient::new(Duration::from_secs(5));

        let chunks: Vec<CompletionChunk> = client
            .stream(&target(ServiceKind::OpenAi, base), "hello")
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(chunks, vec![
            CompletionChunk::Text("ok".to_string()),
            CompletionChunk::Finished(None),
        ]);
    }

    #[tokio::test]
    async fn test_stalled_stream_ends_after_read_timeout() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                let body = async_stream::stream! {
                    yield Ok::<_, std::convert::Infallible>(
                        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n".to_string(),
                    );
                    std::future::pending::<()>().await;
                };
                (
                    [(header::CONTENT_TYPE, "text/event-stream")],
                    axum::body::Body::from_stream(body),
                )
                    .into_response()
            }),
        );
        let base = spawn_upstream(router).await;
        let client = AiClient::new(Duration::from_millis(300));

        let stream = client
            .stream(&target(ServiceKind::OpenAi, base), "hello")
            .await
            .unwrap();
        let chunks: Vec<CompletionChunk> = tokio::time::timeout(Duration::from_secs(10), stream.collect())
            .await
            .unwrap();
        assert_eq!(
            chunks,
            vec![
                CompletionChunk::Text("Hel".to_string()),
                CompletionChunk::Finished(None),
            ]
        );
    }
}
