//! Upstream failure classification and credential redaction.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

static CREDENTIAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)api[\s_-]?key",
        r"(?i)\bbearer\b",
        r"(?i)\bauthori[sz]ation\b",
        r"(?i)\b(access|auth)[\s_-]?token\b",
        r"\bsk-[A-Za-z0-9_\-]{8,}",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

const AUTH_FAILURE_MESSAGE: &str = "AI service authentication failed or is misconfigured";

/// Failure talking to an AI completion endpoint.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// No response within the configured timeout
    #[error("request timed out after {seconds} seconds")]
    Timeout {
        /// Timeout that elapsed
        seconds: u64,
    },

    /// The endpoint answered with a non-success status
    #[error("HTTP {status}: {detail}")]
    Http {
        /// Response status code
        status: u16,
        /// Error message extracted from the body
        detail: String,
    },

    /// Connection-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The response did not have the expected shape
    #[error("unexpected response: {0}")]
    Format(String),
}

impl UpstreamError {
    /// Message safe to show to the end user.
    ///
    /// Anything that mentions credentials collapses into a generic
    /// authentication message.
    #[must_use]
    pub fn user_message(&self) -> String {
        let detail = match self {
            Self::Timeout { seconds } => {
                return format!("AI service did not respond within {seconds} seconds");
            }
            Self::Http { detail, .. } | Self::Transport(detail) | Self::Format(detail) => detail,
        };

        if mentions_credentials(detail) {
            return AUTH_FAILURE_MESSAGE.to_string();
        }

        match self {
            Self::Http { status, .. } if *status == 401 || *status == 403 => {
                AUTH_FAILURE_MESSAGE.to_string()
            }
            _ => format!("AI service error: {detail}"),
        }
    }

    pub(crate) fn from_reqwest(error: &reqwest::Error, timeout_secs: u64) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                seconds: timeout_secs,
            }
        } else if error.is_decode() {
            Self::Format(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

/// Whether a message talks about API keys or bearer tokens.
#[must_use]
pub fn mentions_credentials(text: &str) -> bool {
    CREDENTIAL_PATTERNS.iter().any(|pattern| pattern.is_match(text))
}

/// Pulls a human-readable error out of an upstream error body.
///
/// Looks at `error.message`, `error` (string), `detail` and `message` in that
/// order and falls back to the first 500 bytes of the raw body.
#[must_use]
pub fn extract_error_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let candidates = [
            value.pointer("/error/message"),
            value.get("error").filter(|e| e.is_string()),
            value.get("detail"),
            value.get("message"),
        ];
        for candidate in candidates.into_iter().flatten() {
            match candidate {
                serde_json::Value::String(s) if !s.is_empty() => return s.clone(),
                serde_json::Value::Null => {}
                other if !other.is_string() => return other.to_string(),
                _ => {}
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    truncate_chars(trimmed, 500)
}

fn truncate_chars(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
