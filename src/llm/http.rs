//! HTTP plumbing shared by the wire-format adapters: client construction, status
//! code classification and server-sent-event decoding.

use crate::error::AIError;
use crate::llm::types::{ProviderConfig, ProviderType};
use reqwest::StatusCode;
use url::Url;

pub(crate) fn build_client(config: &ProviderConfig) -> Result<reqwest::Client, AIError> {
    reqwest::Client::builder()
        .timeout(config.timeout())
        .build()
        .map_err(|e| AIError::Configuration(format!("failed to build HTTP client: {}", e)))
}

/// Join `path` onto the configured base URL, validating the base on the way.
pub(crate) fn endpoint(config: &ProviderConfig, path: &str) -> Result<String, AIError> {
    let base = config.base_url().trim_end_matches('/');
    Url::parse(base).map_err(|e| {
        AIError::Configuration(format!(
            "invalid base URL '{}' for {}: {}",
            base, config.provider_type, e
        ))
    })?;
    Ok(format!("{}/{}", base, path.trim_start_matches('/')))
}

/// Require an API key for backends that authenticate.
pub(crate) fn require_api_key(config: &ProviderConfig) -> Result<Option<String>, AIError> {
    match (config.resolve_api_key(), config.provider_type.default_api_key_env()) {
        (Some(key), _) => Ok(Some(key)),
        (None, None) => Ok(None),
        (None, Some(var)) => Err(AIError::Authentication(format!(
            "no API key configured for {} (set api_key, api_key_env or {})",
            config.provider_type, var
        ))),
    }
}

/// Classify a non-success HTTP response into the error taxonomy.
pub(crate) fn map_status_error(provider: ProviderType, status: StatusCode, body: &str) -> AIError {
    let message = truncate(body, 500);
    let lowered = body.to_lowercase();
    match status.as_u16() {
        401 | 403 => AIError::Authentication(format!("{}: {}", provider, message)),
        429 => AIError::RateLimitExceeded {
            provider,
            message,
            reset_time: None,
        },
        400 | 413 | 422
            if lowered.contains("context_length")
                || lowered.contains("context length")
                || lowered.contains("maximum context")
                || lowered.contains("prompt is too long") =>
        {
            AIError::ContextLengthExceeded { current: 0, max: 0 }
        }
        400 | 404 | 413 | 422 => AIError::InvalidRequest(format!("{}: {}", provider, message)),
        code => AIError::Provider {
            provider,
            message,
            status: Some(code),
        },
    }
}

pub(crate) fn map_transport_error(provider: ProviderType, timeout_ms: u64, error: reqwest::Error) -> AIError {
    if error.is_timeout() {
        AIError::Timeout {
            provider: Some(provider),
            timeout_ms,
        }
    } else {
        AIError::Provider {
            provider,
            message: error.to_string(),
            status: error.status().map(|s| s.as_u16()),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max_chars).collect();
        out.push_str("...");
        out
    }
}

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental server-sent-events decoder. Bytes may arrive split anywhere,
/// including inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = Self::parse_block(&block[..pos]) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let block = std::mem::take(&mut self.buffer);
        Self::parse_block(&block).into_iter().collect()
    }

    fn parse_block(block: &[u8]) -> Option<SseEvent> {
        let text = String::from_utf8_lossy(block);
        let mut event = None;
        let mut data: Vec<&str> = Vec::new();
        for line in text.lines() {
            if line.starts_with(':') {
                continue;
            }
            if let Some(value) = line.strip_prefix("event:") {
                event = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("data:") {
                data.push(value.strip_prefix(' ').unwrap_or(value));
            }
        }
        if data.is_empty() && event.is_none() {
            return None;
        }
        Some(SseEvent {
            event,
            data: data.join("\n"),
        })
    }
}
