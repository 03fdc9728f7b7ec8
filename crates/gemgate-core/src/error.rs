use std::fmt;

use gemgate_protocol::gemini::GeminiErrorResponse;
use gemgate_protocol::openai::ErrorResponse;
use serde_json::error::Category;

const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    ReadTimeout,
    Connect,
    Dns,
    Tls,
    Other,
}

impl TransportErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::ReadTimeout => "read_timeout",
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Dns => "dns",
            TransportErrorKind::Tls => "tls",
            TransportErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed upstream attempt. The `Display` text is what the key pool
/// classifies, so it keeps the upstream's own wording.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamFailure {
    /// No HTTP response.
    #[error("upstream {kind} error: {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
    #[error("upstream returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("malformed upstream payload: {0}")]
    MalformedPayload(String),
}

impl UpstreamFailure {
    /// Prefers the Gemini error envelope's message; otherwise a bounded slice
    /// of the raw body.
    pub fn http(status: u16, body: &[u8]) -> Self {
        let body = match serde_json::from_slice::<GeminiErrorResponse>(body) {
            Ok(envelope) => match envelope.error.status {
                Some(code) => format!("{} ({code})", envelope.error.message),
                None => envelope.error.message,
            },
            Err(_) => String::from_utf8_lossy(body)
                .chars()
                .take(MAX_ERROR_BODY_CHARS)
                .collect(),
        };
        UpstreamFailure::Http { status, body }
    }

    /// Parse failure on a 2xx body. Only the error category is kept; serde's
    /// line and column numbers stay out of the text the pool classifies.
    pub fn malformed(err: &serde_json::Error) -> Self {
        let what = match err.classify() {
            Category::Eof => "body ended before the JSON value was complete",
            Category::Syntax => "body is not valid JSON",
            Category::Data => "JSON does not match the generateContent shape",
            Category::Io => "body could not be read",
        };
        UpstreamFailure::MalformedPayload(what.to_string())
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamFailure::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("no API key available{}", last_error_suffix(.last_error))]
    NoKeyAvailable { last_error: Option<String> },
    #[error("all {attempts} upstream attempts failed; last error: {last}")]
    AllRetriesExhausted { attempts: u32, last: UpstreamFailure },
    #[error("key {0} not found")]
    KeyNotFound(usize),
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(message) => format!(" (last error: {message})"),
        None => String::new(),
    }
}

impl GatewayError {
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::InvalidRequest(_) => 400,
            GatewayError::NoKeyAvailable { .. } => 503,
            GatewayError::AllRetriesExhausted { .. } => 502,
            GatewayError::KeyNotFound(_) => 404,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequest(_) => "invalid_request_error",
            GatewayError::NoKeyAvailable { .. } => "no_key_available",
            GatewayError::AllRetriesExhausted { .. } => "upstream_error",
            GatewayError::KeyNotFound(_) => "not_found",
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        let code = match self {
            GatewayError::AllRetriesExhausted { last, .. } => {
                last.status().map(|status| status.to_string())
            }
            _ => None,
        };
        ErrorResponse::new(self.to_string(), self.error_type(), code.as_deref())
    }
}
