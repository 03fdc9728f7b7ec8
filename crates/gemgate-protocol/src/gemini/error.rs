use serde::{Deserialize, Serialize};

/// Error envelope returned by the Gemini API, both as an HTTP body and as an
/// in-band SSE frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiErrorResponse {
    pub error: GeminiErrorBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}
