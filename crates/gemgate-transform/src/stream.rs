use bytes::Bytes;
use serde::Deserialize;

use gemgate_protocol::gemini::{GeminiErrorResponse, GenerateContentResponse};
use gemgate_protocol::openai::{
    ChatCompletionChunkObjectType, ChatCompletionFinishReason, ChatCompletionRole,
    ChatCompletionStreamChoice, ChatCompletionStreamResponseDelta,
    CreateChatCompletionStreamResponse, ErrorResponse,
};
use gemgate_protocol::sse::{DONE_FRAME, SseEvent, SseParser, data_frame};

use crate::mapping::map_finish_reason;
use crate::response::CompletionMeta;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UpstreamFrame {
    Error(GeminiErrorResponse),
    Chunk(GenerateContentResponse),
}

/// Turns a Gemini `streamGenerateContent?alt=sse` byte stream into OpenAI
/// `chat.completion.chunk` frames.
///
/// Output depends only on the constructor's [`CompletionMeta`] and the input
/// bytes, so replaying the same upstream stream yields the same frames.
#[derive(Debug)]
pub struct GeminiStreamTranslator {
    meta: CompletionMeta,
    parser: SseParser,
    role_sent: bool,
    finish_sent: bool,
    failed: bool,
}

impl GeminiStreamTranslator {
    pub fn new(meta: CompletionMeta) -> Self {
        Self {
            meta,
            parser: SseParser::new(),
            role_sent: false,
            finish_sent: false,
            failed: false,
        }
    }

    pub fn meta(&self) -> &CompletionMeta {
        &self.meta
    }

    /// True once the upstream reported an in-band error.
    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn push(&mut self, chunk: &Bytes) -> Vec<Bytes> {
        let events = self.parser.push_bytes(chunk);
        self.translate_events(events)
    }

    /// Flushes the parser and appends the terminating `[DONE]` frame.
    pub fn finish(&mut self) -> Vec<Bytes> {
        let events = self.parser.finish();
        let mut out = self.translate_events(events);
        out.push(Bytes::from_static(DONE_FRAME));
        out
    }

    fn translate_events(&mut self, events: Vec<SseEvent>) -> Vec<Bytes> {
        let mut out = Vec::new();
        for event in events {
            if self.failed || event.is_done() || event.data.trim().is_empty() {
                continue;
            }
            // Malformed frames are dropped; the rest of the stream may still be usable.
            let Ok(frame) = serde_json::from_str::<UpstreamFrame>(&event.data) else {
                continue;
            };
            match frame {
                UpstreamFrame::Error(error) => {
                    self.failed = true;
                    out.push(error_frame(
                        &error.error.message,
                        error.error.status.as_deref(),
                    ));
                }
                UpstreamFrame::Chunk(response) => self.translate_chunk(response, &mut out),
            }
        }
        out
    }

    fn translate_chunk(&mut self, response: GenerateContentResponse, out: &mut Vec<Bytes>) {
        let Some(candidate) = response.candidates.first() else {
            return;
        };
        let text = candidate.text();
        if !text.is_empty() {
            let role = if self.role_sent {
                None
            } else {
                self.role_sent = true;
                Some(ChatCompletionRole::Assistant)
            };
            out.push(self.encode(
                ChatCompletionStreamResponseDelta {
                    role,
                    content: Some(text),
                },
                None,
            ));
        }
        if let Some(reason) = candidate.finish_reason
            && !self.finish_sent
        {
            self.finish_sent = true;
            out.push(self.encode(
                ChatCompletionStreamResponseDelta::default(),
                Some(map_finish_reason(reason)),
            ));
        }
    }

    fn encode(
        &self,
        delta: ChatCompletionStreamResponseDelta,
        finish_reason: Option<ChatCompletionFinishReason>,
    ) -> Bytes {
        let chunk = CreateChatCompletionStreamResponse {
            id: self.meta.id.clone(),
            object: ChatCompletionChunkObjectType::ChatCompletionChunk,
            created: self.meta.created,
            model: self.meta.model.clone(),
            choices: vec![ChatCompletionStreamChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        };
        match serde_json::to_string(&chunk) {
            Ok(json) => data_frame(&json),
            Err(err) => error_frame(&err.to_string(), None),
        }
    }
}

/// In-band error frame sent after the response headers are already out.
pub fn error_frame(message: &str, code: Option<&str>) -> Bytes {
    let body = ErrorResponse::new(message, "upstream_error", code);
    match serde_json::to_string(&body) {
        Ok(json) => data_frame(&json),
        Err(_) => data_frame(r#"{"error":{"message":"stream failed","type":"upstream_error"}}"#),
    }
}
