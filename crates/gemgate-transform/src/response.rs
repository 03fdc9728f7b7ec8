use gemgate_protocol::gemini::GenerateContentResponse;
use gemgate_protocol::openai::{
    ChatCompletionChoice, ChatCompletionFinishReason, ChatCompletionObjectType,
    ChatCompletionResponseMessage, ChatCompletionRole, CreateChatCompletionResponse,
};
use time::OffsetDateTime;

use crate::mapping::{map_finish_reason, map_usage};

/// Identity stamped on every object of one completion, buffered or streamed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionMeta {
    pub id: String,
    pub model: String,
    pub created: i64,
}

impl CompletionMeta {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            model: model.into(),
            created: OffsetDateTime::now_utc().unix_timestamp(),
        }
    }
}

/// Only the first candidate is surfaced. A body without candidates is still
/// a success with empty content.
pub fn transform_response(
    response: GenerateContentResponse,
    meta: &CompletionMeta,
) -> CreateChatCompletionResponse {
    let first = response.candidates.first();
    let content = first.map(|candidate| candidate.text()).unwrap_or_default();
    let finish_reason = first
        .and_then(|candidate| candidate.finish_reason)
        .map(map_finish_reason)
        .unwrap_or(ChatCompletionFinishReason::Stop);

    CreateChatCompletionResponse {
        id: meta.id.clone(),
        object: ChatCompletionObjectType::ChatCompletion,
        created: meta.created,
        model: meta.model.clone(),
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: ChatCompletionResponseMessage {
                role: ChatCompletionRole::Assistant,
                content,
            },
            finish_reason,
        }],
        usage: map_usage(response.usage_metadata.as_ref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_ids_are_unique_and_prefixed() {
        let a = CompletionMeta::new("gpt-4o");
        let b = CompletionMeta::new("gpt-4o");
        assert!(a.id.starts_with("chatcmpl-"));
        assert_ne!(a.id, b.id);
        assert!(a.created > 0);
    }
}
