use gemgate_protocol::gemini::{FinishReason, UsageMetadata};
use gemgate_protocol::openai::{ChatCompletionFinishReason, CompletionUsage};

pub fn map_finish_reason(reason: FinishReason) -> ChatCompletionFinishReason {
    match reason {
        FinishReason::MaxTokens => ChatCompletionFinishReason::Length,
        FinishReason::Safety
        | FinishReason::Recitation
        | FinishReason::Blocklist
        | FinishReason::ProhibitedContent
        | FinishReason::Spii
        | FinishReason::ImageSafety
        | FinishReason::ImageProhibitedContent
        | FinishReason::ImageRecitation => ChatCompletionFinishReason::ContentFilter,
        _ => ChatCompletionFinishReason::Stop,
    }
}

/// Thinking tokens are billed as output, so they count toward `completion_tokens`.
pub fn map_usage(usage: Option<&UsageMetadata>) -> CompletionUsage {
    let Some(usage) = usage else {
        return CompletionUsage::default();
    };
    let prompt_tokens = i64::from(usage.prompt_token_count.unwrap_or(0));
    let completion_tokens = i64::from(usage.candidates_token_count.unwrap_or(0))
        + i64::from(usage.thoughts_token_count.unwrap_or(0));
    let total_tokens = usage
        .total_token_count
        .map(i64::from)
        .unwrap_or(prompt_tokens + completion_tokens);
    CompletionUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reasons() {
        assert_eq!(
            map_finish_reason(FinishReason::Stop),
            ChatCompletionFinishReason::Stop
        );
        assert_eq!(
            map_finish_reason(FinishReason::MaxTokens),
            ChatCompletionFinishReason::Length
        );
        assert_eq!(
            map_finish_reason(FinishReason::ProhibitedContent),
            ChatCompletionFinishReason::ContentFilter
        );
        assert_eq!(
            map_finish_reason(FinishReason::Other),
            ChatCompletionFinishReason::Stop
        );
    }

    #[test]
    fn usage_defaults_to_zero_and_sums_thoughts() {
        assert_eq!(map_usage(None), CompletionUsage::default());
        let usage = UsageMetadata {
            prompt_token_count: Some(10),
            candidates_token_count: Some(5),
            thoughts_token_count: Some(3),
            total_token_count: None,
        };
        assert_eq!(
            map_usage(Some(&usage)),
            CompletionUsage {
                prompt_tokens: 10,
                completion_tokens: 8,
                total_tokens: 18,
            }
        );
    }
}
