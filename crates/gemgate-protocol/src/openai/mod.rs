pub mod chat_completions;
pub mod error;
pub mod list_models;

pub use chat_completions::{
    ChatCompletionChoice, ChatCompletionChunkObjectType, ChatCompletionFinishReason,
    ChatCompletionMessageContent, ChatCompletionObjectType, ChatCompletionRequestMessage,
    ChatCompletionResponseMessage, ChatCompletionRole, ChatCompletionStreamChoice,
    ChatCompletionStreamResponseDelta, CompletionUsage, ContentPart, CreateChatCompletionRequestBody,
    CreateChatCompletionResponse, CreateChatCompletionStreamResponse, ImageUrl, StopConfiguration,
};
pub use error::{ErrorDetail, ErrorResponse};
pub use list_models::{ListModelsResponse, Model};
