pub mod error;
pub mod generate_content;

pub use error::{GeminiErrorBody, GeminiErrorResponse};
pub use generate_content::{
    Blob, Candidate, Content, ContentRole, FinishReason, GenerateContentRequestBody,
    GenerateContentResponse, GenerationConfig, Part, UsageMetadata,
};
