//! Translation between OpenAI chat completions and Gemini `generateContent`.

mod mapping;
pub mod model_map;
pub mod request;
pub mod response;
pub mod stream;

pub use mapping::{map_finish_reason, map_usage};
pub use model_map::{DEFAULT_UPSTREAM_MODEL, ModelMap};
pub use request::{GenerationDefaults, transform_request};
pub use response::{CompletionMeta, transform_response};
pub use stream::{GeminiStreamTranslator, error_frame};
