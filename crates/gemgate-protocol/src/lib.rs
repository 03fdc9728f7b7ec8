//! Wire types for the two dialects the gateway speaks: OpenAI chat completions
//! downstream and Gemini `generateContent` upstream.

pub mod gemini;
pub mod openai;
pub mod sse;
