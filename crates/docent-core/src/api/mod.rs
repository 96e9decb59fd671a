pub mod error;
pub mod openai;
pub mod provider;
pub mod sse;
pub mod util;

pub use error::{ApiError, StreamError};
pub use openai::OpenAIClient;
pub use provider::{
    ChatMessage, CompletionRequest, CompletionResponse, CompletionStream, ModelClient,
    StreamChunk,
};
