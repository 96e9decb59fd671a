mod client;
mod types;

pub use client::OpenAIClient;

/// Provider name used in errors and logs.
pub(crate) const PROVIDER_NAME: &str = "openai";
