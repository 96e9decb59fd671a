use thiserror::Error;

/// Failure inside an already-open response stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Request cancelled")]
    Cancelled,

    #[error("SSE parse error: {0}")]
    SseParse(String),

    #[error("{provider} stream error: {message}")]
    Provider { provider: String, message: String },
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Authentication failed for {provider}: {details}")]
    AuthenticationFailed { provider: String, details: String },

    #[error("Rate limited by {provider}: {details}")]
    RateLimited { provider: String, details: String },

    #[error("Invalid request to {provider}: {details}")]
    InvalidRequest { provider: String, details: String },

    #[error("{provider} server error (Status: {status_code}): {details}")]
    ServerError {
        provider: String,
        status_code: u16,
        details: String,
    },

    #[error("Request cancelled for {provider}")]
    Cancelled { provider: String },

    #[error("Failed to parse response from {provider}: {details}")]
    ResponseParsingError { provider: String, details: String },

    #[error("API returned no choices for {provider}")]
    NoChoices { provider: String },

    #[error("Stream error from {provider}: {details}")]
    StreamError { provider: String, details: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ApiError {
    /// Map a non-success HTTP status and its body to an error.
    pub fn from_status(provider: &str, status_code: u16, body: String) -> Self {
        let provider = provider.to_string();
        match status_code {
            401 | 403 => ApiError::AuthenticationFailed {
                provider,
                details: body,
            },
            429 => ApiError::RateLimited {
                provider,
                details: body,
            },
            400 => ApiError::InvalidRequest {
                provider,
                details: body,
            },
            _ => ApiError::ServerError {
                provider,
                status_code,
                details: body,
            },
        }
    }

    pub fn from_stream_error(provider: &str, err: StreamError) -> Self {
        match err {
            StreamError::Cancelled => ApiError::Cancelled {
                provider: provider.to_string(),
            },
            other => ApiError::StreamError {
                provider: provider.to_string(),
                details: other.to_string(),
            },
        }
    }

    /// Errors that usually mean the API key or endpoint is wrong, or the
    /// network is down.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            ApiError::Network(_) | ApiError::AuthenticationFailed { .. }
        )
    }
}
