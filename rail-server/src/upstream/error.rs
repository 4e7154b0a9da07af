//! Upstream API error types.

/// Errors from the open-data and Navitia HTTP clients.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// HTTP request failed (network error, timeout, etc.)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Invalid or missing API key
    #[error("unauthorized (invalid API key)")]
    Unauthorized,

    /// Response body did not match the expected shape
    #[error("JSON parse error: {message}")]
    Json { message: String },

    /// The configured base URL cannot be used
    #[error("invalid base URL: {0}")]
    BadUrl(String),
}
