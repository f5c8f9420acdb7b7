use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response; `error`/`message` come from the JSON error body.
    #[error("api returned {status}: {error}: {message}")]
    Api {
        status: u16,
        error: String,
        message: String,
    },

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ClientError {
    /// Broker down at submit time; worth retrying later.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ClientError::Api { status: 503, .. })
    }
}
