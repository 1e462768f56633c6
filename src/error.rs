//! Error type shared by the search client, notifier and persistence layers.
//!
//! The fetch loop itself never surfaces these to its caller: provider
//! failures end pagination and are reported through
//! [`StopReason::ProviderFailure`](crate::models::StopReason).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NewsError>;

#[derive(Debug, Error)]
pub enum NewsError {
    #[error("network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl From<reqwest::Error> for NewsError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            NewsError::Decode(err.to_string())
        } else {
            NewsError::Network(err.to_string())
        }
    }
}
