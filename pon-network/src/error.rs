//! Error types for the HTTP peer client

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Invalid peer URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Peer answered with status {0}")]
    Status(u16),

    #[error("Malformed response: {0}")]
    Decode(String),
}
