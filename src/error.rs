use thiserror::Error;

/// Error surface of the client, mirroring how far a failure travelled:
/// validation failures never reach the network, remote failures come back
/// from the metadata/start calls, job failures are terminal poll statuses.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("server error: {0}")]
    Remote(String),

    #[error("download failed: {0}")]
    Job(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Wrap a server-provided message, falling back to a generic one when the
    /// response carried no usable error text.
    pub fn remote(message: Option<String>, fallback: &str) -> Self {
        ClientError::Remote(
            message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| fallback.to_string()),
        )
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
