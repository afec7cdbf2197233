use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Backend answered with a non-2xx status. `message` is the body text.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not authorized, please log in")]
    Unauthorized,

    #[error("Realtime channel not connected")]
    NotConnected,

    #[error("Realtime channel error: {0}")]
    Channel(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Session store error: {0}")]
    Session(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ClientError::Validation(msg.into())
    }

    /// True for failures that should force the user back to the login flow.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ClientError::Unauthorized)
            || matches!(self, ClientError::Http { status, .. } if *status == 401)
    }
}
