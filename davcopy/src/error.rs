use std::io;
use std::path::PathBuf;

use http::StatusCode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Credential and trust errors
    #[error("failed to load client credentials from {}: {reason}", path.display())]
    Credential { path: PathBuf, reason: String },
    #[error("failed to read CA directory {}: {source}", path.display())]
    TrustStore {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not locate default credentials: {0}")]
    CredentialLocation(String),
    #[error("failed to set up HTTP client: {0}")]
    ClientSetup(#[source] reqwest::Error),

    // Network errors
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    // Token service errors
    #[error("token service returned unexpected status code: {status}")]
    TokenService { status: StatusCode },
    #[error("malformed token response: {0}")]
    Protocol(#[source] serde_json::Error),

    // Redirect errors
    #[error("invalid redirect: {0}")]
    Redirect(String),
    #[error("stopped after {0} redirects")]
    TooManyRedirects(usize),
    #[error("failed to rewind request body: {0}")]
    BodyReplay(#[source] io::Error),

    // Transfer errors
    #[error("copy failed with unexpected status code: {status}")]
    Transfer { status: StatusCode },

    // Generic errors
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// HTTP status carried by token service and transfer failures.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::TokenService { status } | Error::Transfer { status } => Some(*status),
            _ => None,
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::InvalidRequest(format!("invalid url: {}", e))
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(e: http::header::InvalidHeaderValue) -> Self {
        Error::InvalidRequest(format!("invalid header value: {}", e))
    }
}
