use thiserror::Error;

use crate::fragment::FragmentIndex;

#[derive(Error, Debug)]
pub enum KakeraError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Fatal error: {0}")]
    Fatal(String),

    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("Heartbeat failed: {0}")]
    Heartbeat(String),

    #[error("Fragment {index} given up after {attempts} attempt(s): {source}")]
    GivenUp {
        index: FragmentIndex,
        attempts: u32,
        #[source]
        source: Box<KakeraError>,
    },

    #[error("Invalid download configuration: {0}")]
    InvalidConfig(String),

    #[error("The downloaded file is empty")]
    EmptyOutput,

    #[error("Download aborted")]
    Aborted,

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    InvalidHeaderName(#[from] reqwest::header::InvalidHeaderName),

    #[error(transparent)]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),

    #[error(transparent)]
    TaskJoinError(#[from] tokio::task::JoinError),
}

impl KakeraError {
    /// Whether another attempt of the same request might succeed.
    ///
    /// Network failures, 5xx responses, `408 Request Timeout` and
    /// `429 Too Many Requests` are transient. Every other client error, and
    /// anything that went wrong after a body was received, will never succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::HttpError(status) => is_retryable_status(*status),
            Self::RequestError(e) => match e.status() {
                Some(status) => is_retryable_status(status),
                None => !e.is_builder() && !e.is_decode(),
            },
            Self::IOError(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }

    /// The fragment a terminal failure stopped at, if any.
    pub fn fragment_index(&self) -> Option<FragmentIndex> {
        match self {
            Self::GivenUp { index, .. } => Some(*index),
            _ => None,
        }
    }
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error()
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}

pub type KakeraResult<T> = Result<T, KakeraError>;
