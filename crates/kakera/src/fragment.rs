use std::{fmt, time::Duration};

use bytes::Bytes;
use reqwest::header::HeaderMap;
use url::Url;

use crate::util::range::ByteRange;

/// Position of a request in the logical fragment order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FragmentIndex {
    /// Discovery request issued before the first fragment. Its payload is never
    /// persisted.
    Bootstrap,
    /// 1-based ordinal of a fragment, or of a page for continuation sources.
    Ordinal(u64),
}

impl FragmentIndex {
    pub fn is_bootstrap(&self) -> bool {
        matches!(self, Self::Bootstrap)
    }

    pub fn ordinal(&self) -> Option<u64> {
        match self {
            Self::Bootstrap => None,
            Self::Ordinal(n) => Some(*n),
        }
    }
}

impl fmt::Display for FragmentIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bootstrap => write!(f, "bootstrap"),
            Self::Ordinal(n) => write!(f, "{n}"),
        }
    }
}

/// One fetch unit handed out by a [FragmentSource](crate::source::FragmentSource).
#[derive(Debug, Clone)]
pub struct FragmentRequest {
    pub index: FragmentIndex,
    pub url: Url,
    /// Request body. A request with a body is sent as `POST`.
    pub body: Option<Bytes>,
    /// Headers overriding the client's default headers.
    pub headers: Option<HeaderMap>,
    pub byte_range: Option<ByteRange>,
    /// The continuation token this request was built from, if any.
    pub token: Option<String>,
    /// A fatal fragment is never skipped, even when skipping is enabled.
    pub fatal: bool,
}

impl FragmentRequest {
    pub fn new(index: FragmentIndex, url: Url) -> Self {
        Self {
            index,
            url,
            body: None,
            headers: None,
            byte_range: None,
            token: None,
            fatal: false,
        }
    }

    pub fn bootstrap(url: Url) -> Self {
        Self::new(FragmentIndex::Bootstrap, url)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_byte_range(mut self, byte_range: ByteRange) -> Self {
        self.byte_range = Some(byte_range);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn fatal(mut self, fatal: bool) -> Self {
        self.fatal = fatal;
        self
    }
}

/// Provider specific data needed to request the page after this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// An opaque token, substituted into the next request as is.
    Token(String),
    /// Chat replay and live chat continuation.
    LiveChat {
        id: String,
        click_tracking_params: Option<String>,
    },
}

impl Continuation {
    /// The token identifying the next page. Two continuations with the same
    /// token request the same page.
    pub fn token(&self) -> &str {
        match self {
            Self::Token(token) => token,
            Self::LiveChat { id, .. } => id,
        }
    }
}

/// Outcome of one successful fetch.
#[derive(Debug, Clone)]
pub struct FragmentResult {
    pub index: FragmentIndex,
    /// Bytes to append to the output. May be empty when a page carried no
    /// entries yet.
    pub payload: Bytes,
    /// `None` means the provider has no further pages.
    pub continuation: Option<Continuation>,
    /// Playback offset in milliseconds reached by this page.
    pub offset_ms: Option<u64>,
    /// Delay the provider asked for before polling the next page.
    pub poll_delay: Option<Duration>,
}

impl FragmentResult {
    pub fn new(index: FragmentIndex, payload: impl Into<Bytes>) -> Self {
        Self {
            index,
            payload: payload.into(),
            continuation: None,
            offset_ms: None,
            poll_delay: None,
        }
    }

    pub fn with_continuation(mut self, continuation: Option<Continuation>) -> Self {
        self.continuation = continuation;
        self
    }

    pub fn with_offset(mut self, offset_ms: Option<u64>) -> Self {
        self.offset_ms = offset_ms;
        self
    }

    pub fn with_poll_delay(mut self, poll_delay: Option<Duration>) -> Self {
        self.poll_delay = poll_delay;
        self
    }
}
