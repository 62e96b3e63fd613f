//! Chat replay and live chat, fetched page by page through continuations.
//!
//! The watch page is fetched first to discover the initial continuation.
//! Every following page is a `POST` to the chat API, and each chat action is
//! written as one JSON line.

mod decoder;
mod request;

pub use decoder::{parse_initial_data, LiveChatDecoder};
pub use request::LiveChatRequestBuilder;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::{
    error::KakeraResult,
    fetch::HttpFetcher,
    fragment::FragmentRequest,
    source::ContinuationSource,
    util::http::HttpClient,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveChatMode {
    /// Chat of a finished stream.
    #[default]
    Replay,
    /// Chat of a stream still on air. Runs until the stream ends.
    Live,
}

impl LiveChatMode {
    pub fn default_api_url(&self) -> &'static str {
        match self {
            Self::Replay => "https://www.youtube.com/youtubei/v1/live_chat/get_live_chat_replay",
            Self::Live => "https://www.youtube.com/youtubei/v1/live_chat/get_live_chat",
        }
    }
}

/// Everything needed to download one chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveChatOptions {
    pub watch_url: Url,
    #[serde(default)]
    pub mode: LiveChatMode,
    /// Defaults to [LiveChatMode::default_api_url].
    #[serde(default)]
    pub api_url: Option<Url>,
    /// Client context sent with every request.
    #[serde(default)]
    pub context: Value,
}

impl LiveChatOptions {
    pub fn source(&self) -> KakeraResult<ContinuationSource<LiveChatRequestBuilder>> {
        let api_url = match &self.api_url {
            Some(url) => url.clone(),
            None => Url::parse(self.mode.default_api_url())?,
        };
        Ok(ContinuationSource::with_bootstrap(
            FragmentRequest::bootstrap(self.watch_url.clone()),
            LiveChatRequestBuilder::new(api_url, self.context.clone()),
        ))
    }

    pub fn fetcher(&self, client: HttpClient) -> HttpFetcher<LiveChatDecoder> {
        HttpFetcher::with_decoder(client, LiveChatDecoder::new(self.mode))
    }
}
