use std::{collections::BTreeMap, time::Duration};

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    ClientBuilder,
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    config::EngineConfig,
    error::{KakeraError, KakeraResult},
    fetch::{HttpFetcher, JsonTokenDecoder, RawDecoder, ResponseDecoder},
    fragment::{Continuation, FragmentIndex, FragmentRequest},
    heartbeat::HttpHeartbeat,
    livechat::{LiveChatDecoder, LiveChatOptions},
    source::{ContinuationSource, FiniteSource, FragmentSource, TemplateRequestBuilder},
    util::{http::HttpClient, range::ByteRange},
};

/// What a site extractor hands over to download one resolved media.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub source: SourceDescriptor,
    #[serde(default)]
    pub heartbeat: Option<HeartbeatDescriptor>,
    /// Expected extension of the output, without the leading dot.
    #[serde(default)]
    pub extension: Option<String>,
    /// Headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// `Set-Cookie` style cookies, scoped to [Self::origin] unless they carry
    /// their own domain.
    #[serde(default)]
    pub cookies: Vec<String>,
    #[serde(default)]
    pub is_live: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceDescriptor {
    Finite {
        fragments: Vec<FragmentDescriptor>,
    },
    /// A JSON API returning the token of its next page.
    Paginated {
        /// Discovery request, answered with the first token.
        #[serde(default)]
        bootstrap: Option<Url>,
        #[serde(default)]
        first_token: Option<String>,
        /// URL of every page, with `{token}` in place of the token.
        url_template: String,
        /// JSON pointer to the next token.
        token_pointer: String,
        /// JSON pointer to the entries to keep. The whole body when absent.
        #[serde(default)]
        data_pointer: Option<String>,
    },
    LiveChat(LiveChatOptions),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentDescriptor {
    pub url: Url,
    #[serde(default)]
    pub byte_range: Option<ByteRange>,
    /// Sent as a `POST` body.
    #[serde(default)]
    pub body: Option<String>,
    /// Never skipped, even when unavailable fragments are skipped.
    #[serde(default)]
    pub fatal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatDescriptor {
    pub url: Url,
    #[serde(default)]
    pub payload: Option<String>,
    pub interval_secs: f64,
}

impl HeartbeatDescriptor {
    pub fn interval(&self) -> KakeraResult<Duration> {
        Duration::try_from_secs_f64(self.interval_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or_else(|| {
                KakeraError::InvalidConfig(format!(
                    "invalid heartbeat interval: {}",
                    self.interval_secs
                ))
            })
    }
}

impl ProviderDescriptor {
    pub fn from_json(data: &[u8]) -> KakeraResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Continuation sources have no known end, so they always run as live.
    pub fn is_live(&self) -> bool {
        self.is_live || !matches!(self.source, SourceDescriptor::Finite { .. })
    }

    pub fn extension(&self) -> &str {
        self.extension.as_deref().unwrap_or_else(|| match self.source {
            SourceDescriptor::Finite { .. } => "ts",
            _ => "jsonl",
        })
    }

    pub fn engine_config(&self, config: EngineConfig) -> EngineConfig {
        let is_live = config.is_live || self.is_live();
        config.live(is_live)
    }

    pub fn header_map(&self) -> KakeraResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (key, value) in &self.headers {
            headers.insert(
                HeaderName::from_bytes(key.as_bytes())?,
                HeaderValue::from_str(value)?,
            );
        }
        Ok(headers)
    }

    /// The first URL the download talks to.
    pub fn origin(&self) -> KakeraResult<Url> {
        match &self.source {
            SourceDescriptor::Finite { fragments } => fragments
                .first()
                .map(|f| f.url.clone())
                .ok_or_else(|| KakeraError::InvalidConfig("no fragments to download".to_string())),
            SourceDescriptor::Paginated {
                bootstrap: Some(url),
                ..
            } => Ok(url.clone()),
            SourceDescriptor::Paginated { url_template, .. } => {
                Ok(Url::parse(&url_template.replace("{token}", ""))?)
            }
            SourceDescriptor::LiveChat(options) => Ok(options.watch_url.clone()),
        }
    }

    /// A client sending the descriptor headers and cookies by default.
    pub fn client(&self, builder: ClientBuilder) -> KakeraResult<HttpClient> {
        let client = HttpClient::with_headers(builder, self.header_map()?)?;
        if !self.cookies.is_empty() {
            client.add_cookies(self.cookies.clone(), self.origin()?)?;
        }
        Ok(client)
    }

    pub fn source(&self) -> KakeraResult<Box<dyn FragmentSource>> {
        let source: Box<dyn FragmentSource> = match &self.source {
            SourceDescriptor::Finite { fragments } => {
                if fragments.is_empty() {
                    return Err(KakeraError::InvalidConfig("no fragments to download".to_string()));
                }
                Box::new(FiniteSource::new(
                    fragments.iter().map(FragmentDescriptor::request).collect(),
                ))
            }
            SourceDescriptor::Paginated {
                bootstrap,
                first_token,
                url_template,
                ..
            } => {
                if !url_template.contains("{token}") {
                    return Err(KakeraError::InvalidConfig(format!(
                        "{url_template} has no {{token}} placeholder"
                    )));
                }
                let builder = TemplateRequestBuilder::new(url_template.clone());
                match (bootstrap, first_token) {
                    (Some(url), _) => Box::new(ContinuationSource::with_bootstrap(
                        FragmentRequest::bootstrap(url.clone()),
                        builder,
                    )),
                    (None, Some(token)) => Box::new(ContinuationSource::with_token(
                        Continuation::Token(token.clone()),
                        builder,
                    )),
                    (None, None) => {
                        return Err(KakeraError::InvalidConfig(
                            "a paginated source needs a bootstrap url or a first token".to_string(),
                        ))
                    }
                }
            }
            SourceDescriptor::LiveChat(options) => Box::new(options.source()?),
        };
        Ok(source)
    }

    pub fn fetcher(&self, client: HttpClient) -> HttpFetcher<Box<dyn ResponseDecoder>> {
        let decoder: Box<dyn ResponseDecoder> = match &self.source {
            SourceDescriptor::Finite { .. } => Box::new(RawDecoder),
            SourceDescriptor::Paginated {
                token_pointer,
                data_pointer,
                ..
            } => {
                let decoder = JsonTokenDecoder::new(token_pointer.clone());
                match data_pointer {
                    Some(pointer) => Box::new(decoder.with_data_pointer(pointer.clone())),
                    None => Box::new(decoder),
                }
            }
            SourceDescriptor::LiveChat(options) => Box::new(LiveChatDecoder::new(options.mode)),
        };
        HttpFetcher::with_decoder(client, decoder)
    }

    pub fn heartbeat(&self, client: HttpClient) -> KakeraResult<Option<(HttpHeartbeat, Duration)>> {
        let Some(heartbeat) = &self.heartbeat else {
            return Ok(None);
        };

        let mut pinger = HttpHeartbeat::new(client, heartbeat.url.clone());
        if let Some(payload) = &heartbeat.payload {
            pinger = pinger.with_payload(payload.clone());
        }
        Ok(Some((pinger, heartbeat.interval()?)))
    }
}

impl FragmentDescriptor {
    fn request(&self) -> FragmentRequest {
        let mut request =
            FragmentRequest::new(FragmentIndex::Ordinal(0), self.url.clone()).fatal(self.fatal);
        if let Some(byte_range) = self.byte_range {
            request = request.with_byte_range(byte_range);
        }
        if let Some(body) = &self.body {
            request = request.with_body(body.clone());
        }
        request
    }
}
