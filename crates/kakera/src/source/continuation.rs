use std::{collections::HashSet, mem};

use reqwest::header::HeaderMap;
use url::Url;

use super::{FragmentSource, Next, SourceKind};
use crate::{
    error::{KakeraError, KakeraResult},
    fragment::{Continuation, FragmentIndex, FragmentRequest, FragmentResult},
};

/// Turns the continuation of the previous page into the request of the next.
pub trait ContinuationRequestBuilder: Send {
    /// Build the request of page `page` (1-based).
    ///
    /// `previous` is the result that carried `continuation`, `None` when the
    /// source was seeded with a token.
    fn build(
        &mut self,
        page: u64,
        continuation: &Continuation,
        previous: Option<&FragmentResult>,
    ) -> KakeraResult<FragmentRequest>;
}

impl<F> ContinuationRequestBuilder for F
where
    F: FnMut(u64, &Continuation, Option<&FragmentResult>) -> KakeraResult<FragmentRequest> + Send,
{
    fn build(
        &mut self,
        page: u64,
        continuation: &Continuation,
        previous: Option<&FragmentResult>,
    ) -> KakeraResult<FragmentRequest> {
        self(page, continuation, previous)
    }
}

enum State {
    Bootstrap(FragmentRequest),
    AwaitingBootstrap,
    Seeded(Continuation),
    Running,
    Done,
}

/// An open-ended sequence of pages, each one naming the next.
///
/// The sequence ends only when a page carries no continuation, or repeats a
/// token that was already requested. An empty page does not end it.
pub struct ContinuationSource<B> {
    builder: B,
    state: State,
    page: u64,
    seen: HashSet<String>,
}

impl<B> ContinuationSource<B>
where
    B: ContinuationRequestBuilder,
{
    /// Start with a discovery request whose response carries the first
    /// continuation.
    pub fn with_bootstrap(mut bootstrap: FragmentRequest, builder: B) -> Self {
        bootstrap.index = FragmentIndex::Bootstrap;
        Self {
            builder,
            state: State::Bootstrap(bootstrap),
            page: 0,
            seen: HashSet::new(),
        }
    }

    /// Start directly from a known continuation.
    pub fn with_token(continuation: Continuation, builder: B) -> Self {
        Self {
            builder,
            state: State::Seeded(continuation),
            page: 0,
            seen: HashSet::new(),
        }
    }

    fn request(
        &mut self,
        continuation: &Continuation,
        previous: Option<&FragmentResult>,
    ) -> KakeraResult<Next> {
        let token = continuation.token();
        if !self.seen.insert(token.to_string()) {
            tracing::debug!("Continuation {token} was already requested, stopping.");
            self.state = State::Done;
            return Ok(Next::Done);
        }

        self.page += 1;
        let mut request = self.builder.build(self.page, continuation, previous)?;
        request.index = FragmentIndex::Ordinal(self.page);
        request.token = Some(token.to_string());
        request.fatal = true;

        self.state = State::Running;
        Ok(Next::Fetch(request))
    }
}

impl<B> FragmentSource for ContinuationSource<B>
where
    B: ContinuationRequestBuilder,
{
    fn next(&mut self, previous: Option<&FragmentResult>) -> KakeraResult<Next> {
        match mem::replace(&mut self.state, State::Done) {
            State::Bootstrap(request) => {
                self.state = State::AwaitingBootstrap;
                Ok(Next::Fetch(request))
            }
            State::AwaitingBootstrap => {
                let Some(previous) = previous else {
                    return Err(KakeraError::Bootstrap(
                        "the bootstrap response was not provided".to_string(),
                    ));
                };
                match &previous.continuation {
                    Some(continuation) => self.request(continuation, Some(previous)),
                    None => Err(KakeraError::Bootstrap(
                        "no continuation found in the bootstrap response".to_string(),
                    )),
                }
            }
            State::Seeded(continuation) => self.request(&continuation, previous),
            State::Running => match previous.and_then(|r| r.continuation.as_ref()) {
                Some(continuation) => self.request(continuation, previous),
                None => Ok(Next::Done),
            },
            State::Done => Ok(Next::Done),
        }
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Continuation
    }
}

/// Requests `url_template` with `{token}` replaced by the url-encoded
/// continuation token.
pub struct TemplateRequestBuilder {
    url_template: String,
    headers: Option<HeaderMap>,
}

impl TemplateRequestBuilder {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            headers: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }
}

impl ContinuationRequestBuilder for TemplateRequestBuilder {
    fn build(
        &mut self,
        page: u64,
        continuation: &Continuation,
        _previous: Option<&FragmentResult>,
    ) -> KakeraResult<FragmentRequest> {
        let token: String =
            url::form_urlencoded::byte_serialize(continuation.token().as_bytes()).collect();
        let url = Url::parse(&self.url_template.replace("{token}", &token))?;

        let mut request = FragmentRequest::new(FragmentIndex::Ordinal(page), url);
        if let Some(headers) = &self.headers {
            request = request.with_headers(headers.clone());
        }
        Ok(request)
    }
}
