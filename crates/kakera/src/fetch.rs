mod json;
pub use json::JsonTokenDecoder;

use std::future::Future;

use bytes::Bytes;
use reqwest::header::RANGE;

use crate::{
    error::{KakeraError, KakeraResult},
    fragment::{FragmentRequest, FragmentResult},
    util::http::HttpClient,
};

/// Performs exactly one retrieval attempt of a fragment.
///
/// Implementations must not touch engine state: everything the engine needs
/// flows back through the returned [FragmentResult]. Failures are classified
/// with [KakeraError::is_retryable].
pub trait FragmentFetcher: Send + Sync {
    fn fetch(
        &self,
        request: &FragmentRequest,
    ) -> impl Future<Output = KakeraResult<FragmentResult>> + Send;
}

impl<F> FragmentFetcher for std::sync::Arc<F>
where
    F: FragmentFetcher,
{
    fn fetch(
        &self,
        request: &FragmentRequest,
    ) -> impl Future<Output = KakeraResult<FragmentResult>> + Send {
        self.as_ref().fetch(request)
    }
}

/// Interprets a response body: which bytes to persist, and where the
/// provider wants to continue.
pub trait ResponseDecoder: Send + Sync {
    fn decode(&self, request: &FragmentRequest, body: Bytes) -> KakeraResult<FragmentResult>;
}

impl<D> ResponseDecoder for Box<D>
where
    D: ResponseDecoder + ?Sized,
{
    fn decode(&self, request: &FragmentRequest, body: Bytes) -> KakeraResult<FragmentResult> {
        self.as_ref().decode(request, body)
    }
}

/// Persists the body as is, with no continuation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDecoder;

impl ResponseDecoder for RawDecoder {
    fn decode(&self, request: &FragmentRequest, body: Bytes) -> KakeraResult<FragmentResult> {
        Ok(FragmentResult::new(request.index, body))
    }
}

/// Fetches fragments over HTTP: `POST` when the request has a body, `GET`
/// otherwise.
pub struct HttpFetcher<D = RawDecoder> {
    client: HttpClient,
    decoder: D,
}

impl HttpFetcher<RawDecoder> {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            decoder: RawDecoder,
        }
    }
}

impl<D> HttpFetcher<D>
where
    D: ResponseDecoder,
{
    pub fn with_decoder(client: HttpClient, decoder: D) -> Self {
        Self { client, decoder }
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    async fn fetch_body(&self, request: &FragmentRequest) -> KakeraResult<Bytes> {
        let mut builder = match &request.body {
            Some(body) => self.client.post(request.url.clone()).body(body.clone()),
            None => self.client.get(request.url.clone()),
        };
        if let Some(headers) = &request.headers {
            builder = builder.headers(headers.clone());
        }
        if let Some(byte_range) = &request.byte_range {
            builder = builder.header(RANGE, byte_range.to_http_range());
        }

        tracing::debug!("Fetching fragment {} from {}", request.index, request.url);
        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            if let Ok(body) = response.text().await {
                tracing::debug!("Error body: {body}");
            }
            return Err(KakeraError::HttpError(status));
        }

        Ok(response.bytes().await?)
    }
}

impl<D> FragmentFetcher for HttpFetcher<D>
where
    D: ResponseDecoder,
{
    async fn fetch(&self, request: &FragmentRequest) -> KakeraResult<FragmentResult> {
        let body = self.fetch_body(request).await?;
        self.decoder.decode(request, body)
    }
}
