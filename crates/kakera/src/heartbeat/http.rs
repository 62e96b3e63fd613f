use bytes::Bytes;
use reqwest::header::HeaderMap;
use url::Url;

use super::HeartbeatPing;
use crate::{
    error::{KakeraError, KakeraResult},
    util::http::HttpClient,
};

/// Pings a session endpoint over HTTP: `POST` of the payload, or `GET` when
/// there is none.
pub struct HttpHeartbeat {
    client: HttpClient,
    url: Url,
    payload: Option<Bytes>,
    headers: Option<HeaderMap>,
}

impl HttpHeartbeat {
    pub fn new(client: HttpClient, url: Url) -> Self {
        Self {
            client,
            url,
            payload: None,
            headers: None,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }
}

impl HeartbeatPing for HttpHeartbeat {
    async fn ping(&self) -> KakeraResult<()> {
        let mut builder = match &self.payload {
            Some(payload) => self.client.post(self.url.clone()).body(payload.clone()),
            None => self.client.get(self.url.clone()),
        };
        if let Some(headers) = &self.headers {
            builder = builder.headers(headers.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| KakeraError::Heartbeat(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(KakeraError::Heartbeat(format!(
                "{} responded with {status}",
                self.url
            )));
        }
        Ok(())
    }
}
