use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::{json, Value};
use url::Url;

use crate::{
    error::KakeraResult,
    fragment::{Continuation, FragmentIndex, FragmentRequest, FragmentResult},
    source::ContinuationRequestBuilder,
};

/// The player is reported this far behind the last seen offset, so that no
/// message around the page boundary is missed.
const PLAYER_OFFSET_LEAD_MS: u64 = 5000;

/// Builds the `POST` requests of the chat API.
pub struct LiveChatRequestBuilder {
    api_url: Url,
    /// Client context sent with every request.
    context: Value,
    headers: HeaderMap,
}

impl LiveChatRequestBuilder {
    pub fn new(api_url: Url, context: Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            api_url,
            context,
            headers,
        }
    }

    /// Extra headers, sent on top of `Content-Type`.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    fn body(
        &self,
        page: u64,
        continuation: &Continuation,
        previous: Option<&FragmentResult>,
    ) -> Value {
        let (id, click_tracking_params) = match continuation {
            Continuation::Token(token) => (token.as_str(), None),
            Continuation::LiveChat {
                id,
                click_tracking_params,
            } => (id.as_str(), click_tracking_params.as_deref()),
        };

        let mut body = json!({
            "context": self.context,
            "continuation": id,
        });
        if page > 1 {
            let offset = previous.and_then(|p| p.offset_ms).unwrap_or_default();
            body["currentPlayerState"] = json!({
                "playerOffsetMs": offset.saturating_sub(PLAYER_OFFSET_LEAD_MS).to_string(),
            });
            if let (Some(params), Some(context)) =
                (click_tracking_params, body["context"].as_object_mut())
            {
                context.insert(
                    "clickTracking".to_string(),
                    json!({ "clickTrackingParams": params }),
                );
            }
        }
        body
    }
}

impl ContinuationRequestBuilder for LiveChatRequestBuilder {
    fn build(
        &mut self,
        page: u64,
        continuation: &Continuation,
        previous: Option<&FragmentResult>,
    ) -> KakeraResult<FragmentRequest> {
        let mut body = serde_json::to_vec(&self.body(page, continuation, previous))?;
        body.push(b'\n');

        Ok(
            FragmentRequest::new(FragmentIndex::Ordinal(page), self.api_url.clone())
                .with_body(body)
                .with_headers(self.headers.clone()),
        )
    }
}
