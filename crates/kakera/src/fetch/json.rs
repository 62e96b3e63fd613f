use bytes::Bytes;
use serde_json::Value;

use super::ResponseDecoder;
use crate::{
    error::KakeraResult,
    fragment::{Continuation, FragmentRequest, FragmentResult},
};

/// Decodes paginated JSON APIs that return the next page token inside the
/// body.
///
/// Both locations are JSON pointers (RFC 6901), e.g. `/next_page_token`.
#[derive(Debug, Clone)]
pub struct JsonTokenDecoder {
    token_pointer: String,
    data_pointer: Option<String>,
}

impl JsonTokenDecoder {
    pub fn new(token_pointer: impl Into<String>) -> Self {
        Self {
            token_pointer: token_pointer.into(),
            data_pointer: None,
        }
    }

    /// Only persist the value at `data_pointer`, one JSON line per array
    /// element. Without it the whole body is persisted.
    pub fn with_data_pointer(mut self, data_pointer: impl Into<String>) -> Self {
        self.data_pointer = Some(data_pointer.into());
        self
    }

    fn payload(&self, value: &Value, body: Bytes) -> KakeraResult<Bytes> {
        let Some(pointer) = &self.data_pointer else {
            return Ok(body);
        };

        let mut payload = Vec::new();
        match value.pointer(pointer) {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                for item in items {
                    serde_json::to_writer(&mut payload, item)?;
                    payload.push(b'\n');
                }
            }
            Some(item) => {
                serde_json::to_writer(&mut payload, item)?;
                payload.push(b'\n');
            }
        }
        Ok(Bytes::from(payload))
    }
}

impl ResponseDecoder for JsonTokenDecoder {
    fn decode(&self, request: &FragmentRequest, body: Bytes) -> KakeraResult<FragmentResult> {
        let value: Value = serde_json::from_slice(&body)?;
        let continuation = value
            .pointer(&self.token_pointer)
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(|token| Continuation::Token(token.to_string()));

        let payload = if request.index.is_bootstrap() {
            Bytes::new()
        } else {
            self.payload(&value, body)?
        };

        Ok(FragmentResult::new(request.index, payload).with_continuation(continuation))
    }
}
