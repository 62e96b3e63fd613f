use serde::{Deserialize, Serialize};

/// A byte range inside a remote resource, sent as an HTTP `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    pub fn new(offset: u64, length: Option<u64>) -> Self {
        Self { offset, length }
    }

    /// Range covering `start..end`, `end` exclusive.
    pub fn from_bounds(start: u64, end: u64) -> Self {
        Self {
            offset: start,
            length: Some(end.saturating_sub(start)),
        }
    }

    pub fn to_http_range(&self) -> String {
        match self.length {
            Some(length) if length > 0 => {
                format!("bytes={}-{}", self.offset, self.offset + length - 1)
            }
            _ => format!("bytes={}-", self.offset),
        }
    }
}
