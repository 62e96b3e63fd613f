use url::Url;

use super::{FragmentSource, Next, SourceKind};
use crate::{
    error::KakeraResult,
    fragment::{FragmentIndex, FragmentRequest, FragmentResult},
    util::range::ByteRange,
};

/// A fixed, ordered list of fragments, as found in a VOD playlist or manifest.
pub struct FiniteSource {
    fragments: Vec<FragmentRequest>,
    position: usize,
}

impl FiniteSource {
    /// Fragments are numbered `1..=N` in the given order, whatever index they
    /// were created with.
    pub fn new(fragments: Vec<FragmentRequest>) -> Self {
        let fragments = fragments
            .into_iter()
            .enumerate()
            .map(|(i, mut fragment)| {
                fragment.index = FragmentIndex::Ordinal(i as u64 + 1);
                fragment
            })
            .collect();

        Self {
            fragments,
            position: 0,
        }
    }

    pub fn from_urls<I>(urls: I) -> Self
    where
        I: IntoIterator<Item = Url>,
    {
        Self::new(
            urls.into_iter()
                .map(|url| FragmentRequest::new(FragmentIndex::Ordinal(0), url))
                .collect(),
        )
    }

    /// Split one resource into byte range fragments of `chunk_size` bytes.
    pub fn from_ranges(url: Url, content_length: u64, chunk_size: u64) -> Self {
        let chunk_size = chunk_size.max(1);
        let mut fragments = Vec::new();
        let mut start = 0;
        while start < content_length {
            let end = (start + chunk_size).min(content_length);
            fragments.push(
                FragmentRequest::new(FragmentIndex::Ordinal(0), url.clone())
                    .with_byte_range(ByteRange::from_bounds(start, end)),
            );
            start = end;
        }
        Self::new(fragments)
    }
}

impl FragmentSource for FiniteSource {
    fn next(&mut self, _previous: Option<&FragmentResult>) -> KakeraResult<Next> {
        let Some(fragment) = self.fragments.get(self.position) else {
            return Ok(Next::Done);
        };
        self.position += 1;
        Ok(Next::Fetch(fragment.clone()))
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Finite
    }

    fn total_fragments(&self) -> Option<u64> {
        Some(self.fragments.len() as u64)
    }

    fn resume_from(&mut self, completed: u64) -> bool {
        self.position = (completed as usize).min(self.fragments.len());
        true
    }
}
