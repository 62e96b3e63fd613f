mod continuation;
mod finite;

pub use continuation::{ContinuationRequestBuilder, ContinuationSource, TemplateRequestBuilder};
pub use finite::FiniteSource;

use crate::{
    error::KakeraResult,
    fragment::{FragmentRequest, FragmentResult},
};

/// What a [FragmentSource] wants the engine to do next.
#[derive(Debug)]
pub enum Next {
    Fetch(FragmentRequest),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A known, ordered list of fragments.
    Finite,
    /// Pages discovered one after another through continuation tokens.
    Continuation,
}

/// Produces the requests of one download in logical order.
///
/// ```text
///            ┌──────────────┐  next(previous)   ┌──────────────┐
///            │              ├───────────────────►              │
///            │    Engine    │                   │    Source    │
///            │              ◄───────────────────┤              │
///            └──────┬───────┘   Fetch | Done    └──────────────┘
///                   │ fetch(request)
///            ┌──────▼───────┐
///            │   Fetcher    ├──► FragmentResult ──► sink + next(previous)
///            └──────────────┘
/// ```
pub trait FragmentSource: Send {
    /// Return the next request, or [Next::Done] when the source is exhausted.
    ///
    /// `previous` is the result of the last successful request, `None` on the
    /// very first call.
    fn next(&mut self, previous: Option<&FragmentResult>) -> KakeraResult<Next>;

    fn kind(&self) -> SourceKind;

    /// Total number of fragments, if known in advance.
    fn total_fragments(&self) -> Option<u64> {
        None
    }

    /// Skip the first `completed` fragments, which are already in the output.
    ///
    /// Returns `false` if the source can not resume.
    fn resume_from(&mut self, _completed: u64) -> bool {
        false
    }
}

impl<T> FragmentSource for Box<T>
where
    T: FragmentSource + ?Sized,
{
    fn next(&mut self, previous: Option<&FragmentResult>) -> KakeraResult<Next> {
        self.as_mut().next(previous)
    }

    fn kind(&self) -> SourceKind {
        self.as_ref().kind()
    }

    fn total_fragments(&self) -> Option<u64> {
        self.as_ref().total_fragments()
    }

    fn resume_from(&mut self, completed: u64) -> bool {
        self.as_mut().resume_from(completed)
    }
}
