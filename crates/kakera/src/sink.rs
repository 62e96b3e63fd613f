pub mod file;
pub mod memory;
pub mod state;

pub use file::FileSink;
pub use memory::MemorySink;

use std::{future::Future, path::PathBuf};

use crate::{error::KakeraResult, fragment::FragmentIndex};

#[derive(Debug, Clone, Default)]
pub struct SinkOptions {
    pub is_live: bool,
    /// Pick up a previous partial download of the same output.
    pub resumable: bool,
    pub keep_state_file: bool,
    pub total_fragments: Option<u64>,
}

/// Progress restored by [OutputSink::open].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumePoint {
    /// Fragments already handled, skipped ones included.
    pub fragments: u64,
    /// How many of `fragments` were skipped.
    pub skipped: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    Completed,
    Failed,
    Aborted,
}

/// Append-only destination of the fragment bytes.
///
/// Exactly one `open` and one `close` per download. Bytes are appended in the
/// order fragments are handed over and never rewritten.
pub trait OutputSink: Send {
    fn open(&mut self, options: &SinkOptions) -> impl Future<Output = KakeraResult<ResumePoint>> + Send;

    /// Append the payload of fragment `index`.
    ///
    /// Empty data writes nothing, but still records the fragment as done.
    fn append(
        &mut self,
        index: FragmentIndex,
        data: &[u8],
    ) -> impl Future<Output = KakeraResult<()>> + Send;

    /// Record fragment `index` as skipped. Nothing is written.
    fn skip(&mut self, index: FragmentIndex) -> impl Future<Output = KakeraResult<()>> + Send {
        self.append(index, &[])
    }

    /// Flush and release the destination. Returns where the output was left,
    /// if it lives on disk.
    fn close(
        &mut self,
        outcome: SinkOutcome,
    ) -> impl Future<Output = KakeraResult<Option<PathBuf>>> + Send;
}
