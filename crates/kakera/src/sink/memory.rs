use std::{
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard},
};

use super::{OutputSink, ResumePoint, SinkOptions, SinkOutcome};
use crate::{
    error::{KakeraError, KakeraResult},
    fragment::FragmentIndex,
};

#[derive(Default)]
struct MemoryState {
    data: Vec<u8>,
    appended: Vec<FragmentIndex>,
    opened: u32,
    closed: u32,
    outcome: Option<SinkOutcome>,
}

/// Keeps the output in memory. Clones share the same buffer, so a caller can
/// keep a handle while the engine owns the sink.
#[derive(Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn data(&self) -> Vec<u8> {
        self.lock().data.clone()
    }

    /// Fragments in the order they were appended, including empty ones.
    pub fn appended(&self) -> Vec<FragmentIndex> {
        self.lock().appended.clone()
    }

    pub fn open_count(&self) -> u32 {
        self.lock().opened
    }

    pub fn close_count(&self) -> u32 {
        self.lock().closed
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed > 0
    }

    pub fn outcome(&self) -> Option<SinkOutcome> {
        self.lock().outcome
    }
}

impl OutputSink for MemorySink {
    async fn open(&mut self, _options: &SinkOptions) -> KakeraResult<ResumePoint> {
        let mut state = self.lock();
        state.opened += 1;
        state.closed = 0;
        state.outcome = None;
        Ok(ResumePoint::default())
    }

    async fn append(&mut self, index: FragmentIndex, data: &[u8]) -> KakeraResult<()> {
        let mut state = self.lock();
        if state.opened == 0 || state.closed > 0 {
            return Err(KakeraError::Fatal("memory sink is not open".to_string()));
        }
        state.data.extend_from_slice(data);
        state.appended.push(index);
        Ok(())
    }

    async fn close(&mut self, outcome: SinkOutcome) -> KakeraResult<Option<PathBuf>> {
        let mut state = self.lock();
        state.closed += 1;
        state.outcome = Some(outcome);
        Ok(None)
    }
}
