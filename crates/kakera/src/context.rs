use std::{path::PathBuf, time::Duration};

use tokio::time::Instant;

use crate::{
    engine::DownloadSummary,
    fragment::{FragmentIndex, FragmentResult},
    sink::ResumePoint,
};

/// Per-download counters, owned by the engine's fetch loop.
#[derive(Debug)]
pub struct DownloadContext {
    pub total_fragments: Option<u64>,
    pub is_live: bool,
    pub test_mode: bool,
    /// Fragments restored from a previous partial download.
    pub resumed_from: u64,

    pub fragments: u64,
    pub bytes: u64,
    pub skipped: u64,
    pub last_index: Option<FragmentIndex>,
    pub final_offset_ms: Option<u64>,

    started: Instant,
}

impl DownloadContext {
    pub fn new(
        total_fragments: Option<u64>,
        is_live: bool,
        test_mode: bool,
        resume: ResumePoint,
    ) -> Self {
        Self {
            total_fragments,
            is_live,
            test_mode,
            resumed_from: resume.fragments,
            fragments: resume.fragments.saturating_sub(resume.skipped),
            bytes: resume.bytes,
            skipped: resume.skipped,
            last_index: None,
            final_offset_ms: None,
            started: Instant::now(),
        }
    }

    pub fn record(&mut self, result: &FragmentResult) {
        self.fragments += 1;
        self.bytes += result.payload.len() as u64;
        self.last_index = Some(result.index);
        if result.offset_ms.is_some() {
            self.final_offset_ms = result.offset_ms;
        }
    }

    pub fn record_skipped(&mut self, index: FragmentIndex) {
        self.skipped += 1;
        self.last_index = Some(index);
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// `(3 / 10 or 30.00%)`, or `(3)` when the total is unknown.
    pub fn progress(&self) -> String {
        let done = self.fragments + self.skipped;
        match self.total_fragments {
            Some(0) | None => format!("({done})"),
            Some(total) => format!(
                "({done} / {total} or {:.2}%)",
                done as f64 / total as f64 * 100.
            ),
        }
    }

    pub fn summary(&self, path: Option<PathBuf>, partial: bool) -> DownloadSummary {
        DownloadSummary {
            path,
            bytes: self.bytes,
            fragments: self.fragments,
            skipped: self.skipped,
            is_live: self.is_live,
            partial,
            final_offset_ms: self.final_offset_ms,
            elapsed: self.elapsed(),
        }
    }
}
