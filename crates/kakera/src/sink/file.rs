use std::path::PathBuf;

use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
};

use super::{state::ResumeState, OutputSink, ResumePoint, SinkOptions, SinkOutcome};
use crate::{
    error::{KakeraError, KakeraResult},
    fragment::FragmentIndex,
    util::path::KakeraPathExt,
};

/// Writes fragments into `<output>.part`, renamed to `<output>` once the
/// download completes.
///
/// Resumable downloads also keep `<output>.kakera`, recording how many
/// fragments and bytes the `.part` file holds, and how many of those
/// fragments were skipped.
pub struct FileSink {
    output: PathBuf,
    part_path: PathBuf,
    state_path: PathBuf,

    file: Option<File>,
    state: Option<ResumeState>,
    keep_state_file: bool,
    fragments: u64,
    skipped: u64,
    bytes: u64,
}

impl FileSink {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        let output = output.into();
        Self {
            part_path: output.with_appended_extension("part"),
            state_path: output.with_appended_extension("kakera"),
            output,
            file: None,
            state: None,
            keep_state_file: false,
            fragments: 0,
            skipped: 0,
            bytes: 0,
        }
    }

    pub fn output(&self) -> &PathBuf {
        &self.output
    }

    pub fn part_path(&self) -> &PathBuf {
        &self.part_path
    }

    pub fn state_path(&self) -> &PathBuf {
        &self.state_path
    }

    async fn ensure_output_dir(&self) -> KakeraResult<()> {
        if let Some(parent) = self.output.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }

    /// Find out how much of a previous attempt can be kept.
    async fn restore(&self, total_fragments: Option<u64>) -> ResumePoint {
        let state = match ResumeState::load(&self.state_path).await {
            Ok(Some(state)) => state,
            Ok(None) => return ResumePoint::default(),
            Err(e) => {
                tracing::warn!(
                    "Unable to read resume state {}: {e}. Restarting from the beginning.",
                    self.state_path.display()
                );
                return ResumePoint::default();
            }
        };

        let part_len = tokio::fs::metadata(&self.part_path)
            .await
            .map(|m| m.len())
            .unwrap_or_default();
        if state.fragments() == 0 || part_len == 0 {
            return ResumePoint::default();
        }
        if part_len < state.bytes() {
            tracing::warn!(
                "{} holds {part_len} bytes but {} were recorded. Restarting from the beginning.",
                self.part_path.display(),
                state.bytes()
            );
            return ResumePoint::default();
        }
        if let (Some(recorded), Some(total)) = (state.downloader.fragment_count, total_fragments) {
            if recorded != total {
                tracing::warn!(
                    "Fragment count changed from {recorded} to {total}. Restarting from the beginning."
                );
                return ResumePoint::default();
            }
        }
        if part_len > state.bytes() {
            tracing::debug!(
                "Discarding {} bytes of an interrupted fragment.",
                part_len - state.bytes()
            );
        }

        ResumePoint {
            fragments: state.fragments(),
            skipped: state.skipped().min(state.fragments()),
            bytes: state.bytes(),
        }
    }
}

impl OutputSink for FileSink {
    async fn open(&mut self, options: &SinkOptions) -> KakeraResult<ResumePoint> {
        self.ensure_output_dir().await?;
        self.keep_state_file = options.keep_state_file;

        let resumable = options.resumable && !options.is_live;
        let resume = if resumable {
            self.restore(options.total_fragments).await
        } else {
            ResumePoint::default()
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.part_path)
            .await?;
        file.set_len(resume.bytes).await?;
        self.file = Some(file);
        self.fragments = resume.fragments;
        self.skipped = resume.skipped;
        self.bytes = resume.bytes;

        if resumable {
            let mut state = ResumeState::new(options.total_fragments);
            state.advance(resume.fragments, resume.bytes);
            state.downloader.skipped_fragments = resume.skipped;
            state.save(&self.state_path).await?;
            self.state = Some(state);
        }

        Ok(resume)
    }

    async fn append(&mut self, index: FragmentIndex, data: &[u8]) -> KakeraResult<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(KakeraError::Fatal(format!(
                "{} is not open",
                self.part_path.display()
            )));
        };

        if !data.is_empty() {
            file.write_all(data).await?;
            file.flush().await?;
            self.bytes += data.len() as u64;
        }
        self.fragments = index.ordinal().unwrap_or(self.fragments).max(self.fragments);

        if let Some(state) = self.state.as_mut() {
            state.advance(self.fragments, self.bytes);
            state.save(&self.state_path).await?;
        }
        Ok(())
    }

    async fn skip(&mut self, index: FragmentIndex) -> KakeraResult<()> {
        if self.file.is_none() {
            return Err(KakeraError::Fatal(format!(
                "{} is not open",
                self.part_path.display()
            )));
        }
        self.fragments = index.ordinal().unwrap_or(self.fragments).max(self.fragments);
        self.skipped += 1;

        if let Some(state) = self.state.as_mut() {
            state.skip(self.fragments);
            state.save(&self.state_path).await?;
        }
        Ok(())
    }

    async fn close(&mut self, outcome: SinkOutcome) -> KakeraResult<Option<PathBuf>> {
        let Some(mut file) = self.file.take() else {
            return Ok(None);
        };
        file.flush().await?;
        drop(file);

        if outcome != SinkOutcome::Completed {
            tracing::info!(
                "Partial output kept at {} ({} bytes).",
                self.part_path.display(),
                self.bytes
            );
            return Ok(Some(self.part_path.clone()));
        }

        if self.bytes == 0 {
            tokio::fs::remove_file(&self.part_path).await?;
            ResumeState::remove(&self.state_path).await?;
            return Err(KakeraError::EmptyOutput);
        }

        tokio::fs::rename(&self.part_path, &self.output).await?;
        if self.state.is_some() && !self.keep_state_file {
            ResumeState::remove(&self.state_path).await?;
        }
        Ok(Some(self.output.clone()))
    }
}
