use std::{path::PathBuf, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    config::EngineConfig,
    context::DownloadContext,
    error::{KakeraError, KakeraResult},
    event::{DownloadEvent, EventReporter},
    fetch::FragmentFetcher,
    fragment::{FragmentIndex, FragmentRequest, FragmentResult},
    heartbeat::{HeartbeatPing, HeartbeatSignaler, NoHeartbeat},
    retry::RetryCoordinator,
    sink::{OutputSink, SinkOptions, SinkOutcome},
    source::{FragmentSource, Next, SourceKind},
};

/// What the caller gets back from a download that did not fail.
#[derive(Debug, Clone)]
pub struct DownloadSummary {
    /// Where the output was left, for sinks that write to disk.
    pub path: Option<PathBuf>,
    pub bytes: u64,
    pub fragments: u64,
    pub skipped: u64,
    pub is_live: bool,
    /// The download was aborted, or stopped early in test mode.
    pub partial: bool,
    pub final_offset_ms: Option<u64>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Done,
    TestModeStop,
    Aborted,
}

/// Downloads the fragments of one [FragmentSource] into one [OutputSink],
/// strictly one fragment at a time.
pub struct FragmentDownloadEngine<S, F, O, P = NoHeartbeat> {
    config: EngineConfig,
    source: S,
    fetcher: F,
    sink: O,
    heartbeat: Option<(P, Duration)>,

    reporter: EventReporter,
    events: Option<mpsc::UnboundedReceiver<DownloadEvent>>,
    cancel: CancellationToken,
}

impl<S, F, O> FragmentDownloadEngine<S, F, O, NoHeartbeat>
where
    S: FragmentSource,
    F: FragmentFetcher,
    O: OutputSink,
{
    pub fn new(config: EngineConfig, source: S, fetcher: F, sink: O) -> Self {
        let (reporter, events) = EventReporter::channel();
        Self {
            config,
            source,
            fetcher,
            sink,
            heartbeat: None,
            reporter,
            events: Some(events),
            cancel: CancellationToken::new(),
        }
    }
}

impl<S, F, O, P> FragmentDownloadEngine<S, F, O, P>
where
    S: FragmentSource,
    F: FragmentFetcher,
    O: OutputSink,
    P: HeartbeatPing,
{
    /// Keep a provider session alive with `pinger` while downloading.
    pub fn with_heartbeat<Q>(self, pinger: Q, interval: Duration) -> FragmentDownloadEngine<S, F, O, Q>
    where
        Q: HeartbeatPing,
    {
        FragmentDownloadEngine {
            config: self.config,
            source: self.source,
            fetcher: self.fetcher,
            sink: self.sink,
            heartbeat: Some((pinger, interval)),
            reporter: self.reporter,
            events: self.events,
            cancel: self.cancel,
        }
    }

    /// Send events to `reporter` instead of the engine's own channel.
    pub fn with_events(mut self, reporter: EventReporter) -> Self {
        self.reporter = reporter;
        self.events = None;
        self
    }

    /// Take the receiving end of the engine's event channel.
    pub fn events(&mut self) -> Option<mpsc::UnboundedReceiver<DownloadEvent>> {
        self.events.take()
    }

    /// Cancelling the token aborts the download before its next fragment.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Open the sink, start the heartbeat and run the fetch loop in the
    /// background.
    pub async fn start(mut self) -> KakeraResult<DownloadHandle>
    where
        S: 'static,
        F: 'static,
        O: 'static,
    {
        let events = self.events.take();
        let cancel = self.cancel.clone();
        let download = self.prepare().await?;
        let task = tokio::spawn(download.run());

        Ok(DownloadHandle {
            cancel,
            task,
            events,
        })
    }

    /// Like [Self::start], but runs the fetch loop on the current task.
    pub async fn download(self) -> KakeraResult<DownloadSummary> {
        self.prepare().await?.run().await
    }

    fn validate(&self) -> KakeraResult<()> {
        if self.source.kind() == SourceKind::Continuation
            && self.source.total_fragments().is_none()
            && !self.config.is_live
            && !self.config.test_mode
        {
            return Err(KakeraError::InvalidConfig(
                "a continuation source without a fragment count needs live or test mode".to_string(),
            ));
        }
        Ok(())
    }

    async fn prepare(mut self) -> KakeraResult<Download<S, F, O, P>> {
        self.validate()?;

        let total_fragments = self.source.total_fragments();
        let options = SinkOptions {
            is_live: self.config.is_live,
            resumable: self.config.continue_partial
                && !self.config.is_live
                && self.source.kind() == SourceKind::Finite,
            keep_state_file: self.config.keep_state_file,
            total_fragments,
        };
        let mut resume = self.sink.open(&options).await?;
        if resume.fragments > 0 && !self.source.resume_from(resume.fragments) {
            tracing::warn!("The source can not resume, the previous progress is ignored.");
            resume = Default::default();
        }

        let context = DownloadContext::new(
            total_fragments,
            self.config.is_live,
            self.config.test_mode,
            resume,
        );
        self.reporter.report(DownloadEvent::Started {
            total_fragments,
            is_live: self.config.is_live,
            resumed_from: resume.fragments,
        });

        let heartbeat = match self.heartbeat {
            Some((pinger, interval)) => {
                let signaler = HeartbeatSignaler::new(pinger, interval, self.reporter.clone());
                signaler.start().await;
                Some(signaler)
            }
            None => None,
        };

        Ok(Download {
            retry: RetryCoordinator::from_config(&self.config, self.reporter.clone())
                .with_cancellation(self.cancel.clone()),
            config: self.config,
            source: self.source,
            fetcher: self.fetcher,
            sink: self.sink,
            heartbeat,
            reporter: self.reporter,
            cancel: self.cancel,
            context,
        })
    }
}

/// A download whose sink is open and whose heartbeat is running.
struct Download<S, F, O, P>
where
    P: HeartbeatPing,
{
    config: EngineConfig,
    source: S,
    fetcher: F,
    sink: O,
    heartbeat: Option<HeartbeatSignaler<P>>,
    retry: RetryCoordinator,
    reporter: EventReporter,
    cancel: CancellationToken,
    context: DownloadContext,
}

impl<S, F, O, P> Download<S, F, O, P>
where
    S: FragmentSource,
    F: FragmentFetcher,
    O: OutputSink,
    P: HeartbeatPing,
{
    async fn run(mut self) -> KakeraResult<DownloadSummary> {
        let result = self.fetch_all().await;
        self.finish(result).await
    }

    fn can_skip(&self, request: &FragmentRequest) -> bool {
        self.config.skip_unavailable_fragments
            && self.source.kind() == SourceKind::Finite
            && !request.fatal
            && request.index.ordinal().is_some_and(|n| n > 1)
    }

    async fn fetch_all(&mut self) -> KakeraResult<LoopExit> {
        let mut previous: Option<FragmentResult> = None;

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Download aborted.");
                return Ok(LoopExit::Aborted);
            }

            let request = match self.source.next(previous.as_ref())? {
                Next::Fetch(request) => request,
                Next::Done => return Ok(LoopExit::Done),
            };
            let index = request.index;

            let result = match self.retry.run(&self.fetcher, &request).await {
                Ok(result) => result,
                Err(KakeraError::Aborted) => {
                    tracing::info!("Download aborted.");
                    return Ok(LoopExit::Aborted);
                }
                Err(e) if index.is_bootstrap() => {
                    return Err(KakeraError::Bootstrap(e.to_string()));
                }
                Err(e) if self.can_skip(&request) => {
                    self.reporter.report(DownloadEvent::FragmentSkipped {
                        index,
                        error: e.to_string(),
                    });
                    self.sink.skip(index).await?;
                    self.context.record_skipped(index);
                    previous = None;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if !index.is_bootstrap() {
                self.sink.append(index, &result.payload).await?;
                self.context.record(&result);
                tracing::info!(
                    "Fragment {index} finished. {}",
                    self.context.progress()
                );
                self.reporter.report(DownloadEvent::FragmentCompleted {
                    index,
                    bytes: result.payload.len() as u64,
                });

                if self.config.test_mode {
                    tracing::info!("Test mode, stopping after the first fragment.");
                    return Ok(LoopExit::TestModeStop);
                }
            }

            let poll_delay = result.poll_delay;
            previous = Some(result);
            if let Some(delay) = poll_delay {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        tracing::info!("Download aborted.");
                        return Ok(LoopExit::Aborted);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    /// Stop the heartbeat, then close the sink. Runs on every exit path.
    async fn finish(mut self, result: KakeraResult<LoopExit>) -> KakeraResult<DownloadSummary> {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop().await;
        }

        let outcome = match &result {
            Ok(LoopExit::Done | LoopExit::TestModeStop) => SinkOutcome::Completed,
            Ok(LoopExit::Aborted) => SinkOutcome::Aborted,
            Err(_) => SinkOutcome::Failed,
        };
        let closed = self.sink.close(outcome).await;

        let error = match (result, closed) {
            (Ok(exit), Ok(path)) => {
                let summary = self.context.summary(path, exit != LoopExit::Done);
                self.reporter.report(DownloadEvent::Finished(summary.clone()));
                return Ok(summary);
            }
            (Ok(_), Err(e)) => e,
            (Err(e), closed) => {
                if let Err(close_error) = closed {
                    tracing::error!("Failed to close the output: {close_error}");
                }
                e
            }
        };

        self.reporter.report(DownloadEvent::Failed {
            index: error.fragment_index().or(self.failed_index()),
            offset_ms: self.context.final_offset_ms,
            error: error.to_string(),
        });
        Err(error)
    }

    /// The fragment after the last one handled, for failures outside of the
    /// retry loop.
    fn failed_index(&self) -> Option<FragmentIndex> {
        match self.context.last_index {
            Some(FragmentIndex::Ordinal(n)) => Some(FragmentIndex::Ordinal(n + 1)),
            Some(FragmentIndex::Bootstrap) | None => None,
        }
    }
}

/// A download running in the background.
pub struct DownloadHandle {
    cancel: CancellationToken,
    task: JoinHandle<KakeraResult<DownloadSummary>>,
    events: Option<mpsc::UnboundedReceiver<DownloadEvent>>,
}

impl DownloadHandle {
    /// Stop before the next fragment. The fragment in flight is finished and
    /// kept.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Take the event receiver. Returns `None` on later calls, or when the
    /// engine was given its own reporter.
    pub fn events(&mut self) -> Option<mpsc::UnboundedReceiver<DownloadEvent>> {
        self.events.take()
    }

    pub async fn wait(self) -> KakeraResult<DownloadSummary> {
        self.task.await?
    }
}
