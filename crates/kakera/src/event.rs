use tokio::sync::mpsc;

use crate::{engine::DownloadSummary, fragment::FragmentIndex};

/// Progress notifications emitted while a download runs.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    Started {
        total_fragments: Option<u64>,
        is_live: bool,
        /// Fragments already present from a previous partial download.
        resumed_from: u64,
    },
    FragmentCompleted {
        index: FragmentIndex,
        bytes: u64,
    },
    FragmentRetrying {
        index: FragmentIndex,
        attempt: u32,
        max_retries: u32,
        error: String,
    },
    FragmentGivenUp {
        index: FragmentIndex,
        error: String,
    },
    FragmentSkipped {
        index: FragmentIndex,
        error: String,
    },
    HeartbeatFailed {
        error: String,
    },
    Failed {
        index: Option<FragmentIndex>,
        offset_ms: Option<u64>,
        error: String,
    },
    Finished(DownloadSummary),
}

/// Fan-out point for [DownloadEvent]s: every event is logged, and forwarded
/// to a subscriber when there is one.
#[derive(Clone, Default)]
pub struct EventReporter {
    sender: Option<mpsc::UnboundedSender<DownloadEvent>>,
}

impl EventReporter {
    pub fn new(sender: mpsc::UnboundedSender<DownloadEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// A reporter with a subscribed receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DownloadEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }

    pub fn report(&self, event: DownloadEvent) {
        match &event {
            DownloadEvent::Started {
                total_fragments,
                is_live,
                resumed_from,
            } => {
                let total = match (total_fragments, is_live) {
                    (Some(total), _) => total.to_string(),
                    (None, true) => "unknown (live)".to_string(),
                    (None, false) => "unknown".to_string(),
                };
                tracing::info!("Total fragments: {total}");
                if *resumed_from > 0 {
                    tracing::info!("Resuming after fragment {resumed_from}.");
                }
            }
            DownloadEvent::FragmentCompleted { index, bytes } => {
                tracing::debug!("Fragment {index} finished ({bytes} bytes).");
            }
            DownloadEvent::FragmentRetrying {
                index,
                attempt,
                max_retries,
                error,
            } => {
                tracing::warn!(
                    "Got error: {error}. Retrying fragment {index} ({attempt}/{max_retries})..."
                );
            }
            DownloadEvent::FragmentGivenUp { index, error } => {
                tracing::error!("Fragment {index} failed, giving up. {error}");
            }
            DownloadEvent::FragmentSkipped { index, error } => {
                tracing::warn!("{error}; Skipping fragment {index} ...");
            }
            DownloadEvent::HeartbeatFailed { error } => {
                tracing::warn!("Heartbeat failed, the session may expire. {error}");
            }
            DownloadEvent::Failed {
                index,
                offset_ms,
                error,
            } => match (index, offset_ms) {
                (Some(index), Some(offset)) => {
                    tracing::error!("Download stopped at fragment {index} (offset {offset}ms): {error}")
                }
                (Some(index), None) => {
                    tracing::error!("Download stopped at fragment {index}: {error}")
                }
                _ => tracing::error!("Download failed: {error}"),
            },
            DownloadEvent::Finished(summary) => {
                tracing::info!(
                    "Download finished: {} fragment(s), {} bytes.",
                    summary.fragments,
                    summary.bytes
                );
            }
        }

        if let Some(sender) = &self.sender {
            // the subscriber may have stopped listening
            _ = sender.send(event);
        }
    }
}
