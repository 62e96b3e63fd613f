mod http;
pub use http::HttpHeartbeat;

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    error::KakeraResult,
    event::{DownloadEvent, EventReporter},
};

/// One keep-alive action, fired periodically by a [HeartbeatSignaler].
pub trait HeartbeatPing: Send + Sync + 'static {
    fn ping(&self) -> impl Future<Output = KakeraResult<()>> + Send;
}

impl<P> HeartbeatPing for Arc<P>
where
    P: HeartbeatPing,
{
    fn ping(&self) -> impl Future<Output = KakeraResult<()>> + Send {
        self.as_ref().ping()
    }
}

/// Placeholder for downloads without a heartbeat. It can not be constructed.
pub enum NoHeartbeat {}

impl HeartbeatPing for NoHeartbeat {
    async fn ping(&self) -> KakeraResult<()> {
        match *self {}
    }
}

/// `Idle → Armed → Fired → {Armed | Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatPhase {
    Idle,
    Armed,
    Fired,
    Cancelled,
}

struct HeartbeatState {
    phase: HeartbeatPhase,
    cancelled: bool,
    /// The only timer that may fire next.
    pending: Option<JoinHandle<()>>,
    fired: u64,
}

struct Inner<P> {
    pinger: P,
    interval: Duration,
    reporter: EventReporter,
    state: Mutex<HeartbeatState>,
    token: CancellationToken,
}

/// Keeps a provider session alive while a download runs.
///
/// Every firing and every re-arm happens while holding the state lock, and so
/// does [HeartbeatSignaler::stop]. A ping in flight is dropped as soon as the
/// signaler is cancelled. Once `stop` returns, no ping is in flight and none
/// will ever start.
pub struct HeartbeatSignaler<P: HeartbeatPing> {
    inner: Arc<Inner<P>>,
}

impl<P> HeartbeatSignaler<P>
where
    P: HeartbeatPing,
{
    pub fn new(pinger: P, interval: Duration, reporter: EventReporter) -> Self {
        Self {
            inner: Arc::new(Inner {
                pinger,
                interval,
                reporter,
                state: Mutex::new(HeartbeatState {
                    phase: HeartbeatPhase::Idle,
                    cancelled: false,
                    pending: None,
                    fired: 0,
                }),
                token: CancellationToken::new(),
            }),
        }
    }

    /// Fire once, waiting for the ping to finish, then arm the timer.
    ///
    /// Does nothing unless the signaler is idle.
    pub async fn start(&self) {
        let mut state = self.inner.state.lock().await;
        if state.phase != HeartbeatPhase::Idle || state.cancelled {
            return;
        }
        tracing::debug!(
            "Starting heartbeat, interval {:.2}s.",
            self.inner.interval.as_secs_f64()
        );
        self.inner.fire(&mut state).await;
    }

    /// Cancel the pending timer and any ping in flight.
    pub async fn stop(&self) {
        // a firing holds the lock until its ping returns or is cancelled
        self.inner.token.cancel();
        let mut state = self.inner.state.lock().await;
        state.cancelled = true;
        state.phase = HeartbeatPhase::Cancelled;
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
        tracing::debug!("Heartbeat stopped after {} ping(s).", state.fired);
    }

    pub async fn phase(&self) -> HeartbeatPhase {
        self.inner.state.lock().await.phase
    }

    /// Number of pings sent so far.
    pub async fn fired(&self) -> u64 {
        self.inner.state.lock().await.fired
    }
}

impl<P> Drop for HeartbeatSignaler<P>
where
    P: HeartbeatPing,
{
    fn drop(&mut self) {
        // a timer that already woke up re-checks the token under the lock
        self.inner.token.cancel();
        if let Ok(mut state) = self.inner.state.try_lock() {
            state.cancelled = true;
            state.phase = HeartbeatPhase::Cancelled;
            if let Some(pending) = state.pending.take() {
                pending.abort();
            }
        }
    }
}

impl<P> Inner<P>
where
    P: HeartbeatPing,
{
    fn is_cancelled(&self, state: &HeartbeatState) -> bool {
        state.cancelled || self.token.is_cancelled()
    }

    async fn fire(self: &Arc<Self>, state: &mut HeartbeatState) {
        state.phase = HeartbeatPhase::Fired;
        state.fired += 1;
        tracing::debug!("Sending heartbeat #{}", state.fired);

        tokio::select! {
            _ = self.token.cancelled() => {
                tracing::debug!("Heartbeat #{} cancelled in flight.", state.fired);
            }
            result = self.pinger.ping() => {
                if let Err(e) = result {
                    self.reporter.report(DownloadEvent::HeartbeatFailed {
                        error: e.to_string(),
                    });
                }
            }
        }
        self.arm(state);
    }

    fn arm(self: &Arc<Self>, state: &mut HeartbeatState) {
        if self.is_cancelled(state) {
            state.phase = HeartbeatPhase::Cancelled;
            return;
        }
        state.pending = Some(tokio::spawn(self.clone().tick()));
        state.phase = HeartbeatPhase::Armed;
    }

    fn tick(self: Arc<Self>) -> impl Future<Output = ()> + Send {
        async move {
            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = tokio::time::sleep(self.interval) => {}
            }

            let mut state = self.state.lock().await;
            if self.is_cancelled(&state) {
                return;
            }
            // this task is the pending one
            state.pending = None;
            self.fire(&mut state).await;
        }
    }
}
