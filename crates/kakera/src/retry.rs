use tokio_util::sync::CancellationToken;

use crate::{
    config::{EngineConfig, RetrySleep},
    error::{KakeraError, KakeraResult},
    event::{DownloadEvent, EventReporter},
    fetch::FragmentFetcher,
    fragment::{FragmentIndex, FragmentRequest, FragmentResult},
};

/// Lifecycle of one fragment inside the [RetryCoordinator].
///
/// `Pending → Attempting → {Succeeded | Attempting (retry) | GivenUp}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Pending,
    Attempting(u32),
    Succeeded,
    GivenUp,
}

/// Attempts spent on a single request. A new budget is created for every
/// request.
#[derive(Debug)]
pub struct RetryBudget {
    max_retries: u32,
    attempt: u32,
    last_error: Option<KakeraError>,
    state: RetryState,
}

impl RetryBudget {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            attempt: 0,
            last_error: None,
            state: RetryState::Pending,
        }
    }

    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.state = RetryState::Attempting(self.attempt);
        self.attempt
    }

    pub fn succeed(&mut self) {
        self.state = RetryState::Succeeded;
    }

    /// Record a failed attempt. Returns whether another attempt is allowed.
    ///
    /// Fatal errors never consume the budget: they give up immediately.
    pub fn fail(&mut self, error: KakeraError) -> bool {
        let retry = error.is_retryable() && self.attempt <= self.max_retries;
        self.last_error = Some(error);
        if !retry {
            self.state = RetryState::GivenUp;
        }
        retry
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn last_error(&self) -> Option<&KakeraError> {
        self.last_error.as_ref()
    }

    fn into_given_up(self, index: FragmentIndex) -> KakeraError {
        KakeraError::GivenUp {
            index,
            attempts: self.attempt,
            source: Box::new(
                self.last_error
                    .unwrap_or_else(|| KakeraError::Fatal("no attempt was made".to_string())),
            ),
        }
    }
}

/// Runs a [FragmentFetcher] under a bounded retry policy.
#[derive(Clone)]
pub struct RetryCoordinator {
    max_retries: u32,
    sleep: RetrySleep,
    reporter: EventReporter,
    cancel: CancellationToken,
}

impl RetryCoordinator {
    pub fn new(max_retries: u32, sleep: RetrySleep, reporter: EventReporter) -> Self {
        Self {
            max_retries,
            sleep,
            reporter,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop retrying once `cancel` is cancelled. The attempt in flight is
    /// never interrupted.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn from_config(config: &EngineConfig, reporter: EventReporter) -> Self {
        Self::new(config.max_retries, config.retry_sleep.clone(), reporter)
    }

    /// Fetch `request` until it succeeds or the budget is exhausted.
    ///
    /// Returns [KakeraError::GivenUp] carrying the last underlying error, or
    /// [KakeraError::Aborted] when cancelled between two attempts.
    pub async fn run<F>(&self, fetcher: &F, request: &FragmentRequest) -> KakeraResult<FragmentResult>
    where
        F: FragmentFetcher,
    {
        let index = request.index;
        let mut budget = RetryBudget::new(self.max_retries);

        loop {
            let attempt = budget.begin_attempt();
            let error = match fetcher.fetch(request).await {
                Ok(result) => {
                    budget.succeed();
                    return Ok(result);
                }
                Err(e) => e,
            };

            let message = error.to_string();
            if !budget.fail(error) {
                self.reporter
                    .report(DownloadEvent::FragmentGivenUp { index, error: message });
                return Err(budget.into_given_up(index));
            }

            self.reporter.report(DownloadEvent::FragmentRetrying {
                index,
                attempt,
                max_retries: self.max_retries,
                error: message,
            });
            if let Some(delay) = self.sleep.delay(attempt - 1) {
                tracing::info!("Sleeping {:.2} seconds ...", delay.as_secs_f64());
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if self.cancel.is_cancelled() {
                tracing::info!("Retry of fragment {index} cancelled.");
                return Err(KakeraError::Aborted);
            }
        }
    }
}
