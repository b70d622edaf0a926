use std::{borrow::Cow, error::Error as StdError, fmt, future::Future, time::Duration};

use snafu::Snafu;
use tokio_util::sync::CancellationToken;

use crate::internal_events::{CheckRetryEvent, NonRetriableResponse, RetriesExhausted};

pub enum RetryAction {
    /// Indicate that this request should be retried with a reason.
    Retry(Cow<'static, str>),
    /// Indicate that this request should not be retried with a reason.
    DontRetry(Cow<'static, str>),
    /// Indicate that this request should not be retried but the request was successful.
    Successful,
}

pub trait RetryLogic: Clone + Send + Sync + 'static {
    type Error: StdError + Send + Sync + 'static;
    type Response;

    /// Whether an error returned by the transport is worth another attempt.
    fn is_retriable_error(&self, error: &Self::Error) -> bool;

    /// Classifies a response the transport managed to deliver.
    fn should_retry_response(&self, _response: &Self::Response) -> RetryAction {
        RetryAction::Successful
    }
}

/// The last failure observed by a [`FixedRetryPolicy`].
#[derive(Debug)]
pub enum Failure<E> {
    /// The transport failed to deliver a response.
    Error(E),
    /// A response was received but classified as a failure.
    Response(Cow<'static, str>),
}

impl<E: fmt::Display> fmt::Display for Failure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(error) => error.fmt(f),
            Self::Response(reason) => reason.fmt(f),
        }
    }
}

#[derive(Debug, Snafu)]
pub enum RetryError<E>
where
    E: StdError + 'static,
{
    #[snafu(display("Retries exhausted after {} attempts: {}", attempts, last))]
    Exhausted { attempts: usize, last: Failure<E> },
    #[snafu(display("Request failed and is not retriable: {}", reason))]
    Rejected { reason: Cow<'static, str> },
    #[snafu(display("Request failed with a non-retriable error: {}", source))]
    NonRetriable { source: E },
    #[snafu(display("Shutdown requested after {} attempts", attempts))]
    Shutdown {
        attempts: usize,
        last: Option<Failure<E>>,
    },
}

/// Retries failed attempts a bounded number of times with a fixed delay in between.
///
/// Exactly `1 + retries` attempts are made against an endpoint that keeps failing. Once the
/// shutdown token fires no further attempt is started and a pending delay is cut short.
#[derive(Debug, Clone)]
pub struct FixedRetryPolicy<L: RetryLogic> {
    retries: usize,
    backoff: Duration,
    logic: L,
}

impl<L: RetryLogic> FixedRetryPolicy<L> {
    pub const fn new(retries: usize, backoff: Duration, logic: L) -> Self {
        Self {
            retries,
            backoff,
            logic,
        }
    }

    pub const fn max_attempts(&self) -> usize {
        self.retries + 1
    }

    pub const fn logic(&self) -> &L {
        &self.logic
    }

    /// Drives `attempt` until it succeeds, fails terminally, or runs out of attempts.
    pub async fn run<F, Fut>(
        &self,
        shutdown: &CancellationToken,
        mut attempt: F,
    ) -> Result<L::Response, RetryError<L::Error>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<L::Response, L::Error>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempts = 0;
        let mut last = None;

        loop {
            if shutdown.is_cancelled() {
                return Err(RetryError::Shutdown { attempts, last });
            }

            attempts += 1;
            let failure = match attempt().await {
                Ok(response) => match self.logic.should_retry_response(&response) {
                    RetryAction::Successful => return Ok(response),
                    RetryAction::DontRetry(reason) => {
                        emit!(NonRetriableResponse { reason: &reason });
                        return Err(RetryError::Rejected { reason });
                    }
                    RetryAction::Retry(reason) => Failure::Response(reason),
                },
                Err(error) if self.logic.is_retriable_error(&error) => Failure::Error(error),
                Err(source) => return Err(RetryError::NonRetriable { source }),
            };

            let reason = failure.to_string();
            if attempts >= max_attempts {
                emit!(RetriesExhausted {
                    reason: &reason,
                    attempts,
                });
                return Err(RetryError::Exhausted {
                    attempts,
                    last: failure,
                });
            }

            emit!(CheckRetryEvent {
                reason: &reason,
                attempt: attempts,
                remaining_attempts: max_attempts - attempts,
                backoff: self.backoff,
            });
            last = Some(failure);

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    return Err(RetryError::Shutdown { attempts, last });
                }
                _ = tokio::time::sleep(self.backoff) => {}
            }
        }
    }
}
