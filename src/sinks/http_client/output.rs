use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use http::{Request, Response};
use hyper::Body;
use snafu::Snafu;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::task::TaskTracker;
use tower::Service;
use tracing::Instrument;

use super::writer::{HttpClientWriter, WriteError};
use crate::{
    http::{HttpClient, HttpError},
    internal_events::{
        AcknowledgementDropped, OutputShutdownStarted, OutputShutdownTimedOut,
        TransactionAcknowledged,
    },
    transaction::{AckResult, Transaction},
};

#[derive(Debug, Snafu)]
pub enum OutputError {
    #[snafu(display("Output is already consuming transactions"))]
    AlreadyConsuming,
    #[snafu(display("Output did not shut down within {:?}", timeout))]
    ShutdownTimeout { timeout: Duration },
}

/// Feeds transactions from an inbound queue into an [`HttpClientWriter`], at most
/// `max_in_flight` at a time, and acknowledges each one with the outcome of its write.
pub struct HttpClientOutput<S = HttpClient> {
    writer: Arc<HttpClientWriter<S>>,
    slots: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    split_parts: bool,
    consuming: AtomicBool,
    tracker: TaskTracker,
}

impl<S> HttpClientOutput<S>
where
    S: Service<Request<Body>, Response = Response<Body>, Error = HttpError>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
{
    /// With `split_parts` set, every part of a transaction is written as its own request.
    pub fn new(
        writer: HttpClientWriter<S>,
        max_in_flight: NonZeroUsize,
        split_parts: bool,
    ) -> Self {
        Self {
            writer: Arc::new(writer),
            slots: Arc::new(Semaphore::new(max_in_flight.get())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            split_parts,
            consuming: AtomicBool::new(false),
            tracker: TaskTracker::new(),
        }
    }

    pub fn writer(&self) -> &HttpClientWriter<S> {
        &self.writer
    }

    /// Starts draining `transactions` on the current runtime.
    pub fn consume(&self, transactions: mpsc::Receiver<Transaction>) -> Result<(), OutputError> {
        if self.consuming.swap(true, Ordering::SeqCst) {
            return AlreadyConsumingSnafu.fail();
        }

        let run = run(
            Arc::clone(&self.writer),
            transactions,
            Arc::clone(&self.slots),
            Arc::clone(&self.in_flight),
            self.split_parts,
            self.tracker.clone(),
        );
        self.tracker
            .spawn(run.instrument(info_span!("http_client_output")));
        Ok(())
    }

    /// Stops accepting transactions and starting new attempts. Never blocks.
    pub fn close_async(&self) {
        if !self.writer.is_closed() {
            emit!(OutputShutdownStarted {
                in_flight: self.in_flight(),
            });
        }
        self.writer.close();
        self.tracker.close();
    }

    /// Waits for the consumption loop and every in-flight write to finish.
    pub async fn wait_for_close(&self, timeout: Duration) -> Result<(), OutputError> {
        if tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_err()
        {
            emit!(OutputShutdownTimedOut {
                timeout,
                in_flight: self.in_flight(),
            });
            return ShutdownTimeoutSnafu { timeout }.fail();
        }
        Ok(())
    }

    /// Number of transactions currently being written.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

async fn run<S>(
    writer: Arc<HttpClientWriter<S>>,
    mut transactions: mpsc::Receiver<Transaction>,
    slots: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    split_parts: bool,
    tracker: TaskTracker,
) where
    S: Service<Request<Body>, Response = Response<Body>, Error = HttpError>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
{
    let shutdown = writer.shutdown_token().clone();

    loop {
        let permit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            permit = Arc::clone(&slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let transaction = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            transaction = transactions.recv() => match transaction {
                Some(transaction) => transaction,
                None => {
                    debug!(message = "Inbound queue closed, finishing in-flight writes.");
                    break;
                }
            },
        };

        in_flight.fetch_add(1, Ordering::AcqRel);
        let in_flight = Arc::clone(&in_flight);
        let writer = Arc::clone(&writer);
        tracker.spawn(
            async move {
                let (batch, acknowledger) = transaction.into_parts();
                let result = if split_parts {
                    writer.write_each_part(&batch).await
                } else {
                    writer.write(&batch).await
                };
                in_flight.fetch_sub(1, Ordering::AcqRel);
                drop(permit);

                let result: AckResult = result.map_err(Into::into);
                emit!(TransactionAcknowledged {
                    parts: batch.len(),
                    error: result.as_ref().err(),
                });
                if !acknowledger.ack(result) {
                    emit!(AcknowledgementDropped);
                }
            }
            .in_current_span(),
        );
    }

    // Transactions still queued were never started; hand them back as failed.
    transactions.close();
    while let Ok(transaction) = transactions.try_recv() {
        let error = WriteError::ShuttingDown {
            attempts: 0,
            last: None,
        };
        if !transaction.ack(Err(error.into())) {
            emit!(AcknowledgementDropped);
        }
    }

    // Nothing else will be spawned; `wait_for_close` resolves once in-flight writes finish.
    tracker.close();
}
