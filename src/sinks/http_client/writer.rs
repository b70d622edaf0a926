use http::{Request, Response};
use hyper::Body;
use snafu::{ResultExt, Snafu};
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};

use super::{
    request_builder::{BuildError, HttpRequestBuilder},
    response::{CorrelationError, ResponseCorrelator},
};
use crate::{
    http::{HttpClient, HttpError, buffer_response},
    message::Batch,
    sinks::util::{
        http::HttpRetryLogic,
        retries::{Failure, FixedRetryPolicy, RetryError},
    },
};

/// Why a single attempt failed.
#[derive(Debug, Snafu)]
pub enum AttemptError {
    #[snafu(context(false), display("{}", source))]
    Transport { source: HttpError },
    #[snafu(display("{}", reason))]
    Status { reason: String },
}

impl From<Failure<HttpError>> for AttemptError {
    fn from(failure: Failure<HttpError>) -> Self {
        match failure {
            Failure::Error(source) => Self::Transport { source },
            Failure::Response(reason) => Self::Status {
                reason: reason.into_owned(),
            },
        }
    }
}

#[derive(Debug, Snafu)]
pub enum WriteError {
    #[snafu(display("Failed to build request: {}", source))]
    Construction { source: BuildError },
    #[snafu(display("Request failed after {} attempts: {}", attempts, source))]
    RetriesExhausted {
        attempts: usize,
        source: AttemptError,
    },
    #[snafu(display("Request rejected: {}", reason))]
    Rejected { reason: String },
    #[snafu(display("Request failed: {}", source))]
    Transport { source: HttpError },
    #[snafu(display("Failed to correlate response: {}", source))]
    Correlation { source: CorrelationError },
    #[snafu(display("Writer shut down after {} attempts", attempts))]
    ShuttingDown {
        attempts: usize,
        last: Option<AttemptError>,
    },
}

impl From<RetryError<HttpError>> for WriteError {
    fn from(error: RetryError<HttpError>) -> Self {
        match error {
            RetryError::Exhausted { attempts, last } => Self::RetriesExhausted {
                attempts,
                source: last.into(),
            },
            RetryError::Rejected { reason } => Self::Rejected {
                reason: reason.into_owned(),
            },
            RetryError::NonRetriable { source } => Self::Transport { source },
            RetryError::Shutdown { attempts, last } => Self::ShuttingDown {
                attempts,
                last: last.map(Into::into),
            },
        }
    }
}

/// Writes one batch as one HTTP exchange: build, send with retries, then optionally correlate
/// the response back into the pipeline.
#[derive(Debug)]
pub struct HttpClientWriter<S = HttpClient> {
    client: S,
    request_builder: HttpRequestBuilder,
    retry_policy: FixedRetryPolicy<HttpRetryLogic>,
    correlator: Option<ResponseCorrelator>,
    shutdown: CancellationToken,
}

impl<S> HttpClientWriter<S>
where
    S: Service<Request<Body>, Response = Response<Body>, Error = HttpError>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
{
    pub fn new(
        client: S,
        request_builder: HttpRequestBuilder,
        retry_policy: FixedRetryPolicy<HttpRetryLogic>,
        correlator: Option<ResponseCorrelator>,
    ) -> Self {
        Self {
            client,
            request_builder,
            retry_policy,
            correlator,
            shutdown: CancellationToken::new(),
        }
    }

    /// Sends `batch` as exactly one request, retrying per policy.
    ///
    /// An empty batch succeeds without touching the network.
    pub async fn write(&self, batch: &Batch) -> Result<(), WriteError> {
        if batch.is_empty() {
            return Ok(());
        }

        let request = self
            .request_builder
            .build(batch)
            .context(ConstructionSnafu)?;

        let response = self
            .retry_policy
            .run(&self.shutdown, || {
                let mut client = self.client.clone();
                let request = request.to_http_request();
                async move {
                    let response = client.ready().await?.call(request).await?;
                    buffer_response(response).await
                }
            })
            .await?;

        if let Some(correlator) = &self.correlator {
            correlator
                .correlate(batch, &response)
                .context(CorrelationSnafu)?;
        }

        Ok(())
    }

    /// Writes every part of `batch` as its own request, in order, stopping at the first failure.
    pub async fn write_each_part(&self, batch: &Batch) -> Result<(), WriteError> {
        for single in batch.split_parts() {
            self.write(&single).await?;
        }
        Ok(())
    }

    /// Stops starting new attempts. Exchanges already on the wire finish normally.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub(super) const fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}
