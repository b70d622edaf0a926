//! The shared HTTP transport.
//!
//! [`HttpClient`] owns a connection pool and is cheap to clone; every clone shares the same pool,
//! so a single client is built once and injected into every writer that needs it.

use std::{
    fmt,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use bytes::Bytes;
use futures::future::BoxFuture;
use http::{HeaderValue, Request, Response, header};
use hyper::{
    Body,
    client::{Client, HttpConnector},
};
use snafu::{ResultExt, Snafu};
use tower::Service;
use tracing::{Instrument, Span};

use crate::internal_events::{AboutToSendHttpRequest, GotHttpError, GotHttpResponse};

/// Default per-attempt timeout applied by [`HttpClient::new`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Snafu)]
pub enum HttpError {
    #[snafu(display("Failed to make HTTP(S) request: {}", source))]
    CallRequest { source: hyper::Error },
    #[snafu(display("HTTP request timed out after {:?}", timeout))]
    RequestTimedOut { timeout: Duration },
    #[snafu(display("Failed to read HTTP response body: {}", source))]
    ReadResponse { source: hyper::Error },
}

impl HttpError {
    /// Transport errors are all considered transient.
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::CallRequest { .. }
            | Self::RequestTimedOut { .. }
            | Self::ReadResponse { .. } => true,
        }
    }
}

pub type HttpClientFuture = BoxFuture<'static, Result<Response<Body>, HttpError>>;

pub struct HttpClient {
    client: Client<HttpConnector, Body>,
    span: Span,
    user_agent: HeaderValue,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_nodelay(true);

        let client = Client::builder().build(http);

        let user_agent = HeaderValue::from_static(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));

        let span = tracing::info_span!("http");

        Self {
            client,
            span,
            user_agent,
            timeout,
        }
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn send(&self, mut request: Request<Body>) -> HttpClientFuture {
        let _enter = self.span.enter();

        default_request_headers(&mut request, &self.user_agent);

        emit!(AboutToSendHttpRequest { request: &request });

        let response = self.client.request(request);
        let timeout = self.timeout;

        let fut = async move {
            // Capture the time right before we issue the request.
            // Request doesn't start the processing until we start polling it.
            let before = Instant::now();

            let response_result = match tokio::time::timeout(timeout, response).await {
                Ok(result) => result.context(CallRequestSnafu),
                Err(_) => RequestTimedOutSnafu { timeout }.fail(),
            };

            let roundtrip = before.elapsed();

            let response = response_result.inspect_err(|error| {
                emit!(GotHttpError {
                    error,
                    roundtrip
                });
            })?;

            emit!(GotHttpResponse {
                response: &response,
                roundtrip
            });
            Ok(response)
        }
        .instrument(self.span.clone());

        Box::pin(fut)
    }
}

/// Reads the whole response body so the response can be classified and correlated.
pub async fn buffer_response(response: Response<Body>) -> Result<Response<Bytes>, HttpError> {
    let (parts, body) = response.into_parts();
    let body = hyper::body::to_bytes(body)
        .await
        .context(ReadResponseSnafu)?;
    Ok(Response::from_parts(parts, body))
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

fn default_request_headers<B>(request: &mut Request<B>, user_agent: &HeaderValue) {
    if !request.headers().contains_key(header::USER_AGENT) {
        request
            .headers_mut()
            .insert(header::USER_AGENT, user_agent.clone());
    }

    if !request.headers().contains_key(header::ACCEPT_ENCODING) {
        // Compressed responses are not decoded.
        request
            .headers_mut()
            .insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    }
}

impl Service<Request<Body>> for HttpClient {
    type Response = Response<Body>;
    type Error = HttpError;
    type Future = HttpClientFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        self.send(request)
    }
}

impl Clone for HttpClient {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            span: self.span.clone(),
            user_agent: self.user_agent.clone(),
            timeout: self.timeout,
        }
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("client", &self.client)
            .field("user_agent", &self.user_agent)
            .field("timeout", &self.timeout)
            .finish()
    }
}
