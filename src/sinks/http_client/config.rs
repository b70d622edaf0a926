//! Configuration for the `http_client` output.

use std::{num::NonZeroUsize, time::Duration};

use http::{Method, Request, Response, StatusCode};
use hyper::Body;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tower::Service;

use super::{
    output::HttpClientOutput,
    request_builder::{HttpRequestBuilder, MultipartExpression, RequestStrategy},
    response::{MetadataExtractor, ResponseCorrelator},
    writer::HttpClientWriter,
};
use crate::{
    http::{HttpClient, HttpError},
    serde::humantime_duration,
    sinks::util::{
        http::{HttpRetryLogic, validate_headers},
        retries::FixedRetryPolicy,
    },
    template::Template,
};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const DEFAULT_MAX_IN_FLIGHT: NonZeroUsize = NonZeroUsize::new(64).unwrap();

/// Configuration for the `http_client` output.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HttpClientOutputConfig {
    /// The URL to send requests to.
    ///
    /// May reference the batch, e.g. `http://host/{{ metadata.topic }}`.
    pub url: Template,

    /// The HTTP method to use when making the request.
    #[serde(default)]
    pub verb: HttpMethod,

    /// Headers added to every request. Values are templates.
    #[serde(default = "default_headers")]
    pub headers: IndexMap<String, Template>,

    /// Send every part of a batch as one section of a single `multipart/mixed` request.
    #[serde(default)]
    pub batch_as_multipart: bool,

    /// Explicit multipart sections. When non-empty this takes precedence over
    /// `batch_as_multipart` and the batch's part count no longer shapes the request.
    #[serde(default)]
    pub multipart: Vec<MultipartExpressionConfig>,

    /// The maximum number of transactions written concurrently.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: NonZeroUsize,

    /// The fixed delay between attempts.
    #[serde(
        default = "default_retry_period",
        deserialize_with = "humantime_duration",
        serialize_with = "serialize_duration"
    )]
    pub retry_period: Duration,

    /// How many times a failed request is retried. `0` means a single attempt.
    #[serde(default = "default_num_retries")]
    pub num_retries: usize,

    /// Per-attempt transport timeout.
    #[serde(
        default = "default_timeout",
        deserialize_with = "humantime_duration",
        serialize_with = "serialize_duration"
    )]
    pub timeout: Duration,

    /// Status codes treated as success in addition to 2xx.
    #[serde(default)]
    pub successful_on: Vec<u16>,

    /// Status codes that fail the write immediately, without retries.
    #[serde(default)]
    pub drop_on: Vec<u16>,

    /// Deliver the response of each successful request to the batch's result store.
    #[serde(default)]
    pub propagate_response: bool,

    #[serde(default)]
    pub extract_metadata: MetadataExtractConfig,
}

/// One explicitly configured multipart section.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MultipartExpressionConfig {
    pub content_disposition: Template,
    pub content_type: Template,
    pub body: Template,
}

/// Selects which response headers are copied into the metadata of propagated responses.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataExtractConfig {
    /// Header name prefixes, matched case-insensitively.
    #[serde(default)]
    pub include_prefixes: Vec<String>,

    /// Regular expressions matched against header names.
    #[serde(default)]
    pub include_patterns: Vec<String>,
}

/// HTTP method.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum HttpMethod {
    /// GET.
    Get,

    /// HEAD.
    Head,

    /// POST.
    #[default]
    Post,

    /// PUT.
    Put,

    /// DELETE.
    Delete,

    /// OPTIONS.
    Options,

    /// TRACE.
    Trace,

    /// PATCH.
    Patch,
}

impl From<HttpMethod> for Method {
    fn from(http_method: HttpMethod) -> Self {
        match http_method {
            HttpMethod::Head => Self::HEAD,
            HttpMethod::Get => Self::GET,
            HttpMethod::Post => Self::POST,
            HttpMethod::Put => Self::PUT,
            HttpMethod::Patch => Self::PATCH,
            HttpMethod::Delete => Self::DELETE,
            HttpMethod::Options => Self::OPTIONS,
            HttpMethod::Trace => Self::TRACE,
        }
    }
}

fn default_headers() -> IndexMap<String, Template> {
    let mut headers = IndexMap::new();
    headers.insert("Content-Type".to_owned(), Template::literal(DEFAULT_CONTENT_TYPE));
    headers
}

const fn default_max_in_flight() -> NonZeroUsize {
    DEFAULT_MAX_IN_FLIGHT
}

const fn default_retry_period() -> Duration {
    Duration::from_secs(1)
}

const fn default_num_retries() -> usize {
    3
}

const fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn serialize_duration<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&humantime::format_duration(*duration))
}

impl HttpClientOutputConfig {
    /// A configuration targeting `url` with every other option at its default.
    pub fn new(url: Template) -> Self {
        Self {
            url,
            verb: HttpMethod::default(),
            headers: default_headers(),
            batch_as_multipart: false,
            multipart: Vec::new(),
            max_in_flight: default_max_in_flight(),
            retry_period: default_retry_period(),
            num_retries: default_num_retries(),
            timeout: default_timeout(),
            successful_on: Vec::new(),
            drop_on: Vec::new(),
            propagate_response: false,
            extract_metadata: MetadataExtractConfig::default(),
        }
    }

    pub fn from_toml(input: &str) -> crate::Result<Self> {
        Ok(toml::from_str(input)?)
    }

    /// Whether the output writes each part of a transaction as its own request.
    pub fn splits_parts(&self) -> bool {
        !self.batch_as_multipart && self.multipart.is_empty()
    }

    /// A transport honouring the configured per-attempt timeout.
    pub fn build_client(&self) -> HttpClient {
        HttpClient::new(self.timeout)
    }

    pub fn build_writer(&self, client: HttpClient) -> crate::Result<HttpClientWriter> {
        self.build_writer_with(client)
    }

    /// Builds a writer on top of any transport service.
    pub fn build_writer_with<S>(&self, client: S) -> crate::Result<HttpClientWriter<S>>
    where
        S: Service<Request<Body>, Response = Response<Body>, Error = HttpError>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let request_builder = self.build_request_builder()?;

        let logic = HttpRetryLogic::new(
            parse_statuses(&self.successful_on)?,
            parse_statuses(&self.drop_on)?,
        );
        let retry_policy = FixedRetryPolicy::new(self.num_retries, self.retry_period, logic);

        let correlator = if self.propagate_response {
            let extractor = MetadataExtractor::new(
                &self.extract_metadata.include_prefixes,
                &self.extract_metadata.include_patterns,
            )?;
            Some(ResponseCorrelator::new(extractor))
        } else {
            None
        };

        Ok(HttpClientWriter::new(
            client,
            request_builder,
            retry_policy,
            correlator,
        ))
    }

    pub fn build(&self, client: HttpClient) -> crate::Result<HttpClientOutput> {
        self.build_with(client)
    }

    /// Builds an output on top of any transport service.
    pub fn build_with<S>(&self, client: S) -> crate::Result<HttpClientOutput<S>>
    where
        S: Service<Request<Body>, Response = Response<Body>, Error = HttpError>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let writer = self.build_writer_with(client)?;
        Ok(HttpClientOutput::new(
            writer,
            self.max_in_flight,
            self.splits_parts(),
        ))
    }

    fn build_request_builder(&self) -> crate::Result<HttpRequestBuilder> {
        if self.url.get_ref().trim().is_empty() {
            return Err("`url` must not be empty".into());
        }

        let headers = validate_headers(&self.headers)?;

        let strategy = if !self.multipart.is_empty() {
            RequestStrategy::Explicit(
                self.multipart
                    .iter()
                    .map(|expression| {
                        MultipartExpression::new(
                            expression.content_disposition.clone(),
                            expression.content_type.clone(),
                            expression.body.clone(),
                        )
                    })
                    .collect(),
            )
        } else if self.batch_as_multipart {
            RequestStrategy::BatchAsMultipart
        } else {
            RequestStrategy::Plain
        };

        Ok(HttpRequestBuilder::new(
            self.url.clone(),
            self.verb.into(),
            headers,
            strategy,
        ))
    }
}

fn parse_statuses(codes: &[u16]) -> crate::Result<Vec<StatusCode>> {
    codes
        .iter()
        .map(|code| -> crate::Result<StatusCode> {
            StatusCode::from_u16(*code)
                .map_err(|error| format!("Invalid status code {code}: {error}").into())
        })
        .collect()
}
