//! The `http_client` output.
//!
//! Delivers batches of messages to an HTTP endpoint, one request per write, and acknowledges each
//! transaction with the outcome. Responses can be routed back into the pipeline through the
//! result store attached to a batch.

mod config;
mod output;
mod request_builder;
mod response;
mod writer;


pub use self::{
    config::{
        HttpClientOutputConfig, HttpMethod, MetadataExtractConfig, MultipartExpressionConfig,
    },
    output::{HttpClientOutput, OutputError},
    request_builder::{
        BuildError, HttpRequest, HttpRequestBuilder, MultipartExpression, RequestStrategy,
    },
    response::{CorrelationError, MetadataExtractor, ResponseCorrelator},
    writer::{AttemptError, HttpClientWriter, WriteError},
};
