#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![allow(clippy::module_name_repetitions)]

//! Reliable HTTP client output for streaming pipelines.
//!
//! Batches of messages arrive as [`transaction::Transaction`]s, are turned into exactly one HTTP
//! request per write (plain, batch-as-multipart or templated multipart), dispatched with a fixed
//! retry policy, and acknowledged back upstream. Responses can optionally be correlated back into
//! the pipeline through a [`transaction::ResultStore`] attached to the originating batch.

#[macro_use]
extern crate tracing;

#[macro_use]
pub mod internal_events;

pub mod http;
pub mod message;
pub mod serde;
pub mod sinks;
pub mod template;
#[cfg(test)]
pub mod test_util;
pub mod transaction;

pub use sinks::http_client::{
    HttpClientOutput, HttpClientOutputConfig, HttpClientWriter, OutputError, WriteError,
};

/// Boxed error used at the pipeline boundary.
pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias using the boxed pipeline [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
