//! Routes a synchronous HTTP response back into the pipeline.

use bytes::Bytes;
use http::{HeaderMap, Response, header::CONTENT_TYPE};
use regex::RegexSet;
use snafu::{ResultExt, Snafu};

use crate::{
    internal_events::ResponseCorrelated,
    message::{Batch, MessagePart},
    sinks::util::multipart::{self, MultipartError},
};

#[derive(Debug, Snafu)]
pub enum CorrelationError {
    #[snafu(display("Failed to decode multipart response: {}", source))]
    DecodeMultipart { source: MultipartError },
}

/// Decides which response headers are copied into part metadata.
///
/// A header is copied when its name starts with one of the prefixes or matches one of the
/// patterns. Nothing is copied when both lists are empty.
#[derive(Clone, Debug, Default)]
pub struct MetadataExtractor {
    prefixes: Vec<String>,
    patterns: Option<RegexSet>,
}

impl MetadataExtractor {
    pub fn new(prefixes: &[String], patterns: &[String]) -> Result<Self, regex::Error> {
        let patterns = if patterns.is_empty() {
            None
        } else {
            Some(RegexSet::new(patterns)?)
        };

        Ok(Self {
            prefixes: prefixes
                .iter()
                .map(|prefix| prefix.to_ascii_lowercase())
                .collect(),
            patterns,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
            || self
                .patterns
                .as_ref()
                .is_some_and(|patterns| patterns.is_match(name))
    }

    /// Copies the first value of every selected header into `part`, keyed by header name.
    pub fn extract(&self, headers: &HeaderMap, part: &mut MessagePart) {
        for name in headers.keys() {
            if !self.matches(name.as_str()) {
                continue;
            }
            if let Some(value) = headers.get(name) {
                part.metadata_insert(
                    name.as_str(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                );
            }
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResponseCorrelator {
    metadata: MetadataExtractor,
}

impl ResponseCorrelator {
    pub const fn new(metadata: MetadataExtractor) -> Self {
        Self { metadata }
    }

    /// Converts `response` into a batch and appends it to the result store of `origin`, if any.
    ///
    /// The originating batch is left untouched.
    pub fn correlate(
        &self,
        origin: &Batch,
        response: &Response<Bytes>,
    ) -> Result<(), CorrelationError> {
        let batch = self.response_to_batch(response)?;
        let parts = batch.len();

        let stored = match origin.result_store() {
            Some(store) => {
                store.add(batch);
                true
            }
            None => false,
        };

        emit!(ResponseCorrelated { parts, stored });
        Ok(())
    }

    /// One part per section of a multipart response, otherwise a single part holding the whole
    /// body.
    pub fn response_to_batch(
        &self,
        response: &Response<Bytes>,
    ) -> Result<Batch, CorrelationError> {
        let mut parts = match multipart_boundary(response.headers())? {
            Some(boundary) => multipart::decode(response.body(), &boundary)
                .context(DecodeMultipartSnafu)?
                .into_iter()
                .map(|section| MessagePart::new(section.into_body()))
                .collect(),
            None => vec![MessagePart::new(response.body().clone())],
        };

        for part in &mut parts {
            self.metadata.extract(response.headers(), part);
        }

        Ok(Batch::new(parts))
    }
}

/// Content types that are missing, unreadable or not multipart all mean a single-part response.
fn multipart_boundary(headers: &HeaderMap) -> Result<Option<String>, CorrelationError> {
    let Some(content_type) = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
    else {
        return Ok(None);
    };

    match multipart::boundary_from_content_type(content_type) {
        Ok(boundary) => Ok(boundary),
        Err(MultipartError::InvalidContentType { .. }) => Ok(None),
        Err(source) => Err(CorrelationError::DecodeMultipart { source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sinks::util::multipart::Section, transaction::ResultStore};

    fn response(content_type: &str, body: impl Into<Bytes>) -> Response<Bytes> {
        Response::builder()
            .header(CONTENT_TYPE, content_type)
            .header("fooheader", "foovalue")
            .header("x-trace", "first")
            .header("x-trace", "second")
            .body(body.into())
            .unwrap()
    }

    fn extractor(prefixes: &[&str], patterns: &[&str]) -> MetadataExtractor {
        let prefixes: Vec<String> = prefixes.iter().map(|s| (*s).to_owned()).collect();
        let patterns: Vec<String> = patterns.iter().map(|s| (*s).to_owned()).collect();
        MetadataExtractor::new(&prefixes, &patterns).unwrap()
    }

    #[test]
    fn plain_response_becomes_single_part() {
        let correlator = ResponseCorrelator::default();
        let batch = correlator
            .response_to_batch(&response("text/plain", "echo: hello"))
            .unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload(), "echo: hello");
        assert!(batch[0].metadata().is_empty());
    }

    #[test]
    fn multipart_response_becomes_one_part_per_section() {
        let sections = [Section::new("one"), Section::new("two"), Section::new("three")];
        let encoded = multipart::encode(&sections).unwrap();
        let response = response(&encoded.content_type(multipart::MIXED), encoded.body);

        let batch = ResponseCorrelator::new(extractor(&[], &["^foo"]))
            .response_to_batch(&response)
            .unwrap();

        let payloads: Vec<_> = batch.iter().map(MessagePart::payload).collect();
        assert_eq!(payloads, ["one", "two", "three"]);
        assert!(
            batch
                .iter()
                .all(|part| part.metadata_get("fooheader") == Some("foovalue"))
        );
    }

    #[test]
    fn malformed_multipart_response_fails() {
        let response = response("multipart/mixed; boundary=abc", "no boundary in here");

        let error = ResponseCorrelator::default()
            .response_to_batch(&response)
            .unwrap_err();

        assert!(matches!(error, CorrelationError::DecodeMultipart { .. }));
    }

    #[test]
    fn unparseable_content_type_is_treated_as_plain() {
        let batch = ResponseCorrelator::default()
            .response_to_batch(&response("garbage", "body"))
            .unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload(), "body");
    }

    #[test]
    fn extracts_first_value_of_matching_headers() {
        let mut part = MessagePart::from("x");
        let headers = response("text/plain", "").headers().clone();

        extractor(&["X-"], &[]).extract(&headers, &mut part);

        assert_eq!(part.metadata_get("x-trace"), Some("first"));
        assert_eq!(part.metadata_get("fooheader"), None);
        assert_eq!(part.metadata_get("content-type"), None);
    }

    #[test]
    fn empty_filters_copy_nothing() {
        let mut part = MessagePart::from("x");
        let headers = response("text/plain", "").headers().clone();

        MetadataExtractor::default().extract(&headers, &mut part);

        assert!(part.metadata().is_empty());
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(MetadataExtractor::new(&[], &["(".to_owned()]).is_err());
    }

    #[test]
    fn correlate_appends_to_result_store() {
        let store = ResultStore::new();
        let mut origin = Batch::from_payloads(["hello"]);
        origin.attach_result_store(store.clone());

        let correlator = ResponseCorrelator::new(extractor(&[], &[".*"]));
        correlator
            .correlate(&origin, &response("text/plain", "echo: hello"))
            .unwrap();

        let stored = store.get();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0][0].payload(), "echo: hello");
        assert_eq!(stored[0][0].metadata_get("fooheader"), Some("foovalue"));
        assert_eq!(origin[0].payload(), "hello");
        assert!(origin[0].metadata().is_empty());
    }

    #[test]
    fn correlate_without_store_still_succeeds() {
        let origin = Batch::from_payloads(["hello"]);

        assert!(
            ResponseCorrelator::default()
                .correlate(&origin, &response("text/plain", "echo: hello"))
                .is_ok()
        );
    }
}
