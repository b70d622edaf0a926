use std::borrow::Cow;

use bytes::Bytes;
use http::{HeaderName, Response, StatusCode};
use indexmap::IndexMap;

use super::retries::{RetryAction, RetryLogic};
use crate::{http::HttpError, template::Template};

/// Longest response body excerpt carried in a status failure reason.
const MAX_REASON_BODY_BYTES: usize = 256;

/// Classifies HTTP outcomes for a [`super::retries::FixedRetryPolicy`].
///
/// Any 2xx status, or a status listed in `successful_on`, is a success. A status listed in
/// `drop_on` fails immediately. Every other status, and every transport error, is retried.
#[derive(Debug, Clone, Default)]
pub struct HttpRetryLogic {
    successful_on: Vec<StatusCode>,
    drop_on: Vec<StatusCode>,
}

impl HttpRetryLogic {
    pub const fn new(successful_on: Vec<StatusCode>, drop_on: Vec<StatusCode>) -> Self {
        Self {
            successful_on,
            drop_on,
        }
    }
}

impl RetryLogic for HttpRetryLogic {
    type Error = HttpError;
    type Response = Response<Bytes>;

    fn is_retriable_error(&self, error: &Self::Error) -> bool {
        error.is_retriable()
    }

    fn should_retry_response(&self, response: &Self::Response) -> RetryAction {
        let status = response.status();

        if status.is_success() || self.successful_on.contains(&status) {
            RetryAction::Successful
        } else if self.drop_on.contains(&status) {
            RetryAction::DontRetry(status_reason(response))
        } else {
            RetryAction::Retry(status_reason(response))
        }
    }
}

fn status_reason(response: &Response<Bytes>) -> Cow<'static, str> {
    let body = response.body();
    let excerpt = &body[..body.len().min(MAX_REASON_BODY_BYTES)];
    let excerpt = String::from_utf8_lossy(excerpt);
    let excerpt = excerpt.trim();

    if excerpt.is_empty() {
        format!("Unexpected HTTP status {}", response.status()).into()
    } else {
        format!("Unexpected HTTP status {}: {}", response.status(), excerpt).into()
    }
}

/// Parses configured header names, keeping their value templates in configuration order.
pub fn validate_headers(
    headers: &IndexMap<String, Template>,
) -> crate::Result<Vec<(HeaderName, Template)>> {
    headers
        .iter()
        .map(|(name, value)| -> crate::Result<(HeaderName, Template)> {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|error| format!("Invalid header name {name:?}: {error}"))?;
            Ok((name, value.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &'static str) -> Response<Bytes> {
        Response::builder()
            .status(status)
            .body(Bytes::from_static(body.as_bytes()))
            .unwrap()
    }

    #[test]
    fn default_logic_retries_every_non_success_status() {
        let logic = HttpRetryLogic::default();

        assert!(matches!(
            logic.should_retry_response(&response(200, "")),
            RetryAction::Successful
        ));
        assert!(matches!(
            logic.should_retry_response(&response(204, "")),
            RetryAction::Successful
        ));
        for status in [400, 403, 404, 429, 500, 503] {
            assert!(matches!(
                logic.should_retry_response(&response(status, "")),
                RetryAction::Retry(_)
            ));
        }
    }

    #[test]
    fn configured_statuses_override_defaults() {
        let logic = HttpRetryLogic::new(vec![StatusCode::CONFLICT], vec![StatusCode::FORBIDDEN]);

        assert!(matches!(
            logic.should_retry_response(&response(409, "")),
            RetryAction::Successful
        ));
        match logic.should_retry_response(&response(403, "test error\n")) {
            RetryAction::DontRetry(reason) => {
                assert_eq!(reason, "Unexpected HTTP status 403 Forbidden: test error")
            }
            _ => panic!("403 should not be retried"),
        }
    }

    #[test]
    fn reason_truncates_large_bodies() {
        let body: &'static str = Box::leak("x".repeat(4096).into_boxed_str());
        let RetryAction::Retry(reason) =
            HttpRetryLogic::default().should_retry_response(&response(500, body))
        else {
            panic!("500 should be retried");
        };

        let excerpt = reason
            .strip_prefix("Unexpected HTTP status 500 Internal Server Error: ")
            .unwrap();
        assert_eq!(excerpt.len(), MAX_REASON_BODY_BYTES);
        assert!(excerpt.bytes().all(|byte| byte == b'x'));
    }

    #[test]
    fn validates_header_names() {
        let mut headers = IndexMap::new();
        headers.insert("X-Good".to_owned(), Template::try_from("value").unwrap());
        assert_eq!(validate_headers(&headers).unwrap().len(), 1);

        headers.insert("bad header".to_owned(), Template::try_from("value").unwrap());
        assert!(validate_headers(&headers).is_err());
    }
}
