use std::time::Duration;

use http::{Request, Response};
use hyper::body::HttpBody;
use metrics::{counter, histogram};

use super::InternalEvent;

#[derive(Debug)]
pub struct AboutToSendHttpRequest<'a, T> {
    pub request: &'a Request<T>,
}

impl<T: HttpBody> InternalEvent for AboutToSendHttpRequest<'_, T> {
    fn emit_logs(&self) {
        debug!(
            message = "Sending HTTP request.",
            uri = %self.request.uri(),
            method = %self.request.method(),
            version = ?self.request.version(),
            headers = ?self.request.headers(),
            body = %FormatBody(self.request.body()),
        );
    }

    fn emit_metrics(&self) {
        counter!("http_client_requests_sent_total", "method" => self.request.method().to_string())
            .increment(1);
    }
}

#[derive(Debug)]
pub struct GotHttpResponse<'a, T> {
    pub response: &'a Response<T>,
    pub roundtrip: Duration,
}

impl<T: HttpBody> InternalEvent for GotHttpResponse<'_, T> {
    fn emit_logs(&self) {
        debug!(
            message = "HTTP response.",
            status = %self.response.status(),
            version = ?self.response.version(),
            headers = ?self.response.headers(),
            body = %FormatBody(self.response.body()),
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "http_client_responses_total",
            "status" => self.response.status().as_u16().to_string(),
        )
        .increment(1);
        histogram!("http_client_rtt_seconds").record(self.roundtrip.as_secs_f64());
    }
}

#[derive(Debug)]
pub struct GotHttpError<'a, E> {
    pub error: &'a E,
    pub roundtrip: Duration,
}

impl<E: std::fmt::Display> InternalEvent for GotHttpError<'_, E> {
    fn emit_logs(&self) {
        debug!(
            message = "HTTP error.",
            error = %self.error,
        );
    }

    fn emit_metrics(&self) {
        counter!("http_client_errors_total").increment(1);
        histogram!("http_client_rtt_seconds").record(self.roundtrip.as_secs_f64());
    }
}

/// Newtype placeholder to provide a formatter for the request and response body.
struct FormatBody<'a, B>(&'a B);

impl<B: HttpBody> std::fmt::Display for FormatBody<'_, B> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        let size = self.0.size_hint();
        match (size.lower(), size.upper()) {
            (0, None) => write!(fmt, "[unknown]"),
            (lower, None) => write!(fmt, "[>={lower} bytes]"),

            (0, Some(0)) => write!(fmt, "[empty]"),
            (0, Some(upper)) => write!(fmt, "[<={upper} bytes]"),

            (lower, Some(upper)) if lower == upper => write!(fmt, "[{lower} bytes]"),
            (lower, Some(upper)) => write!(fmt, "[{lower}..={upper} bytes]"),
        }
    }
}
