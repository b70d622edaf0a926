use std::time::Duration;

use metrics::counter;

use super::InternalEvent;

#[derive(Debug)]
pub struct CheckRetryEvent<'a> {
    pub reason: &'a str,
    pub attempt: usize,
    pub remaining_attempts: usize,
    pub backoff: Duration,
}

impl InternalEvent for CheckRetryEvent<'_> {
    fn emit_logs(&self) {
        warn!(
            message = "Retrying after failed attempt.",
            reason = %self.reason,
            attempt = self.attempt,
            remaining_attempts = self.remaining_attempts,
            backoff_ms = self.backoff.as_millis() as u64,
        );
    }

    fn emit_metrics(&self) {
        counter!("sink_retries_total").increment(1);
    }
}

#[derive(Debug)]
pub struct RetriesExhausted<'a> {
    pub reason: &'a str,
    pub attempts: usize,
}

impl InternalEvent for RetriesExhausted<'_> {
    fn emit_logs(&self) {
        error!(
            message = "Retries exhausted; dropping the request.",
            reason = %self.reason,
            attempts = self.attempts,
            error_type = "request_failed",
            stage = "sending",
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "component_errors_total",
            "error_type" => "request_failed",
            "stage" => "sending",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct NonRetriableResponse<'a> {
    pub reason: &'a str,
}

impl InternalEvent for NonRetriableResponse<'_> {
    fn emit_logs(&self) {
        error!(
            message = "Not retriable; dropping the request.",
            reason = %self.reason,
            error_type = "request_failed",
            stage = "sending",
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "component_errors_total",
            "error_type" => "request_failed",
            "stage" => "sending",
        )
        .increment(1);
    }
}
