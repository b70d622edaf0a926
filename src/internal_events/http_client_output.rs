use std::time::Duration;

use metrics::counter;

use super::InternalEvent;

#[derive(Debug)]
pub struct TransactionAcknowledged<'a> {
    pub parts: usize,
    pub error: Option<&'a crate::Error>,
}

impl InternalEvent for TransactionAcknowledged<'_> {
    fn emit_logs(&self) {
        match self.error {
            None => trace!(message = "Transaction delivered.", parts = self.parts),
            Some(error) => error!(
                message = "Transaction failed.",
                parts = self.parts,
                %error,
                error_type = "delivery_failed",
                stage = "sending",
            ),
        }
    }

    fn emit_metrics(&self) {
        let status = if self.error.is_some() {
            "errored"
        } else {
            "delivered"
        };
        counter!("output_transactions_acked_total", "status" => status).increment(1);
    }
}

#[derive(Debug)]
pub struct AcknowledgementDropped;

impl InternalEvent for AcknowledgementDropped {
    fn emit_logs(&self) {
        debug!(message = "Upstream stopped waiting for acknowledgement.");
    }
}

#[derive(Debug)]
pub struct ResponseCorrelated {
    pub parts: usize,
    pub stored: bool,
}

impl InternalEvent for ResponseCorrelated {
    fn emit_logs(&self) {
        trace!(
            message = "Response correlated into pipeline.",
            parts = self.parts,
            stored = self.stored,
        );
    }

    fn emit_metrics(&self) {
        counter!("http_client_responses_propagated_total").increment(1);
    }
}

#[derive(Debug)]
pub struct OutputShutdownStarted {
    pub in_flight: usize,
}

impl InternalEvent for OutputShutdownStarted {
    fn emit_logs(&self) {
        info!(
            message = "Shutting down output; draining in-flight writes.",
            in_flight = self.in_flight,
        );
    }
}

#[derive(Debug)]
pub struct OutputShutdownTimedOut {
    pub timeout: Duration,
    pub in_flight: usize,
}

impl InternalEvent for OutputShutdownTimedOut {
    fn emit_logs(&self) {
        error!(
            message = "Output failed to drain before shutdown deadline.",
            timeout_ms = self.timeout.as_millis() as u64,
            in_flight = self.in_flight,
            error_type = "timed_out",
            stage = "processing",
        );
    }

    fn emit_metrics(&self) {
        counter!(
            "component_errors_total",
            "error_type" => "timed_out",
            "stage" => "processing",
        )
        .increment(1);
    }
}
