//! Internal events emitted by the output.
//!
//! Every observable happening is a struct implementing [`InternalEvent`], fired with [`emit!`] so
//! logs and metrics for it are produced in one place.

mod http_client;
mod http_client_output;
mod retries;

pub use self::http_client::*;
pub use self::http_client_output::*;
pub use self::retries::*;

pub trait InternalEvent: Sized {
    fn emit(self) {
        self.emit_logs();
        self.emit_metrics();
    }

    fn emit_logs(&self) {}

    fn emit_metrics(&self) {}
}

pub fn emit(event: impl InternalEvent) {
    event.emit();
}

#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::internal_events::emit($event)
    };
}
