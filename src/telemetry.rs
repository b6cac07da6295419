use crate::Error;

/// Receives operational problems the SDK recovered from but that should not go unnoticed,
/// such as the event store falling back to memory.
pub trait Telemetry: Send + Sync {
    fn report_error(&self, context: &str, error: &Error);
}

pub(crate) struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn report_error(&self, _context: &str, _error: &Error) {}
}

impl<T: Fn(&str, &Error) + Send + Sync> Telemetry for T {
    fn report_error(&self, context: &str, error: &Error) {
        self(context, error);
    }
}
