use std::error::Error;

use tracing::error;

/// Destination for errors that need attention beyond a log line.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &(dyn Error + 'static));
}

/// Emits reported errors on the `error_report` target, so an error-tracking
/// layer can be attached to the subscriber without touching the loop.
#[derive(Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, error: &(dyn Error + 'static)) {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }

        error!(
            target: "error_report",
            error = %error,
            causes = ?chain,
            "reporting error"
        );
    }
}
