//! Injectable logging callback
//!
//! The loader never logs through a global on its own: every component that
//! reports operational messages receives a [`Logger`] at construction.
//! [`TracingLogger`] forwards to `tracing`, which is what most embedders want.

use std::sync::Arc;

/// Severity of a logged message
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Verbose diagnostics
    Debug,
    /// Normal operation
    Info,
    /// Recoverable failures (a batch was dropped)
    Warn,
    /// Failures that need attention
    Error,
}

/// Receives the loader's operational messages
pub trait Logger: Send + Sync {
    /// Record one message
    fn log(&self, level: LogLevel, message: &str);
}

/// Shared handle to a logger
pub type SharedLogger = Arc<dyn Logger>;

/// Logger that emits `tracing` events under the `objectloader` target
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "objectloader", "{message}"),
            LogLevel::Info => tracing::info!(target: "objectloader", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "objectloader", "{message}"),
            LogLevel::Error => tracing::error!(target: "objectloader", "{message}"),
        }
    }
}

impl<F> Logger for F
where
    F: Fn(LogLevel, &str) + Send + Sync,
{
    fn log(&self, level: LogLevel, message: &str) {
        self(level, message)
    }
}


#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn closures_are_loggers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let logger: SharedLogger = Arc::new(move |level: LogLevel, msg: &str| {
            sink.lock().unwrap().push(format!("{level:?}:{msg}"));
        });

        logger.log(LogLevel::Warn, "batch failed");
        assert_eq!(seen.lock().unwrap().as_slice(), ["Warn:batch failed"]);
    }

    #[test]
    fn tracing_logger_accepts_every_level() {
        let logger = TracingLogger;
        for level in [
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
        ] {
            logger.log(level, "message");
        }
    }
}
