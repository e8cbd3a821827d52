//! Engine diagnostics.
//!
//! The engine emits records to at most one [`LogSink`]. Records above the
//! configured maximum level are dropped before they reach the sink.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use lockbox_core::{log_level, LogRecord, LogSink};

/// The engine's log dispatcher.
pub struct Logger {
    sink: RwLock<Option<Arc<dyn LogSink>>>,
    max_level: AtomicI32,
}

impl Default for Logger {
    fn default() -> Self {
        Self {
            sink: RwLock::new(None),
            max_level: AtomicI32::new(log_level::OFF),
        }
    }
}

impl Logger {
    /// Install `sink`, replacing any previous one.
    pub fn set_sink(&self, sink: Arc<dyn LogSink>, max_level: i32) {
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = Some(sink);
        self.set_max_level(max_level);
    }

    /// Remove the sink, flushing it first.
    pub fn clear_sink(&self) {
        let previous = self
            .sink
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sink) = previous {
            sink.flush();
        }
    }

    /// Change the maximum level. [`log_level::UNCHANGED`] leaves it as is.
    pub fn set_max_level(&self, max_level: i32) {
        if max_level != log_level::UNCHANGED {
            self.max_level
                .store(max_level.clamp(log_level::OFF, log_level::TRACE), Ordering::Relaxed);
        }
    }

    /// The current maximum level.
    pub fn max_level(&self) -> i32 {
        self.max_level.load(Ordering::Relaxed)
    }

    /// Whether a record at `level` would be delivered.
    pub fn enabled(&self, level: i32) -> bool {
        if level <= log_level::OFF || level > self.max_level() {
            return false;
        }
        self.sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|sink| sink.enabled(level))
    }

    /// Deliver one record.
    pub fn emit(&self, level: i32, target: &str, message: &str, file: &str, line: u32) {
        if !self.enabled(level) {
            return;
        }
        let sink = self
            .sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(sink) = sink {
            sink.log(&LogRecord {
                level,
                target,
                message,
                module_path: Some(target),
                file: Some(file),
                line: Some(line),
            });
        }
    }
}

/// Emit an engine log record at the given level.
macro_rules! emit {
    ($logger:expr, $level:expr, $($arg:tt)+) => {{
        let logger: &$crate::logging::Logger = &$logger;
        if logger.enabled($level) {
            logger.emit($level, module_path!(), &format!($($arg)+), file!(), line!());
        }
    }};
}

pub(crate) use emit;

/// A sink that re-emits engine records as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, record: &LogRecord<'_>) {
        let target = record.target;
        let message = record.message;
        match record.level {
            log_level::ERROR => tracing::error!(engine_target = target, "{}", message),
            log_level::WARN => tracing::warn!(engine_target = target, "{}", message),
            log_level::INFO => tracing::info!(engine_target = target, "{}", message),
            log_level::DEBUG => tracing::debug!(engine_target = target, "{}", message),
            _ => tracing::trace!(engine_target = target, "{}", message),
        }
    }
}
