/// Lightweight diagnostic output abstraction.
///
/// Components that run outside of a step span (the process invoker, the
/// local runtime) report through a `TraceWriter` so callers decide where the
/// messages end up.
pub trait TraceWriter: Send + Sync {
    /// Log an informational message.
    fn info(&self, message: &str);

    /// Log a verbose / debug message.
    fn verbose(&self, message: &str);

    /// Log a warning message.
    fn warning(&self, message: &str) {
        self.info(&format!("[warning] {message}"));
    }

    /// Log an error message.
    fn error(&self, message: &str) {
        self.info(&format!("[error] {message}"));
    }
}

/// Forwards messages to the `tracing` crate under a fixed target.
#[derive(Debug, Clone, Copy)]
pub struct TracingTraceWriter {
    target: &'static str,
}

impl TracingTraceWriter {
    pub const fn new(target: &'static str) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &'static str {
        self.target
    }
}

impl Default for TracingTraceWriter {
    fn default() -> Self {
        Self::new("tasker")
    }
}

impl TraceWriter for TracingTraceWriter {
    fn info(&self, message: &str) {
        tracing::info!(source = self.target, "{}", message);
    }

    fn verbose(&self, message: &str) {
        tracing::debug!(source = self.target, "{}", message);
    }

    fn warning(&self, message: &str) {
        tracing::warn!(source = self.target, "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(source = self.target, "{}", message);
    }
}

/// Discards all messages. Useful for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTraceWriter;

impl TraceWriter for NullTraceWriter {
    fn info(&self, _message: &str) {}
    fn verbose(&self, _message: &str) {}
    fn warning(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_warning_and_error_prefix_info() {
        #[derive(Default)]
        struct InfoOnly(std::sync::Mutex<Vec<String>>);
        impl TraceWriter for InfoOnly {
            fn info(&self, message: &str) {
                self.0.lock().unwrap().push(message.to_string());
            }
            fn verbose(&self, _message: &str) {}
        }

        let writer = InfoOnly::default();
        writer.warning("disk almost full");
        writer.error("disk full");
        assert_eq!(
            *writer.0.lock().unwrap(),
            vec!["[warning] disk almost full", "[error] disk full"]
        );
    }

    #[test]
    fn tracing_writer_default_target() {
        assert_eq!(TracingTraceWriter::default().target(), "tasker");
        NullTraceWriter.error("ignored");
    }
}
