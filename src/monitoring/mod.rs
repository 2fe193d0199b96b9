//! Error-reporting context handed to long-lived components at construction.
//!
//! Components never reach for a global monitoring handle; they receive an
//! `Arc<dyn ErrorReporter>` and forward failures to it with a few string tags.

use std::sync::{Arc, Mutex};

/// A failure forwarded to the monitoring backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub operation: &'static str,
    pub message: String,
    pub tags: Vec<(&'static str, String)>,
}

impl Report {
    pub fn new(operation: &'static str, error: &(dyn std::error::Error + 'static)) -> Self {
        Self {
            operation,
            message: error_chain(error),
            tags: Vec::new(),
        }
    }

    pub fn tag(mut self, key: &'static str, value: impl ToString) -> Self {
        self.tags.push((key, value.to_string()));
        self
    }

    pub fn get_tag(&self, key: &str) -> Option<&str> {
        self.tags.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }
}

pub trait ErrorReporter: Send + Sync {
    fn capture(&self, report: Report);
}

/// Emits reports as structured `tracing` events. This is the reporter used by
/// the server when no external collector is wired in.
#[derive(Debug, Default, Clone)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn capture(&self, report: Report) {
        let tags = report
            .tags
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        tracing::error!(
            target: "monitoring",
            operation = report.operation,
            tags = %tags,
            "{}",
            report.message
        );
    }
}

/// Keeps every report in memory. Used by tests and by the `check` command to
/// print what went wrong during a one-shot probe.
#[derive(Debug, Default, Clone)]
pub struct MemoryReporter {
    reports: Arc<Mutex<Vec<Report>>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl ErrorReporter for MemoryReporter {
    fn capture(&self, report: Report) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(report);
        }
    }
}

/// Fans a report out to several reporters.
pub struct CompositeReporter {
    reporters: Vec<Arc<dyn ErrorReporter>>,
}

impl CompositeReporter {
    pub fn new(reporters: Vec<Arc<dyn ErrorReporter>>) -> Self {
        Self { reporters }
    }
}

impl ErrorReporter for CompositeReporter {
    fn capture(&self, report: Report) {
        for reporter in &self.reporters {
            reporter.capture(report.clone());
        }
    }
}

/// Render an error and its sources as "outer: inner: root".
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.ends_with(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("outer failed")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn report_carries_chain_and_tags() {
        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "socket closed"));
        let report = Report::new("database_connection", &err).tag("attempt", 2);
        assert_eq!(report.message, "outer failed: socket closed");
        assert_eq!(report.get_tag("attempt"), Some("2"));
        assert_eq!(report.get_tag("missing"), None);
    }

    #[test]
    fn composite_fans_out() {
        let a = MemoryReporter::new();
        let b = MemoryReporter::new();
        let sinks: Vec<Arc<dyn ErrorReporter>> = vec![Arc::new(a.clone()), Arc::new(b.clone())];
        let composite = CompositeReporter::new(sinks);
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        composite.capture(Report::new("op", &err));
        assert_eq!(a.reports().len(), 1);
        assert_eq!(b.reports().len(), 1);
    }
}
