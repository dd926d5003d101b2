//! The shared warning sink carried by the inspection context.
//!
//! Append-only while inspection runs; sealed into the snapshot afterwards.
//! Appends are mutex-guarded so inspectors may run concurrently.

use std::sync::{Arc, Mutex};

use crate::snapshot::{Severity, Warning};

/// Append-only collector for warning events.
#[derive(Debug, Clone, Default)]
pub(crate) struct WarningSink {
    inner: Arc<Mutex<Vec<Warning>>>,
}

impl WarningSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a fully formed warning.
    pub(crate) fn push(&self, w: Warning) {
        tracing::debug!("{}: {}: {}", w.source, severity_str(w.severity), w.message);
        self.inner.lock().unwrap().push(w);
    }

    /// Append an info-level event (missing file, missing tool).
    pub(crate) fn info(&self, source: &str, message: impl Into<String>) {
        self.push(Warning {
            severity: Severity::Info,
            source: source.to_string(),
            resource: None,
            message: message.into(),
            suggestion: None,
            dismissible: true,
        });
    }

    /// Append a warn-level event.
    pub(crate) fn warn(&self, source: &str, message: impl Into<String>) {
        self.push(Warning {
            severity: Severity::Warn,
            source: source.to_string(),
            resource: None,
            message: message.into(),
            suggestion: None,
            dismissible: true,
        });
    }

    /// Append an error-level event (needs manual intervention).
    pub(crate) fn error(&self, source: &str, message: impl Into<String>) {
        self.push(Warning {
            severity: Severity::Error,
            source: source.to_string(),
            resource: None,
            message: message.into(),
            suggestion: None,
            dismissible: false,
        });
    }

    /// Consume the sink, returning events in append order.
    pub(crate) fn seal(self) -> Vec<Warning> {
        // Other clones may legitimately still exist (the context holds one);
        // take the accumulated events rather than unwrapping the Arc.
        std::mem::take(&mut *self.inner.lock().unwrap())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

fn severity_str(s: Severity) -> &'static str {
    match s {
        Severity::Error => "error",
        Severity::Warn => "warn",
        Severity::Info => "info",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_order_preserved() {
        let sink = WarningSink::new();
        sink.info("packages", "first");
        sink.warn("baseline", "second");
        sink.error("redact", "third");
        let sealed = sink.seal();
        assert_eq!(sealed.len(), 3);
        assert_eq!(sealed[0].message, "first");
        assert_eq!(sealed[1].source, "baseline");
        assert_eq!(sealed[2].severity, Severity::Error);
        assert!(!sealed[2].dismissible);
    }
}
