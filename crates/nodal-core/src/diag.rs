//! Diagnostics raised by device code.
//!
//! Devices report through a [`DiagnosticSink`] rather than printing, so the
//! host decides whether messages go to the log, to a report or both.

use std::fmt;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    /// The current operation cannot continue.
    Fatal,
    /// The whole run must stop.
    Panic,
}

/// Model and instance a diagnostic refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub model: String,
    pub instance: Option<String>,
}

impl Origin {
    /// Origin naming a model only.
    pub fn model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            instance: None,
        }
    }

    /// Origin naming an instance of a model.
    pub fn instance(model: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            instance: Some(instance.into()),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance {
            Some(inst) => write!(f, "{}/{}", self.model, inst),
            None => write!(f, "{}", self.model),
        }
    }
}

/// One message.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub origin: Option<Origin>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(severity: Severity, origin: Option<Origin>, message: impl Into<String>) -> Self {
        Self {
            severity,
            origin,
            message: message.into(),
        }
    }

    pub fn warning(origin: Origin, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, Some(origin), message)
    }

    pub fn fatal(origin: Origin, message: impl Into<String>) -> Self {
        Self::new(Severity::Fatal, Some(origin), message)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Some(origin) => write!(f, "{}: {}", origin, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Receiver of diagnostics.
pub trait DiagnosticSink {
    fn emit(&mut self, diagnostic: Diagnostic);
}

/// Forwards diagnostics to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn emit(&mut self, d: Diagnostic) {
        match d.severity {
            Severity::Info => log::info!("{}", d),
            Severity::Warning => log::warn!("{}", d),
            Severity::Fatal => log::error!("{}", d),
            Severity::Panic => log::error!("panic: {}", d),
        }
    }
}

/// Keeps diagnostics in memory.
#[derive(Debug, Default, Clone)]
pub struct CollectSink {
    pub diagnostics: Vec<Diagnostic>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diagnostics at or above `severity`.
    pub fn at_least(&self, severity: Severity) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(move |d| d.severity >= severity)
    }
}

impl DiagnosticSink for CollectSink {
    fn emit(&mut self, diagnostic: Diagnostic) {
        log::debug!("{}", diagnostic);
        self.diagnostics.push(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_prefix() {
        let d = Diagnostic::fatal(Origin::instance("nch", "m1"), "effective length <= 0");
        assert_eq!(d.to_string(), "nch/m1: effective length <= 0");
        let d = Diagnostic::new(Severity::Info, None, "done");
        assert_eq!(d.to_string(), "done");
    }

    #[test]
    fn test_collect_filters_by_severity() {
        let mut sink = CollectSink::new();
        sink.emit(Diagnostic::new(Severity::Info, None, "a"));
        sink.emit(Diagnostic::warning(Origin::model("d"), "b"));
        sink.emit(Diagnostic::fatal(Origin::model("d"), "c"));
        assert_eq!(sink.at_least(Severity::Warning).count(), 2);
        assert_eq!(sink.at_least(Severity::Fatal).count(), 1);
    }
}
