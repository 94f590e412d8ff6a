/// Structured reporting for build cycles and supervisor transitions.
///
/// Every build cycle surfaces exactly one report. The kind is the stable part;
/// the message text is free-form and only meant for humans.
use std::fmt;

/// Severity of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// The fixed set of things a session can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    SkippedNotWatching,
    SkippedHasErrors,
    NoArtifacts,
    TargetNotFound,
    AmbiguousTarget,
    SpawnFailed,
    TerminationFailed,
    Restarting,
    Starting,
}

impl ReportKind {
    /// Stable kebab-case name, used as the `kind` field in log events.
    pub fn as_str(self) -> &'static str {
        match self {
            ReportKind::SkippedNotWatching => "skipped-not-watching",
            ReportKind::SkippedHasErrors => "skipped-has-errors",
            ReportKind::NoArtifacts => "no-artifacts",
            ReportKind::TargetNotFound => "target-not-found",
            ReportKind::AmbiguousTarget => "ambiguous-target",
            ReportKind::SpawnFailed => "spawn-failed",
            ReportKind::TerminationFailed => "termination-failed",
            ReportKind::Restarting => "restarting",
            ReportKind::Starting => "starting",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            ReportKind::SkippedNotWatching | ReportKind::SkippedHasErrors => Severity::Warn,
            ReportKind::Restarting | ReportKind::Starting => Severity::Info,
            ReportKind::NoArtifacts
            | ReportKind::TargetNotFound
            | ReportKind::AmbiguousTarget
            | ReportKind::SpawnFailed
            | ReportKind::TerminationFailed => Severity::Error,
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single report: what happened and a human-readable explanation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub kind: ReportKind,
    pub message: String,
}

impl Report {
    pub fn new(kind: ReportKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }
}

/// Destination for reports.
///
/// Shared between the session and the supervisor's exit observers, so
/// implementations must be usable from any task.
pub trait Reporter: Send + Sync {
    fn report(&self, report: Report);
}

/// Default reporter: one `tracing` event per report, at the report's severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, report: Report) {
        let kind = report.kind.as_str();
        match report.severity() {
            Severity::Info => tracing::info!(kind, "{}", report.message),
            Severity::Warn => tracing::warn!(kind, "{}", report.message),
            Severity::Error => tracing::error!(kind, "{}", report.message),
        }
    }
}

/// Reporter that keeps every report in memory, for assertions in tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingReporter {
    reports: std::sync::Mutex<Vec<Report>>,
}

#[cfg(test)]
impl RecordingReporter {
    pub fn kinds(&self) -> Vec<ReportKind> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.kind)
            .collect()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Reporter for RecordingReporter {
    fn report(&self, report: Report) {
        self.reports.lock().unwrap().push(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_kebab_case() {
        assert_eq!(ReportKind::SkippedNotWatching.as_str(), "skipped-not-watching");
        assert_eq!(ReportKind::TerminationFailed.to_string(), "termination-failed");
        assert_eq!(ReportKind::Starting.as_str(), "starting");
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(ReportKind::SkippedHasErrors.severity(), Severity::Warn);
        assert_eq!(ReportKind::AmbiguousTarget.severity(), Severity::Error);
        assert_eq!(ReportKind::Restarting.severity(), Severity::Info);
    }

    #[test]
    fn test_recording_reporter_keeps_order() {
        let rec = RecordingReporter::default();
        rec.report(Report::new(ReportKind::Starting, "a"));
        rec.report(Report::new(ReportKind::Restarting, "b"));
        assert_eq!(
            rec.kinds(),
            vec![ReportKind::Starting, ReportKind::Restarting]
        );
        assert_eq!(rec.reports()[1].message, "b");
    }
}
