/// Watch session: turns build events into supervisor actions.
///
/// Builds are ignored until the pipeline signals that watch mode is engaged.
/// Every finished build produces exactly one report and never an error.
use crate::artifact::{self, BuildSnapshot, TargetSpec};
use crate::report::{Report, ReportKind, Reporter};
use crate::supervisor::{EnsureOutcome, LaunchSpec, ProcessSupervisor};
use std::sync::Arc;

pub struct WatchSession {
    target: TargetSpec,
    supervisor: ProcessSupervisor,
    reporter: Arc<dyn Reporter>,
    watching: bool,
}

impl WatchSession {
    pub fn new(target: TargetSpec, launch: LaunchSpec, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            target,
            supervisor: ProcessSupervisor::new(launch, Arc::clone(&reporter)),
            reporter,
            watching: false,
        }
    }

    /// Latch watch mode on. Later calls are no-ops.
    pub fn on_watch_started(&mut self) {
        if !self.watching {
            tracing::debug!("watch mode engaged");
        }
        self.watching = true;
    }

    pub fn is_watching(&self) -> bool {
        self.watching
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Handle one finished build. Returns the kind of the report emitted.
    pub fn on_build_finished(&mut self, snapshot: &BuildSnapshot) -> ReportKind {
        let report = self.run_cycle(snapshot);
        let kind = report.kind;
        self.reporter.report(report);
        kind
    }

    fn run_cycle(&self, snapshot: &BuildSnapshot) -> Report {
        if !self.watching {
            return Report::new(
                ReportKind::SkippedNotWatching,
                "skipped, the build pipeline is not in watch mode",
            );
        }

        let target = match artifact::resolve(snapshot, &self.target) {
            Ok(target) => target,
            Err(e) => return Report::new(e.kind(), format!("skipped, {e}")),
        };

        match self.supervisor.ensure_running(&target.path, &self.target.args) {
            Ok(EnsureOutcome::Started { pid }) => Report::new(
                ReportKind::Starting,
                format!("starting {} (pid {pid})", target.name),
            ),
            Ok(EnsureOutcome::Restarting { pid }) => Report::new(
                ReportKind::Restarting,
                format!("restarting {}, stopping pid {pid}", target.name),
            ),
            Ok(EnsureOutcome::RestartCoalesced) => Report::new(
                ReportKind::Restarting,
                format!(
                    "restart already in progress, {} will start once the old process exits",
                    target.name
                ),
            ),
            Err(e) => Report::new(e.kind(), e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::RecordingReporter;
    use crate::supervisor::SupervisorState;
    use std::path::Path;
    use std::time::Duration;

    const SERVER_SCRIPT: &str = r#"trap 'exit 0' TERM
i=0
while [ $i -lt 200 ]; do sleep 0.05; i=$((i+1)); done
"#;

    fn session(
        runner: Option<&str>,
        specifier: Option<&str>,
    ) -> (WatchSession, Arc<RecordingReporter>) {
        let reporter = Arc::new(RecordingReporter::default());
        let target = TargetSpec {
            specifier: specifier.map(String::from),
            args: vec![],
        };
        let launch = LaunchSpec {
            runner: runner.map(String::from),
            stop_timeout: None,
        };
        (WatchSession::new(target, launch, reporter.clone()), reporter)
    }

    fn build(dir: &Path, names: &[&str]) -> BuildSnapshot {
        for name in names {
            std::fs::write(dir.join(name), SERVER_SCRIPT).unwrap();
        }
        BuildSnapshot {
            artifact_names: names.iter().map(|n| n.to_string()).collect(),
            output_dir: dir.to_path_buf(),
            has_errors: false,
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("condition not met within 5s");
    }

    fn kill_leftover(session: &WatchSession) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        if let Some(pid) = session.supervisor().current_pid() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
    }

    #[tokio::test]
    async fn test_builds_before_watch_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, reporter) = session(Some("sh"), None);

        let kind = session.on_build_finished(&build(dir.path(), &["app.sh"]));
        assert_eq!(kind, ReportKind::SkippedNotWatching);
        assert_eq!(session.supervisor().state(), SupervisorState::Idle);
        assert_eq!(reporter.kinds(), vec![ReportKind::SkippedNotWatching]);
    }

    #[tokio::test]
    async fn test_watch_latch_is_idempotent() {
        let (mut session, _) = session(Some("sh"), None);
        assert!(!session.is_watching());
        session.on_watch_started();
        session.on_watch_started();
        assert!(session.is_watching());
    }

    #[tokio::test]
    async fn test_resolution_failures_map_to_report_kinds() {
        let dir = tempfile::tempdir().unwrap();

        let (mut s, reporter) = session(Some("sh"), None);
        s.on_watch_started();

        let mut broken = build(dir.path(), &["app.sh"]);
        broken.has_errors = true;
        assert_eq!(s.on_build_finished(&broken), ReportKind::SkippedHasErrors);
        assert_eq!(s.on_build_finished(&build(dir.path(), &[])), ReportKind::NoArtifacts);
        assert_eq!(
            s.on_build_finished(&build(dir.path(), &["a.sh", "b.sh"])),
            ReportKind::AmbiguousTarget
        );
        assert_eq!(s.supervisor().state(), SupervisorState::Idle);
        assert_eq!(reporter.reports().len(), 3);
        assert!(reporter.reports()[2].message.contains("a.sh, b.sh"));

        let (mut s, _) = session(Some("sh"), Some("missing-entry"));
        s.on_watch_started();
        assert_eq!(
            s.on_build_finished(&build(dir.path(), &["app.sh"])),
            ReportKind::TargetNotFound
        );
    }

    #[tokio::test]
    async fn test_start_then_restart() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, reporter) = session(Some("sh"), Some("server"));
        session.on_watch_started();

        let snapshot = build(dir.path(), &["vendor.sh", "server.sh"]);
        assert_eq!(session.on_build_finished(&snapshot), ReportKind::Starting);
        let first = session.supervisor().current_pid().unwrap();

        assert_eq!(session.on_build_finished(&snapshot), ReportKind::Restarting);
        wait_until(|| {
            session
                .supervisor()
                .current_pid()
                .is_some_and(|pid| pid != first)
        })
        .await;
        assert_eq!(session.supervisor().state(), SupervisorState::Running);
        assert_eq!(
            reporter.kinds(),
            vec![ReportKind::Starting, ReportKind::Restarting]
        );
        assert!(reporter.reports()[0].message.starts_with("starting server.sh"));
        kill_leftover(&session);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported_and_session_continues() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, reporter) = session(None, None);
        session.on_watch_started();

        // Listed by the build but never written to disk.
        let snapshot = BuildSnapshot {
            artifact_names: vec!["ghost".to_string()],
            output_dir: dir.path().to_path_buf(),
            has_errors: false,
        };
        assert_eq!(session.on_build_finished(&snapshot), ReportKind::SpawnFailed);
        assert_eq!(session.supervisor().state(), SupervisorState::Idle);
        assert_eq!(session.on_build_finished(&snapshot), ReportKind::SpawnFailed);
        assert_eq!(
            reporter.kinds(),
            vec![ReportKind::SpawnFailed, ReportKind::SpawnFailed]
        );
    }
}
