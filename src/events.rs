/// Build event feed: newline-delimited JSON read from stdin or a file.
///
/// ```text
/// {"event":"watch_started"}
/// {"event":"build_finished","assets":["main.js"],"output_dir":"/app/dist","has_errors":false}
/// ```
///
/// Blank lines are ignored. A line that fails to decode, including one that
/// is not valid UTF-8, is logged and skipped.
use serde::Deserialize;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::artifact::BuildSnapshot;
use crate::session::WatchSession;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BuildEvent {
    WatchStarted,
    BuildFinished {
        #[serde(default)]
        assets: Vec<String>,
        output_dir: PathBuf,
        #[serde(default)]
        has_errors: bool,
    },
}

#[derive(Debug)]
pub enum EventError {
    /// Reading the feed failed.
    Io(std::io::Error),
    /// A line was not a valid event.
    Parse {
        line: usize,
        source: serde_json::Error,
    },
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventError::Io(e) => write!(f, "failed to read build events: {e}"),
            EventError::Parse { line, source } => {
                write!(f, "invalid build event on line {line}: {source}")
            }
        }
    }
}

impl std::error::Error for EventError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EventError::Io(e) => Some(e),
            EventError::Parse { source, .. } => Some(source),
        }
    }
}

impl From<std::io::Error> for EventError {
    fn from(e: std::io::Error) -> Self {
        EventError::Io(e)
    }
}

impl BuildEvent {
    /// Decode one feed line. `Ok(None)` for blank lines.
    pub fn parse(line_no: usize, line: impl AsRef<[u8]>) -> Result<Option<Self>, EventError> {
        let line = line.as_ref().trim_ascii();
        if line.is_empty() {
            return Ok(None);
        }
        serde_json::from_slice(line)
            .map(Some)
            .map_err(|source| EventError::Parse {
                line: line_no,
                source,
            })
    }
}

/// Turn a `build_finished` payload into a snapshot, anchoring a relative
/// output directory at the current working directory.
fn snapshot(assets: Vec<String>, output_dir: PathBuf, has_errors: bool) -> BuildSnapshot {
    let output_dir = std::path::absolute(&output_dir).unwrap_or(output_dir);
    BuildSnapshot {
        artifact_names: assets,
        output_dir,
        has_errors,
    }
}

/// Counters for a completed feed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeedSummary {
    pub builds: usize,
    pub malformed_lines: usize,
}

/// Dispatch every event from `reader` into `session` until end of input.
pub async fn run_feed<R>(
    mut reader: R,
    session: &mut WatchSession,
) -> Result<FeedSummary, EventError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let mut summary = FeedSummary::default();
    let mut line_no = 0;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        line_no += 1;
        let event = match BuildEvent::parse(line_no, &line) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed build event");
                summary.malformed_lines += 1;
                continue;
            }
        };

        match event {
            BuildEvent::WatchStarted => {
                session.on_watch_started();
                tracing::debug!(
                    line = line_no,
                    watching = session.is_watching(),
                    "watch started"
                );
            }
            BuildEvent::BuildFinished {
                assets,
                output_dir,
                has_errors,
            } => {
                summary.builds += 1;
                let kind = session.on_build_finished(&snapshot(assets, output_dir, has_errors));
                tracing::debug!(
                    build = summary.builds,
                    watching = session.is_watching(),
                    %kind,
                    state = ?session.supervisor().state(),
                    pid = ?session.supervisor().current_pid(),
                    "build processed"
                );
            }
        }
    }

    tracing::info!(
        builds = summary.builds,
        malformed_lines = summary.malformed_lines,
        "build event feed closed"
    );
    Ok(summary)
}
