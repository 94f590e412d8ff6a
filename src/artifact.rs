/// Artifact selection: decide which emitted build output to run.
///
/// Name matching always happens against the snapshot first (exact, then
/// substring, both in emission order). Only when no emitted name matches is
/// the specifier tried as a filesystem path.
use std::path::{Component, Path, PathBuf};

use crate::report::ReportKind;

/// What one finished build produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSnapshot {
    /// Emitted file names, in emission order.
    pub artifact_names: Vec<String>,
    /// Absolute directory the artifacts were written to.
    pub output_dir: PathBuf,
    pub has_errors: bool,
}

/// Which artifact to run, and with what arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSpec {
    /// Artifact name, name fragment, or filesystem path.
    pub specifier: Option<String>,
    pub args: Vec<String>,
}

impl TargetSpec {
    /// The specifier, treating an empty string the same as none.
    fn specifier(&self) -> Option<&str> {
        self.specifier.as_deref().filter(|s| !s.is_empty())
    }
}

/// The artifact selected for this build cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub name: String,
    pub path: PathBuf,
}

/// Why no artifact could be selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// The build reported errors; the cycle should be skipped.
    BuildHasErrors,
    /// The build emitted nothing.
    NoOutputArtifacts,
    /// The specifier matched no artifact name and is not an existing path.
    TargetNotFound {
        specifier: String,
        candidates: Vec<String>,
    },
    /// No specifier and more than one artifact to choose from.
    AmbiguousTarget { candidates: Vec<String> },
}

impl std::fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionError::BuildHasErrors => write!(f, "build has errors"),
            ResolutionError::NoOutputArtifacts => write!(f, "build emitted no output artifacts"),
            ResolutionError::TargetNotFound {
                specifier,
                candidates,
            } => write!(
                f,
                "'{}' matches no emitted artifact and is not an existing path (artifacts: {})",
                specifier,
                candidates.join(", ")
            ),
            ResolutionError::AmbiguousTarget { candidates } => write!(
                f,
                "multiple artifacts emitted, set a target script to pick one of: {}",
                candidates.join(", ")
            ),
        }
    }
}

impl std::error::Error for ResolutionError {}

impl ResolutionError {
    pub fn kind(&self) -> ReportKind {
        match self {
            ResolutionError::BuildHasErrors => ReportKind::SkippedHasErrors,
            ResolutionError::NoOutputArtifacts => ReportKind::NoArtifacts,
            ResolutionError::TargetNotFound { .. } => ReportKind::TargetNotFound,
            ResolutionError::AmbiguousTarget { .. } => ReportKind::AmbiguousTarget,
        }
    }
}

/// Select the artifact to run for one build cycle.
pub fn resolve(
    snapshot: &BuildSnapshot,
    spec: &TargetSpec,
) -> Result<ResolvedTarget, ResolutionError> {
    if snapshot.has_errors {
        return Err(ResolutionError::BuildHasErrors);
    }
    if snapshot.artifact_names.is_empty() {
        return Err(ResolutionError::NoOutputArtifacts);
    }

    let name = match spec.specifier() {
        Some(specifier) => match find_matching_name(specifier, &snapshot.artifact_names) {
            Some(name) => name,
            None => {
                return resolve_filesystem_path(specifier).ok_or_else(|| {
                    ResolutionError::TargetNotFound {
                        specifier: specifier.to_string(),
                        candidates: snapshot.artifact_names.clone(),
                    }
                });
            }
        },
        None => match snapshot.artifact_names.as_slice() {
            [only] => only,
            candidates => {
                return Err(ResolutionError::AmbiguousTarget {
                    candidates: candidates.to_vec(),
                });
            }
        },
    };

    Ok(ResolvedTarget {
        name: name.clone(),
        path: snapshot.output_dir.join(name),
    })
}

/// Exact match first, then the first name containing `wanted`.
fn find_matching_name<'a>(wanted: &str, names: &'a [String]) -> Option<&'a String> {
    names
        .iter()
        .find(|name| name.as_str() == wanted)
        .or_else(|| names.iter().find(|name| name.contains(wanted)))
}

/// Second phase: the specifier names a file on disk, outside the build output.
fn resolve_filesystem_path(specifier: &str) -> Option<ResolvedTarget> {
    let candidate = Path::new(specifier);
    if !candidate.exists() {
        return None;
    }
    let path = normalize(&std::path::absolute(candidate).ok()?);
    let name = path.file_name()?.to_string_lossy().into_owned();
    tracing::debug!(path = %path.display(), "target resolved from filesystem path");
    Some(ResolvedTarget { name, path })
}

/// Lexically fold `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
