use crate::config::{EvidenceKind, EvidencePredicate};
use crate::errors::Error;
use crate::session::SessionState;
use globset::Glob;
use ignore::WalkBuilder;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Result of evaluating one predicate. Evaluator failures never propagate as
/// errors; the predicate reads as unsatisfied with the failure in `error`.
#[derive(Debug, Clone)]
pub struct EvidenceOutcome {
    pub satisfied: bool,
    pub evidence_type: EvidenceKind,
    pub details: Option<String>,
    pub error: Option<String>,
}

impl EvidenceOutcome {
    fn satisfied(kind: EvidenceKind, details: impl Into<String>) -> Self {
        Self {
            satisfied: true,
            evidence_type: kind,
            details: Some(details.into()),
            error: None,
        }
    }

    fn unsatisfied(kind: EvidenceKind) -> Self {
        Self {
            satisfied: false,
            evidence_type: kind,
            details: None,
            error: None,
        }
    }

    fn failed(kind: EvidenceKind, error: Error) -> Self {
        Self {
            satisfied: false,
            evidence_type: kind,
            details: None,
            error: Some(error.to_string()),
        }
    }
}

/// Evaluates capability-satisfaction and completion predicates against a
/// workspace. `command_success` is the only side-effecting predicate;
/// callers sharing a workspace must serialise those evaluations.
pub struct EvidenceChecker {
    workspace: PathBuf,
}

impl EvidenceChecker {
    pub fn new(workspace: &Path) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
        }
    }

    pub async fn check(
        &self,
        predicate: &EvidencePredicate,
        session: Option<&SessionState>,
    ) -> EvidenceOutcome {
        match predicate.kind {
            EvidenceKind::FileExists => match &predicate.pattern {
                Some(pattern) => self.check_file_exists(pattern),
                None => EvidenceOutcome::failed(
                    predicate.kind,
                    Error::Evidence("file_exists needs a pattern".into()),
                ),
            },
            EvidenceKind::MarkerFound => match (&predicate.path, &predicate.pattern) {
                (Some(path), Some(pattern)) => self.check_marker(path, pattern),
                _ => EvidenceOutcome::failed(
                    predicate.kind,
                    Error::Evidence("marker_found needs both a path and a pattern".into()),
                ),
            },
            EvidenceKind::CommandSuccess => match &predicate.command {
                Some(command) => {
                    self.check_command(command, predicate.expected_exit, predicate.timeout_secs)
                        .await
                }
                None => EvidenceOutcome::failed(
                    predicate.kind,
                    Error::Evidence("command_success needs a command".into()),
                ),
            },
            EvidenceKind::Manual => self.check_manual(predicate, session),
        }
    }

    /// Satisfied iff at least one workspace path matches the glob.
    fn check_file_exists(&self, pattern: &str) -> EvidenceOutcome {
        let matcher = match Glob::new(pattern) {
            Ok(glob) => glob.compile_matcher(),
            Err(e) => {
                return EvidenceOutcome::failed(
                    EvidenceKind::FileExists,
                    Error::Evidence(format!("bad glob '{pattern}': {e}")),
                )
            }
        };

        let walker = WalkBuilder::new(&self.workspace)
            .standard_filters(true)
            .hidden(true)
            .build();
        for entry in walker {
            let entry = match entry {
                Ok(v) => v,
                Err(_) => continue,
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.workspace)
                .unwrap_or(entry.path());
            let rel_str = rel.to_string_lossy().replace('\\', "/");
            if matcher.is_match(&rel_str) {
                debug!(pattern, path = %rel_str, "file_exists satisfied");
                return EvidenceOutcome::satisfied(EvidenceKind::FileExists, rel_str);
            }
        }
        EvidenceOutcome::unsatisfied(EvidenceKind::FileExists)
    }

    /// Satisfied iff the file exists and contains at least one regex match.
    fn check_marker(&self, path: &str, pattern: &str) -> EvidenceOutcome {
        let regex = match Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => {
                return EvidenceOutcome::failed(
                    EvidenceKind::MarkerFound,
                    Error::Evidence(format!("bad pattern '{pattern}': {e}")),
                )
            }
        };
        let full = self.workspace.join(path);
        let content = match std::fs::read_to_string(&full) {
            Ok(c) => c,
            Err(_) => return EvidenceOutcome::unsatisfied(EvidenceKind::MarkerFound),
        };
        if regex.is_match(&content) {
            EvidenceOutcome::satisfied(EvidenceKind::MarkerFound, path.to_string())
        } else {
            EvidenceOutcome::unsatisfied(EvidenceKind::MarkerFound)
        }
    }

    /// Satisfied iff the command exits with the expected code within the
    /// timeout. A timeout reads as unsatisfied with an error detail.
    async fn check_command(
        &self,
        command: &str,
        expected_exit: i32,
        timeout_secs: u64,
    ) -> EvidenceOutcome {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.workspace)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());

        let run = async {
            let output = cmd.output().await?;
            Ok::<_, std::io::Error>(output.status.code().unwrap_or(-1))
        };

        match tokio::time::timeout(Duration::from_secs(timeout_secs), run).await {
            Ok(Ok(code)) if code == expected_exit => EvidenceOutcome::satisfied(
                EvidenceKind::CommandSuccess,
                format!("'{command}' exited {code}"),
            ),
            Ok(Ok(code)) => {
                let mut outcome = EvidenceOutcome::unsatisfied(EvidenceKind::CommandSuccess);
                outcome.details = Some(format!("'{command}' exited {code}, expected {expected_exit}"));
                outcome
            }
            Ok(Err(e)) => EvidenceOutcome::failed(
                EvidenceKind::CommandSuccess,
                Error::Evidence(format!("failed to run '{command}': {e}")),
            ),
            Err(_) => EvidenceOutcome::failed(
                EvidenceKind::CommandSuccess,
                Error::Evidence(format!("'{command}' timed out after {timeout_secs}s")),
            ),
        }
    }

    /// Satisfied iff the session already holds a matching manual evidence
    /// record.
    fn check_manual(
        &self,
        predicate: &EvidencePredicate,
        session: Option<&SessionState>,
    ) -> EvidenceOutcome {
        let Some(capability) = predicate.capability.as_deref() else {
            return EvidenceOutcome::failed(
                EvidenceKind::Manual,
                Error::Evidence("manual needs a capability".into()),
            );
        };
        let found = session
            .map(|s| {
                s.capabilities_satisfied
                    .iter()
                    .any(|e| e.capability == capability)
            })
            .unwrap_or(false);
        if found {
            EvidenceOutcome::satisfied(EvidenceKind::Manual, capability.to_string())
        } else {
            EvidenceOutcome::unsatisfied(EvidenceKind::Manual)
        }
    }
}
