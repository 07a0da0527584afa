use super::HookDecision;
use crate::config::{ProfilesFile, Strictness};
use crate::evidence::EvidenceChecker;
use crate::session::SessionStore;
use std::path::Path;
use tracing::info;

/// Stop-time gate: under a strict profile, termination is allowed only when
/// every completion requirement evaluates satisfied.
pub struct StopHook<'a> {
    store: &'a SessionStore,
    profiles: &'a ProfilesFile,
    workspace: &'a Path,
}

impl<'a> StopHook<'a> {
    pub fn new(store: &'a SessionStore, profiles: &'a ProfilesFile, workspace: &'a Path) -> Self {
        Self {
            store,
            profiles,
            workspace,
        }
    }

    pub async fn check(&self) -> crate::errors::Result<HookDecision> {
        let Some(session) = self.store.load_current()? else {
            return Ok(HookDecision::allow());
        };
        if session.strictness != Strictness::Strict {
            return Ok(HookDecision::allow());
        }
        // A session whose profile vanished from config cannot be evaluated;
        // it terminates freely.
        let Some(profile) = self.profiles.find(&session.profile_id) else {
            return Ok(HookDecision::allow());
        };
        if profile.completion_requirements.is_empty() {
            return Ok(HookDecision::allow());
        }

        let checker = EvidenceChecker::new(self.workspace);
        let mut missing = Vec::new();
        for requirement in &profile.completion_requirements {
            let outcome = checker.check(requirement, Some(&session)).await;
            if !outcome.satisfied {
                let mut line = requirement.describe();
                if let Some(error) = outcome.error {
                    line.push_str(&format!(" ({error})"));
                }
                missing.push(line);
            }
        }

        if missing.is_empty() {
            return Ok(HookDecision::allow());
        }

        info!(
            session = %session.session_id,
            missing = missing.len(),
            "stop denied"
        );
        let message = format!(
            "Cannot stop: {} completion requirement(s) unsatisfied for profile '{}':\n  - {}",
            missing.len(),
            profile.name,
            missing.join("\n  - ")
        );
        Ok(HookDecision::deny(message, Vec::new()))
    }
}
