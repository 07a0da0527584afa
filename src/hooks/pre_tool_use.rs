use super::HookDecision;
use crate::config::{EvidenceKind, SkillDef, Strictness};
use crate::evidence::EvidenceChecker;
use crate::intent::{map_invocation, Intent, ToolInvocation};
use crate::resolver::compute_blocked_intents;
use crate::session::{CapabilityEvidence, SessionState, SessionStore};
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Pre-tool-use gate: classify the call into intents, intersect with the
/// session's blocked map, and allow or deny under the profile's strictness.
/// Allowed calls also trigger an evidence sweep for the current skill.
pub struct PreToolUseHook<'a> {
    store: &'a SessionStore,
    skills: &'a [SkillDef],
    workspace: &'a Path,
}

impl<'a> PreToolUseHook<'a> {
    pub fn new(store: &'a SessionStore, skills: &'a [SkillDef], workspace: &'a Path) -> Self {
        Self {
            store,
            skills,
            workspace,
        }
    }

    pub async fn check(&self, invocation: &ToolInvocation) -> crate::errors::Result<HookDecision> {
        let Some(session) = self.store.load_current()? else {
            return Ok(HookDecision::allow());
        };

        // Sweep evidence left behind by the previous allowed call before
        // consulting the blocked map, so satisfaction observed on disk lifts
        // its blocks immediately.
        let session = self.sweep_evidence(session).await?;

        let intents = map_invocation(invocation);
        let hits: Vec<Intent> = intents
            .iter()
            .copied()
            .filter(|i| session.blocked_intents.contains_key(i))
            .collect();

        let enforced: Vec<Intent> = match session.strictness {
            Strictness::Strict => hits.clone(),
            Strictness::Advisory => hits.iter().copied().filter(Intent::is_high_impact).collect(),
            Strictness::Permissive => Vec::new(),
        };

        if !enforced.is_empty() {
            let message = self.denial_message(&session, &enforced);
            info!(intents = ?enforced, session = %session.session_id, "tool call denied");
            return Ok(HookDecision::deny(message, enforced));
        }

        let mut message = self.guidance_message(&session);
        if !hits.is_empty() {
            // Non-enforced hits under advisory/permissive still warn.
            let warned: Vec<&str> = hits.iter().map(|i| i.as_str()).collect();
            message = format!(
                "Warning: {} would be blocked under strict enforcement.\n{}",
                warned.join(", "),
                message
            );
        }
        Ok(HookDecision::allow_with(message))
    }

    fn skills_by_name(&self) -> HashMap<&str, &SkillDef> {
        self.skills.iter().map(|s| (s.name.as_str(), s)).collect()
    }

    /// Evaluate the current skill's artifacts; newly satisfied capabilities
    /// are appended (never removed) and the blocked-intent map recomputed
    /// against the grown satisfied set.
    async fn sweep_evidence(
        &self,
        session: SessionState,
    ) -> crate::errors::Result<SessionState> {
        let by_name = self.skills_by_name();
        let Some(current) = session.current_skill().and_then(|n| by_name.get(n).copied()) else {
            return Ok(session);
        };
        if current.artifacts.is_empty() {
            return Ok(session);
        }

        let checker = EvidenceChecker::new(self.workspace);
        let satisfied = session.satisfied_set();
        let mut newly = Vec::new();
        for artifact in &current.artifacts {
            // Manual evidence only arrives through explicit records; the
            // sweep would otherwise never observe it freshly.
            if artifact.kind == EvidenceKind::Manual {
                continue;
            }
            let Some(capability) = current.artifact_capability(artifact) else {
                continue;
            };
            if satisfied.contains(capability) {
                continue;
            }
            let outcome = checker.check(artifact, Some(&session)).await;
            if outcome.satisfied {
                debug!(capability, skill = %current.name, "evidence satisfied");
                newly.push(CapabilityEvidence {
                    capability: capability.to_string(),
                    satisfied_at: Utc::now(),
                    satisfied_by: current.name.clone(),
                    evidence_type: outcome.evidence_type,
                    evidence_path: outcome.details,
                });
            }
        }

        if newly.is_empty() {
            return Ok(session);
        }

        let skills = self.skills.to_vec();
        let updated = self.store.update(&session.session_id, move |s| {
            for evidence in newly {
                s.record_evidence(evidence);
            }
            let by_name: HashMap<&str, &SkillDef> =
                skills.iter().map(|sk| (sk.name.as_str(), sk)).collect();
            let satisfied = s.satisfied_set();
            let chain_skills: Vec<&SkillDef> = s
                .chain
                .iter()
                .filter_map(|n| by_name.get(n.as_str()).copied())
                .collect();
            s.blocked_intents = compute_blocked_intents(chain_skills, &satisfied);
            s.advance_skill_index(&by_name);
        })?;
        Ok(updated)
    }

    /// Structured denial: block reason, first unmet capability, suggested
    /// next skill, and how to proceed.
    fn denial_message(&self, session: &SessionState, blocked: &[Intent]) -> String {
        let first = blocked[0];
        let reason = session
            .blocked_intents
            .get(&first)
            .cloned()
            .unwrap_or_else(|| "blocked by workflow".to_string());
        let unmet = session.next_unsatisfied().unwrap_or("none");
        let next_skill = self
            .suggested_skill(session, unmet)
            .unwrap_or_else(|| session.current_skill().unwrap_or("none").to_string());

        let mut lines = Vec::new();
        lines.push(format!("BLOCKED [{}]: {}", first.as_str(), reason));
        lines.push(format!("Unmet capability: {unmet}"));
        lines.push(format!("Suggested skill: {next_skill}"));
        lines.push(format!(
            "How to proceed: complete '{unmet}' via the '{next_skill}' skill, then retry."
        ));
        if blocked.len() > 1 {
            let rest: Vec<&str> = blocked[1..].iter().map(|i| i.as_str()).collect();
            lines.push(format!("Also blocked: {}", rest.join(", ")));
        }
        lines.join("\n")
    }

    /// The chain skill that provides a capability, preferring the current
    /// skill onwards.
    fn suggested_skill(&self, session: &SessionState, capability: &str) -> Option<String> {
        let by_name = self.skills_by_name();
        session
            .chain
            .iter()
            .skip(session.current_skill_index)
            .chain(session.chain.iter())
            .find(|name| {
                by_name
                    .get(name.as_str())
                    .map(|s| s.provides.iter().any(|c| c == capability))
                    .unwrap_or(false)
            })
            .cloned()
    }

    fn guidance_message(&self, session: &SessionState) -> String {
        let (done, total) = session.progress();
        match (session.current_skill(), session.next_unsatisfied()) {
            (Some(skill), Some(cap)) => format!(
                "Workflow '{}': current skill '{}', next capability '{}' ({}/{} satisfied).",
                session.profile_id, skill, cap, done, total
            ),
            _ => format!(
                "Workflow '{}': all {} required capabilities satisfied.",
                session.profile_id, total
            ),
        }
    }
}
