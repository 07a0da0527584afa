pub mod lock;
pub mod store;

use crate::config::{EvidenceKind, SkillDef, Strictness};
use crate::intent::Intent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

pub use store::SessionStore;

/// Proof that a capability was satisfied, and how.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityEvidence {
    pub capability: String,
    pub satisfied_at: DateTime<Utc>,
    pub satisfied_by: String,
    pub evidence_type: EvidenceKind,
    #[serde(default)]
    pub evidence_path: Option<String>,
}

/// Persisted per-workspace workflow state. Created by the activator, mutated
/// only by the hooks, destroyed by an explicit clear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub profile_id: String,
    pub activated_at: DateTime<Utc>,
    pub chain: Vec<String>,
    pub capabilities_required: Vec<String>,
    #[serde(default)]
    pub capabilities_satisfied: Vec<CapabilityEvidence>,
    #[serde(default)]
    pub current_skill_index: usize,
    pub strictness: Strictness,
    #[serde(default)]
    pub blocked_intents: BTreeMap<Intent, String>,
}

impl SessionState {
    pub fn satisfied_set(&self) -> BTreeSet<String> {
        self.capabilities_satisfied
            .iter()
            .map(|e| e.capability.clone())
            .collect()
    }

    /// First required capability without evidence, in profile order.
    pub fn next_unsatisfied(&self) -> Option<&str> {
        let satisfied = self.satisfied_set();
        self.capabilities_required
            .iter()
            .map(|c| c.as_str())
            .find(|c| !satisfied.contains(*c))
    }

    /// All required capabilities have evidence. Completion requirements are
    /// evaluated separately at stop time.
    pub fn capabilities_complete(&self) -> bool {
        self.next_unsatisfied().is_none()
    }

    /// Record a capability as satisfied. Append-only: an already-satisfied
    /// capability keeps its original evidence.
    pub fn record_evidence(&mut self, evidence: CapabilityEvidence) {
        if self
            .capabilities_satisfied
            .iter()
            .any(|e| e.capability == evidence.capability)
        {
            return;
        }
        self.capabilities_satisfied.push(evidence);
    }

    /// Move `current_skill_index` to the first chain skill with an
    /// unsatisfied `provides` entry. Monotonically non-decreasing.
    pub fn advance_skill_index(&mut self, skills_by_name: &HashMap<&str, &SkillDef>) {
        let satisfied = self.satisfied_set();
        let next = self
            .chain
            .iter()
            .position(|name| {
                skills_by_name
                    .get(name.as_str())
                    .map(|s| s.provides.iter().any(|cap| !satisfied.contains(cap)))
                    .unwrap_or(false)
            })
            .unwrap_or(self.chain.len());
        self.current_skill_index = self.current_skill_index.max(next);
    }

    /// Name of the skill currently being worked, if the chain is unfinished.
    pub fn current_skill(&self) -> Option<&str> {
        self.chain.get(self.current_skill_index).map(|s| s.as_str())
    }

    pub fn progress(&self) -> (usize, usize) {
        (
            self.satisfied_set()
                .intersection(&self.capabilities_required.iter().cloned().collect())
                .count(),
            self.capabilities_required.len(),
        )
    }
}

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Mint a time-ordered session id: `sess-<unix-millis>-<8 hex>`. The suffix
/// hashes the process id and a process-local counter so concurrent mints in
/// one workspace stay unique.
pub fn mint_session_id(now: DateTime<Utc>) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::process::id().hash(&mut hasher);
    SESSION_COUNTER.fetch_add(1, Ordering::Relaxed).hash(&mut hasher);
    now.timestamp_nanos_opt().unwrap_or(0).hash(&mut hasher);
    format!(
        "sess-{}-{:08x}",
        now.timestamp_millis(),
        (hasher.finish() & 0xffff_ffff) as u32
    )
}

#[cfg(test)]
pub mod test_fixtures {
    use super::*;

    pub fn session(id: &str, chain: &[&str], required: &[&str]) -> SessionState {
        SessionState {
            session_id: id.to_string(),
            profile_id: "bug-fix".to_string(),
            activated_at: Utc::now(),
            chain: chain.iter().map(|s| s.to_string()).collect(),
            capabilities_required: required.iter().map(|s| s.to_string()).collect(),
            capabilities_satisfied: Vec::new(),
            current_skill_index: 0,
            strictness: Strictness::Strict,
            blocked_intents: BTreeMap::new(),
        }
    }

    pub fn evidence(capability: &str, by: &str) -> CapabilityEvidence {
        CapabilityEvidence {
            capability: capability.to_string(),
            satisfied_at: Utc::now(),
            satisfied_by: by.to_string(),
            evidence_type: EvidenceKind::Manual,
            evidence_path: None,
        }
    }
}
