use crate::config::Strictness;
use crate::intent::Intent;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// One phase of a code-defined workflow.
#[derive(Debug, Clone)]
pub struct PhaseDef {
    pub name: String,
    pub provides: Vec<String>,
    pub requires: Vec<String>,
    pub blocked_intents: BTreeMap<Intent, String>,
    pub allowed_intents: Vec<Intent>,
}

/// Events driving the phase machine.
#[derive(Debug, Clone)]
pub enum PhaseEvent {
    CapabilitySatisfied(String),
    PhaseComplete,
    Reset,
}

/// Verdict for a single intent under the current phase and strictness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Warned(String),
    Blocked(String),
}

/// Pure in-memory phase state machine, for profiles whose workflow is
/// defined in code rather than resolved from a skill corpus. Advancement and
/// intent gating mirror the hook's strictness rules.
#[derive(Debug)]
pub struct WorkflowEnforcer {
    phases: Vec<PhaseDef>,
    current: usize,
    satisfied: BTreeSet<String>,
    strictness: Strictness,
}

impl WorkflowEnforcer {
    pub fn new(phases: Vec<PhaseDef>, strictness: Strictness) -> Self {
        Self {
            phases,
            current: 0,
            satisfied: BTreeSet::new(),
            strictness,
        }
    }

    pub fn current_phase(&self) -> Option<&PhaseDef> {
        self.phases.get(self.current)
    }

    pub fn is_finished(&self) -> bool {
        self.current >= self.phases.len()
    }

    pub fn satisfied(&self) -> &BTreeSet<String> {
        &self.satisfied
    }

    pub fn apply(&mut self, event: PhaseEvent) {
        match event {
            PhaseEvent::CapabilitySatisfied(capability) => {
                self.satisfied.insert(capability);
                self.advance_if_complete();
            }
            PhaseEvent::PhaseComplete => {
                if let Some(phase) = self.current_phase() {
                    // Forced completion still credits the phase's provides.
                    let provides: Vec<String> = phase.provides.clone();
                    self.satisfied.extend(provides);
                }
                self.advance(self.current + 1);
            }
            PhaseEvent::Reset => {
                self.current = 0;
                self.satisfied.clear();
            }
        }
    }

    /// When every capability the current phase provides is satisfied,
    /// advance to the next phase whose requirements are met.
    fn advance_if_complete(&mut self) {
        let Some(phase) = self.current_phase() else {
            return;
        };
        if phase.provides.iter().all(|c| self.satisfied.contains(c)) {
            self.advance(self.current + 1);
        }
    }

    fn advance(&mut self, from: usize) {
        let next = (from..self.phases.len())
            .find(|&idx| {
                self.phases[idx]
                    .requires
                    .iter()
                    .all(|c| self.satisfied.contains(c))
            })
            .unwrap_or(self.phases.len());
        debug!(from = self.current, to = next, "phase advance");
        self.current = next;
    }

    /// Same strictness rules as the pre-tool-use hook: strict blocks every
    /// denied intent, advisory blocks high-impact ones and warns otherwise,
    /// permissive only warns.
    pub fn is_allowed(&self, intent: Intent) -> Verdict {
        let Some(phase) = self.current_phase() else {
            return Verdict::Allowed;
        };
        if phase.allowed_intents.contains(&intent) {
            return Verdict::Allowed;
        }
        let Some(reason) = phase.blocked_intents.get(&intent) else {
            return Verdict::Allowed;
        };
        match self.strictness {
            Strictness::Strict => Verdict::Blocked(reason.clone()),
            Strictness::Advisory if intent.is_high_impact() => Verdict::Blocked(reason.clone()),
            _ => Verdict::Warned(reason.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase(
        name: &str,
        provides: &[&str],
        requires: &[&str],
        blocked: &[(Intent, &str)],
        allowed: &[Intent],
    ) -> PhaseDef {
        PhaseDef {
            name: name.to_string(),
            provides: provides.iter().map(|s| s.to_string()).collect(),
            requires: requires.iter().map(|s| s.to_string()).collect(),
            blocked_intents: blocked
                .iter()
                .map(|(i, r)| (*i, r.to_string()))
                .collect(),
            allowed_intents: allowed.to_vec(),
        }
    }

    fn red_green_phases() -> Vec<PhaseDef> {
        vec![
            phase(
                "red",
                &["test_written"],
                &[],
                &[(Intent::WriteImpl, "write a failing test first")],
                &[Intent::WriteTest, Intent::Read],
            ),
            phase(
                "green",
                &["test_green"],
                &["test_written"],
                &[(Intent::Commit, "make the test pass first")],
                &[Intent::WriteImpl, Intent::WriteTest],
            ),
            phase("done", &[], &["test_green"], &[], &[]),
        ]
    }

    #[test]
    fn test_initial_phase_blocks_impl() {
        let enforcer = WorkflowEnforcer::new(red_green_phases(), Strictness::Strict);
        assert_eq!(enforcer.current_phase().unwrap().name, "red");
        assert_eq!(
            enforcer.is_allowed(Intent::WriteImpl),
            Verdict::Blocked("write a failing test first".into())
        );
        assert_eq!(enforcer.is_allowed(Intent::WriteTest), Verdict::Allowed);
    }

    #[test]
    fn test_capability_advances_phase() {
        let mut enforcer = WorkflowEnforcer::new(red_green_phases(), Strictness::Strict);
        enforcer.apply(PhaseEvent::CapabilitySatisfied("test_written".into()));
        assert_eq!(enforcer.current_phase().unwrap().name, "green");
        // The impl-write block from "red" is gone; commit is now gated.
        assert_eq!(enforcer.is_allowed(Intent::WriteImpl), Verdict::Allowed);
        assert_eq!(
            enforcer.is_allowed(Intent::Commit),
            Verdict::Blocked("make the test pass first".into())
        );

        enforcer.apply(PhaseEvent::CapabilitySatisfied("test_green".into()));
        assert_eq!(enforcer.current_phase().unwrap().name, "done");
        assert_eq!(enforcer.is_allowed(Intent::Commit), Verdict::Allowed);
    }

    #[test]
    fn test_unrelated_capability_does_not_advance() {
        let mut enforcer = WorkflowEnforcer::new(red_green_phases(), Strictness::Strict);
        enforcer.apply(PhaseEvent::CapabilitySatisfied("something_else".into()));
        assert_eq!(enforcer.current_phase().unwrap().name, "red");
    }

    #[test]
    fn test_phase_complete_forces_advance() {
        let mut enforcer = WorkflowEnforcer::new(red_green_phases(), Strictness::Strict);
        enforcer.apply(PhaseEvent::PhaseComplete);
        assert_eq!(enforcer.current_phase().unwrap().name, "green");
        assert!(enforcer.satisfied().contains("test_written"));
    }

    #[test]
    fn test_advance_skips_phase_with_unmet_requires() {
        let phases = vec![
            phase("a", &["one"], &[], &[], &[]),
            phase("b", &[], &["never_provided"], &[], &[]),
            phase("c", &[], &["one"], &[], &[]),
        ];
        let mut enforcer = WorkflowEnforcer::new(phases, Strictness::Strict);
        enforcer.apply(PhaseEvent::CapabilitySatisfied("one".into()));
        assert_eq!(enforcer.current_phase().unwrap().name, "c");
    }

    #[test]
    fn test_reset() {
        let mut enforcer = WorkflowEnforcer::new(red_green_phases(), Strictness::Strict);
        enforcer.apply(PhaseEvent::CapabilitySatisfied("test_written".into()));
        enforcer.apply(PhaseEvent::Reset);
        assert_eq!(enforcer.current_phase().unwrap().name, "red");
        assert!(enforcer.satisfied().is_empty());
    }

    #[test]
    fn test_advisory_and_permissive_rules() {
        let mut phases = red_green_phases();
        phases[0]
            .blocked_intents
            .insert(Intent::WriteDocs, "docs later".into());

        let advisory = WorkflowEnforcer::new(phases.clone(), Strictness::Advisory);
        assert!(matches!(advisory.is_allowed(Intent::WriteImpl), Verdict::Blocked(_)));
        assert!(matches!(advisory.is_allowed(Intent::WriteDocs), Verdict::Warned(_)));

        let permissive = WorkflowEnforcer::new(phases, Strictness::Permissive);
        assert!(matches!(permissive.is_allowed(Intent::WriteImpl), Verdict::Warned(_)));
        assert!(matches!(permissive.is_allowed(Intent::WriteDocs), Verdict::Warned(_)));
    }

    #[test]
    fn test_finished_machine_allows_everything() {
        let mut enforcer = WorkflowEnforcer::new(red_green_phases(), Strictness::Strict);
        enforcer.apply(PhaseEvent::CapabilitySatisfied("test_written".into()));
        enforcer.apply(PhaseEvent::CapabilitySatisfied("test_green".into()));
        enforcer.apply(PhaseEvent::PhaseComplete);
        assert!(enforcer.is_finished());
        assert_eq!(enforcer.is_allowed(Intent::Deploy), Verdict::Allowed);
    }
}
