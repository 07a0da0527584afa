pub mod graph;

use crate::config::{ProfileDef, SkillDef, Strictness};
use crate::errors::{Error, Result};
use crate::intent::Intent;
use graph::SkillGraph;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Why a skill ended up in the chain.
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub skill: String,
    pub reason: String,
    pub provides: Vec<String>,
    pub requires: Vec<String>,
}

/// Output of capability resolution: a conflict-free, dependency-ordered
/// skill chain plus the intent-deny map derived from it.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub chain: Vec<String>,
    pub blocked_intents: BTreeMap<Intent, String>,
    pub explanations: Vec<Explanation>,
    pub warnings: Vec<String>,
}

/// Derive the blocked-intent map for a chain given the currently satisfied
/// capability set. Walks the chain in order; the first skill to deny an
/// intent wins. Entries whose `until` capability is already satisfied are
/// dropped.
pub fn compute_blocked_intents<'a, I>(
    chain: I,
    satisfied: &BTreeSet<String>,
) -> BTreeMap<Intent, String>
where
    I: IntoIterator<Item = &'a SkillDef>,
{
    let mut blocked = BTreeMap::new();
    for skill in chain {
        for (intent, rule) in &skill.tool_policy.deny_until {
            if satisfied.contains(&rule.until) {
                continue;
            }
            blocked.entry(*intent).or_insert_with(|| rule.reason.clone());
        }
    }
    blocked
}

struct ResolveCtx<'a> {
    graph: SkillGraph<'a>,
    profile: &'a ProfileDef,
    satisfied: BTreeSet<String>,
    unreachable: BTreeSet<String>,
    chain: Vec<usize>,
    in_chain: HashSet<usize>,
    explanations: Vec<Explanation>,
    warnings: Vec<String>,
}

/// Compute a conflict-free topologically ordered skill chain covering the
/// profile's required capabilities. Deterministic for identical inputs.
pub fn resolve(profile: &ProfileDef, skills: &[SkillDef]) -> Result<Resolution> {
    let graph = SkillGraph::build(skills);
    let mut ctx = ResolveCtx {
        graph,
        profile,
        satisfied: BTreeSet::new(),
        unreachable: BTreeSet::new(),
        chain: Vec::new(),
        in_chain: HashSet::new(),
        explanations: Vec::new(),
        warnings: Vec::new(),
    };

    let needed = ctx.graph.requirement_closure(&profile.capabilities_required);
    tracing::debug!(
        profile = %profile.name,
        needed = needed.len(),
        relevant = ctx.graph.relevant_skills(&needed).len(),
        "resolving capability chain"
    );

    // Requirements are re-scanned in profile order after every selection, so
    // a skill that happens to provide a later capability short-circuits it.
    loop {
        let next = profile
            .capabilities_required
            .iter()
            .find(|c| !ctx.satisfied.contains(*c) && !ctx.unreachable.contains(*c))
            .cloned();
        let Some(cap) = next else { break };
        let needed_by = format!("profile '{}'", profile.name);
        let mut selecting = Vec::new();
        select_capability(&mut ctx, &cap, &needed_by, &mut selecting)?;
    }

    let chain_skills: Vec<&SkillDef> = ctx.chain.iter().map(|&i| ctx.graph.skills[i]).collect();
    let blocked_intents = compute_blocked_intents(chain_skills.iter().copied(), &BTreeSet::new());

    // Capabilities provided but never required by the profile or by any
    // chain member.
    let mut required_somewhere: BTreeSet<&str> = profile
        .capabilities_required
        .iter()
        .map(|c| c.as_str())
        .collect();
    for skill in &chain_skills {
        required_somewhere.extend(skill.requires.iter().map(|c| c.as_str()));
    }
    for skill in &chain_skills {
        for cap in &skill.provides {
            if !required_somewhere.contains(cap.as_str()) {
                ctx.warnings.push(format!(
                    "capability '{cap}' provided by '{}' is never required",
                    skill.name
                ));
            }
        }
    }

    Ok(Resolution {
        chain: chain_skills.iter().map(|s| s.name.clone()).collect(),
        blocked_intents,
        explanations: ctx.explanations,
        warnings: ctx.warnings,
    })
}

/// Conflicts are symmetric: either direction between the candidate and any
/// current chain member poisons the chain.
fn check_conflicts(ctx: &ResolveCtx<'_>, candidate: &SkillDef) -> Result<()> {
    for &idx in &ctx.chain {
        let member = ctx.graph.skills[idx];
        if candidate.conflicts.contains(&member.name) || member.conflicts.contains(&candidate.name)
        {
            return Err(Error::Conflict {
                skill: candidate.name.clone(),
                other: member.name.clone(),
            });
        }
    }
    Ok(())
}

fn select_capability(
    ctx: &mut ResolveCtx<'_>,
    capability: &str,
    needed_by: &str,
    selecting: &mut Vec<usize>,
) -> Result<()> {
    if ctx.satisfied.contains(capability) || ctx.unreachable.contains(capability) {
        return Ok(());
    }

    let mut candidates: Vec<usize> = ctx
        .graph
        .providers_of(capability)
        .iter()
        .copied()
        .filter(|idx| !ctx.in_chain.contains(idx))
        .collect();

    if candidates.is_empty() {
        let message = format!("no skill provides required capability '{capability}'");
        if ctx.profile.strictness == Strictness::Strict {
            return Err(Error::Resolution {
                profile: ctx.profile.name.clone(),
                message,
            });
        }
        ctx.warnings.push(message);
        ctx.unreachable.insert(capability.to_string());
        return Ok(());
    }

    // Tie-break: requires already satisfied, then risk, then cost, then name.
    candidates.sort_by_key(|&idx| {
        let skill = ctx.graph.skills[idx];
        let unmet_requires = skill
            .requires
            .iter()
            .any(|req| !ctx.satisfied.contains(req));
        (unmet_requires, skill.risk, skill.cost, skill.name.clone())
    });
    let best_idx = candidates[0];
    let best = ctx.graph.skills[best_idx];

    check_conflicts(ctx, best)?;

    if selecting.contains(&best_idx) {
        let pos = selecting.iter().position(|&i| i == best_idx).unwrap_or(0);
        let mut names: Vec<String> = selecting[pos..]
            .iter()
            .map(|&i| ctx.graph.skills[i].name.clone())
            .collect();
        names.push(best.name.clone());
        return Err(Error::Resolution {
            profile: ctx.profile.name.clone(),
            message: format!("requirement cycle: {}", names.join(" -> ")),
        });
    }

    // Dependencies first, so they precede the dependent skill in the chain.
    selecting.push(best_idx);
    let requires = best.requires.clone();
    for req in &requires {
        if !ctx.satisfied.contains(req) {
            let needed_by = format!("skill '{}'", best.name);
            select_capability(ctx, req, &needed_by, selecting)?;
        }
    }
    selecting.pop();

    // A dependency provider may have covered this capability already.
    if ctx.satisfied.contains(capability) {
        return Ok(());
    }

    // The recursion above may have grown the chain with skills this
    // candidate conflicts with (its own transitive dependencies included),
    // so the check must run again before the candidate joins.
    check_conflicts(ctx, best)?;

    ctx.chain.push(best_idx);
    ctx.in_chain.insert(best_idx);
    ctx.satisfied.extend(best.provides.iter().cloned());
    ctx.explanations.push(Explanation {
        skill: best.name.clone(),
        reason: format!("provides '{capability}' needed by {needed_by}"),
        provides: best.provides.clone(),
        requires: best.requires.clone(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_fixtures::{deny, profile, skill};
    use crate::config::Tier;

    #[test]
    fn test_single_skill_chain() {
        let skills = vec![skill("tdd", &["test_written", "test_green"], &[])];
        let p = profile("bug-fix", &["test_written", "test_green"], Strictness::Strict);
        let resolution = resolve(&p, &skills).unwrap();
        assert_eq!(resolution.chain, vec!["tdd"]);
        assert_eq!(resolution.explanations.len(), 1);
    }

    #[test]
    fn test_deterministic() {
        let skills = vec![
            skill("b", &["x"], &[]),
            skill("a", &["x"], &[]),
            skill("c", &["y"], &[]),
        ];
        let p = profile("p", &["x", "y"], Strictness::Strict);
        let first = resolve(&p, &skills).unwrap();
        for _ in 0..5 {
            let again = resolve(&p, &skills).unwrap();
            assert_eq!(first.chain, again.chain);
            assert_eq!(first.blocked_intents, again.blocked_intents);
            assert_eq!(first.warnings, again.warnings);
        }
    }

    #[test]
    fn test_tiebreak_lexicographic_name() {
        let skills = vec![skill("zeta", &["x"], &[]), skill("alpha", &["x"], &[])];
        let p = profile("p", &["x"], Strictness::Strict);
        let resolution = resolve(&p, &skills).unwrap();
        assert_eq!(resolution.chain, vec!["alpha"]);
    }

    #[test]
    fn test_tiebreak_prefers_lower_risk_then_cost() {
        let mut risky = skill("risky", &["x"], &[]);
        risky.risk = Tier::High;
        let mut safe = skill("safe", &["x"], &[]);
        safe.risk = Tier::Low;
        let p = profile("p", &["x"], Strictness::Strict);
        let resolution = resolve(&p, &[risky.clone(), safe.clone()]).unwrap();
        assert_eq!(resolution.chain, vec!["safe"]);

        let mut cheap = skill("zcheap", &["x"], &[]);
        cheap.cost = Tier::Low;
        let mut dear = skill("adear", &["x"], &[]);
        dear.cost = Tier::High;
        let resolution = resolve(&p, &[dear, cheap]).unwrap();
        // Cost beats the lexicographic tie-break.
        assert_eq!(resolution.chain, vec!["zcheap"]);
    }

    #[test]
    fn test_tiebreak_prefers_satisfied_requires() {
        // "blocked" needs a capability nothing has satisfied yet; "ready"
        // does not. Both provide x; ready must win despite its name.
        let blocked = skill("ablocked", &["x"], &["warmup"]);
        let ready = skill("zready", &["x"], &[]);
        let warm = skill("warm", &["warmup"], &[]);
        let p = profile("p", &["x"], Strictness::Strict);
        let resolution = resolve(&p, &[blocked, ready, warm]).unwrap();
        assert_eq!(resolution.chain, vec!["zready"]);
    }

    #[test]
    fn test_dependencies_precede_dependent() {
        let skills = vec![
            skill("deployer", &["deployed"], &["built", "tested"]),
            skill("builder", &["built"], &[]),
            skill("tester", &["tested"], &["built"]),
        ];
        let p = profile("ship", &["deployed"], Strictness::Strict);
        let resolution = resolve(&p, &skills).unwrap();
        assert_eq!(resolution.chain, vec!["builder", "tester", "deployer"]);
        // Property: every capability is provided at or before first use.
        let mut seen = BTreeSet::new();
        for name in &resolution.chain {
            let s = skills.iter().find(|s| &s.name == name).unwrap();
            for req in &s.requires {
                assert!(seen.contains(req), "{name} requires unsatisfied {req}");
            }
            seen.extend(s.provides.iter().cloned());
        }
    }

    #[test]
    fn test_conflict_is_error() {
        let mut linter = skill("linter", &["lint_clean"], &[]);
        linter.conflicts = vec!["formatter".into()];
        let formatter = skill("formatter", &["formatted"], &[]);
        let p = profile("p", &["formatted", "lint_clean"], Strictness::Strict);
        let err = resolve(&p, &[linter, formatter]).unwrap_err();
        match err {
            Error::Conflict { skill, other } => {
                assert_eq!(skill, "linter");
                assert_eq!(other, "formatter");
            }
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_conflict_with_own_dependency_is_error() {
        // "top" is reachable only through "dep", which it conflicts with:
        // the chain would come out [dep, top]. The conflict surfaces even
        // though dep enters the chain during top's own dependency
        // resolution, not from a separate profile capability.
        let mut top = skill("top", &["a"], &["y"]);
        top.conflicts = vec!["dep".into()];
        let dep = skill("dep", &["y"], &[]);
        let p = profile("p", &["a"], Strictness::Strict);
        let err = resolve(&p, &[top, dep]).unwrap_err();
        match err {
            Error::Conflict { skill, other } => {
                assert_eq!(skill, "top");
                assert_eq!(other, "dep");
            }
            other => panic!("expected Conflict, got {other:?}"),
        }

        // Same shape with the conflict declared on the dependency side.
        let top = skill("top", &["a"], &["y"]);
        let mut dep = skill("dep", &["y"], &[]);
        dep.conflicts = vec!["top".into()];
        let err = resolve(&p, &[top, dep]).unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[test]
    fn test_unreachable_strict_errors() {
        let skills = vec![skill("a", &["x"], &[])];
        let p = profile("p", &["x", "ghost"], Strictness::Strict);
        let err = resolve(&p, &skills).unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
    }

    #[test]
    fn test_unreachable_advisory_warns() {
        let skills = vec![skill("a", &["x"], &[])];
        let p = profile("p", &["x", "ghost"], Strictness::Advisory);
        let resolution = resolve(&p, &skills).unwrap();
        assert_eq!(resolution.chain, vec!["a"]);
        assert!(resolution.warnings.iter().any(|w| w.contains("ghost")));
    }

    #[test]
    fn test_requirement_cycle_reported() {
        let skills = vec![
            skill("a", &["x"], &["y"]),
            skill("b", &["y"], &["x"]),
        ];
        let p = profile("p", &["x"], Strictness::Strict);
        let err = resolve(&p, &skills).unwrap_err();
        match err {
            Error::Resolution { message, .. } => assert!(message.contains("cycle")),
            other => panic!("expected Resolution, got {other:?}"),
        }
    }

    #[test]
    fn test_blocked_intents_first_writer_wins() {
        let mut first = skill("first", &["one"], &[]);
        first
            .tool_policy
            .deny_until
            .extend([deny(Intent::Commit, "one", "first says no")]);
        let mut second = skill("second", &["two"], &[]);
        second
            .tool_policy
            .deny_until
            .extend([deny(Intent::Commit, "two", "second says no")]);
        let p = profile("p", &["one", "two"], Strictness::Strict);
        let resolution = resolve(&p, &[first, second]).unwrap();
        assert_eq!(resolution.chain, vec!["first", "second"]);
        assert_eq!(
            resolution.blocked_intents.get(&Intent::Commit).unwrap(),
            "first says no"
        );
    }

    #[test]
    fn test_blocked_intents_closed_under_satisfaction() {
        let mut tdd = skill("tdd", &["test_written", "test_green"], &[]);
        tdd.tool_policy.deny_until.extend([
            deny(Intent::WriteImpl, "test_written", "write a test first"),
            deny(Intent::Commit, "test_green", "tests must pass"),
        ]);
        let skills = vec![tdd];
        let chain: Vec<&SkillDef> = skills.iter().collect();

        let empty = BTreeSet::new();
        let blocked = compute_blocked_intents(chain.iter().copied(), &empty);
        assert_eq!(blocked.len(), 2);

        // Any prefix of satisfactions leaves only entries whose `until` is
        // still unsatisfied.
        let partial: BTreeSet<String> = ["test_written".to_string()].into();
        let blocked = compute_blocked_intents(chain.iter().copied(), &partial);
        assert!(!blocked.contains_key(&Intent::WriteImpl));
        assert_eq!(blocked.get(&Intent::Commit).unwrap(), "tests must pass");

        let full: BTreeSet<String> =
            ["test_written".to_string(), "test_green".to_string()].into();
        assert!(compute_blocked_intents(chain.iter().copied(), &full).is_empty());
    }

    #[test]
    fn test_red_green_gate_resolution() {
        let mut tdd = skill("tdd", &["test_written", "test_green"], &[]);
        tdd.tool_policy
            .deny_until
            .extend([deny(Intent::WriteImpl, "test_written", "write a test first")]);
        let p = profile("bug-fix", &["test_written", "test_green"], Strictness::Strict);
        let resolution = resolve(&p, &[tdd]).unwrap();
        assert_eq!(resolution.chain, vec!["tdd"]);
        assert_eq!(
            resolution.blocked_intents.get(&Intent::WriteImpl).unwrap(),
            "write a test first"
        );
    }

    #[test]
    fn test_provided_never_required_warning() {
        let skills = vec![skill("a", &["x", "extra"], &[])];
        let p = profile("p", &["x"], Strictness::Strict);
        let resolution = resolve(&p, &skills).unwrap();
        assert!(resolution.warnings.iter().any(|w| w.contains("extra")));
    }
}
