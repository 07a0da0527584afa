use crate::router::{RouteMode, RoutingResult};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::debug;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Lifecycle of one corrected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiddlewareState {
    Idle,
    Initialized,
    AwaitingResponse,
    Accepted,
    Rejected,
    Exhausted,
}

/// Verdict on one agent response.
#[derive(Debug, Clone)]
pub enum Decision {
    Accepted {
        found: Vec<String>,
    },
    Retry {
        missing: Vec<String>,
        reason: String,
        corrective_prompt: String,
        attempt: u32,
    },
    Exhausted {
        reason: String,
    },
}

/// Sits between the router and the agent: requires skill invocations for
/// `immediate` routes, recommends them for `suggestion`, and retries
/// non-compliant responses with a corrective prompt, up to a bound.
///
/// Skill-call detection is regex-based and best-effort; a structured JSON
/// protocol response is recognised first when the agent emits one.
#[derive(Debug)]
pub struct CorrectiveMiddleware {
    mode: RouteMode,
    required_tools: Vec<String>,
    retry_count: u32,
    max_retries: u32,
    original_prompt: Option<String>,
    state: MiddlewareState,
}

impl CorrectiveMiddleware {
    /// Thresholds per mode: `immediate` requires skills scoring at least
    /// `min(0.70, top · 0.7)`; `suggestion` recommends at
    /// `min(0.50, top · 0.5)`; `chat` requires nothing.
    pub fn from_routing(routing: &RoutingResult, max_retries: u32) -> Self {
        let top = routing.top_score();
        let required_tools = match routing.mode {
            RouteMode::Immediate => select_tools(routing, (0.70f32).min(top * 0.7)),
            RouteMode::Suggestion => select_tools(routing, (0.50f32).min(top * 0.5)),
            RouteMode::Chat => Vec::new(),
        };
        Self {
            mode: routing.mode,
            required_tools,
            retry_count: 0,
            max_retries,
            original_prompt: None,
            state: MiddlewareState::Initialized,
        }
    }

    /// Hook mode: state arrives via `REQUIRED_SKILLS`, `SUGGESTED_SKILLS`,
    /// `MAX_RETRIES` and `ATTEMPT_NUMBER`.
    pub fn from_env() -> Self {
        let required = env_list("REQUIRED_SKILLS");
        let suggested = env_list("SUGGESTED_SKILLS");
        let (mode, required_tools, state) = if !required.is_empty() {
            (RouteMode::Immediate, required, MiddlewareState::Initialized)
        } else if !suggested.is_empty() {
            (RouteMode::Suggestion, suggested, MiddlewareState::Initialized)
        } else {
            // No middleware env at all: the machine has not been initialized.
            (RouteMode::Chat, Vec::new(), MiddlewareState::Idle)
        };
        let max_retries = std::env::var("MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_RETRIES);
        let retry_count = std::env::var("ATTEMPT_NUMBER")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .map(|n| n.saturating_sub(1))
            .unwrap_or(0);
        Self {
            mode,
            required_tools,
            retry_count,
            max_retries,
            original_prompt: None,
            state,
        }
    }

    pub fn state(&self) -> MiddlewareState {
        self.state
    }

    pub fn mode(&self) -> RouteMode {
        self.mode
    }

    pub fn required_tools(&self) -> &[String] {
        &self.required_tools
    }

    pub fn attempt(&self) -> u32 {
        self.retry_count + 1
    }

    /// Prefix the outgoing prompt per mode and move to awaiting-response.
    pub fn augment_prompt(&mut self, prompt: &str) -> String {
        self.original_prompt = Some(prompt.to_string());
        self.state = MiddlewareState::AwaitingResponse;
        if self.required_tools.is_empty() {
            return prompt.to_string();
        }
        let list = self.required_tools.join(", ");
        match self.mode {
            RouteMode::Immediate => format!(
                "[MUST_CALL: Skill({list})] You must invoke the listed skill(s) before anything else.\n\n{prompt}"
            ),
            RouteMode::Suggestion => {
                format!("[CONSIDER_CALLING: Skill({list})]\n\n{prompt}")
            }
            RouteMode::Chat => prompt.to_string(),
        }
    }

    /// Judge the agent's response: chat and suggestion always accept;
    /// immediate accepts iff every required tool was invoked.
    pub fn process_response(&mut self, response: &str) -> Decision {
        let found = detect_invocations(response);
        debug!(?found, mode = %self.mode, "skill invocations detected");

        if self.mode != RouteMode::Immediate {
            self.state = MiddlewareState::Accepted;
            return Decision::Accepted { found };
        }

        let missing: Vec<String> = self
            .required_tools
            .iter()
            .filter(|t| !found.contains(t))
            .cloned()
            .collect();
        if missing.is_empty() {
            self.state = MiddlewareState::Accepted;
            return Decision::Accepted { found };
        }

        let attempt = self.attempt();
        let reason = format!(
            "COMPLIANCE ERROR: You MUST call Skill({}). Attempt {}/{}",
            missing.join(", "),
            attempt,
            self.max_retries
        );

        self.state = MiddlewareState::Rejected;
        if self.retry_count >= self.max_retries {
            self.state = MiddlewareState::Exhausted;
            return Decision::Exhausted { reason };
        }

        self.retry_count += 1;
        self.state = MiddlewareState::AwaitingResponse;
        let original = self.original_prompt.as_deref().unwrap_or("");
        Decision::Retry {
            missing,
            corrective_prompt: format!("{reason}\n\n{original}"),
            reason,
            attempt: self.retry_count + 1,
        }
    }
}

fn select_tools(routing: &RoutingResult, threshold: f32) -> Vec<String> {
    routing
        .matches
        .iter()
        .filter(|m| m.score >= threshold && m.score > 0.0)
        .map(|m| m.skill_name.clone())
        .collect()
}

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Shape of a structured invocation message.
#[derive(Deserialize)]
struct StructuredInvocation {
    action: String,
    skill: String,
}

/// Extract skill invocations from agent text. The structured JSON protocol
/// (the whole response is `{action:"invoke_skill", skill}` or an array of
/// them) is checked first; otherwise the `Skill(...)` call forms are scanned.
/// Results are deduplicated in order of first appearance.
pub fn detect_invocations(response: &str) -> Vec<String> {
    let trimmed = response.trim();
    if let Ok(one) = serde_json::from_str::<StructuredInvocation>(trimmed) {
        if one.action == "invoke_skill" {
            return vec![one.skill];
        }
    }
    if let Ok(many) = serde_json::from_str::<Vec<StructuredInvocation>>(trimmed) {
        let mut names = Vec::new();
        for inv in many {
            if inv.action == "invoke_skill" && !names.contains(&inv.skill) {
                names.push(inv.skill);
            }
        }
        if !names.is_empty() {
            return names;
        }
    }

    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        vec![
            Regex::new(r#"Skill\(\s*"([^"]+)"\s*\)"#).unwrap(),
            Regex::new(r#"Skill\(\s*'([^']+)'\s*\)"#).unwrap(),
            Regex::new(r"Skill\(\s*([A-Za-z0-9][A-Za-z0-9_-]*)\s*\)").unwrap(),
        ]
    });

    let mut names = Vec::new();
    for pattern in patterns.iter() {
        for capture in pattern.captures_iter(response) {
            let name = capture[1].to_string();
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::SkillMatch;

    fn routing(mode: RouteMode, scores: &[(&str, f32)]) -> RoutingResult {
        RoutingResult {
            query: "q".into(),
            mode,
            matches: scores
                .iter()
                .map(|(name, score)| SkillMatch {
                    skill_name: name.to_string(),
                    score: *score,
                    matched_patterns: vec![],
                })
                .collect(),
            signals: vec![],
            processing_time_ms: 0,
        }
    }

    #[test]
    fn test_detect_double_and_single_quotes() {
        assert_eq!(detect_invocations(r#"calling Skill("tdd") now"#), vec!["tdd"]);
        assert_eq!(detect_invocations("calling Skill('tdd') now"), vec!["tdd"]);
    }

    #[test]
    fn test_detect_bare_and_kebab() {
        assert_eq!(detect_invocations("Skill(tdd)"), vec!["tdd"]);
        assert_eq!(
            detect_invocations("Skill(code-review) then Skill(tdd)"),
            vec!["code-review", "tdd"]
        );
    }

    #[test]
    fn test_detect_structured_json() {
        assert_eq!(
            detect_invocations(r#"{"action": "invoke_skill", "skill": "tdd"}"#),
            vec!["tdd"]
        );
        assert_eq!(
            detect_invocations(
                r#"[{"action":"invoke_skill","skill":"tdd"},{"action":"invoke_skill","skill":"lint"}]"#
            ),
            vec!["tdd", "lint"]
        );
        // Wrong action is not an invocation.
        assert!(detect_invocations(r#"{"action": "noop", "skill": "tdd"}"#).is_empty());
    }

    #[test]
    fn test_detect_dedupes() {
        assert_eq!(
            detect_invocations(r#"Skill("tdd") and again Skill('tdd') and Skill(tdd)"#),
            vec!["tdd"]
        );
    }

    #[test]
    fn test_detect_nothing_in_prose() {
        assert!(detect_invocations("I'll just start implementing now.").is_empty());
    }

    #[test]
    fn test_required_tools_thresholds() {
        // immediate: min(0.70, 0.9*0.7=0.63) = 0.63 → both pass.
        let m = CorrectiveMiddleware::from_routing(
            &routing(RouteMode::Immediate, &[("tdd", 0.9), ("lint", 0.65), ("docs", 0.2)]),
            2,
        );
        assert_eq!(m.required_tools(), ["tdd", "lint"]);

        // suggestion: min(0.50, 0.8*0.5=0.40) → 0.45 passes.
        let m = CorrectiveMiddleware::from_routing(
            &routing(RouteMode::Suggestion, &[("tdd", 0.8), ("lint", 0.45), ("docs", 0.1)]),
            2,
        );
        assert_eq!(m.required_tools(), ["tdd", "lint"]);

        let m = CorrectiveMiddleware::from_routing(&routing(RouteMode::Chat, &[("tdd", 0.9)]), 2);
        assert!(m.required_tools().is_empty());
    }

    #[test]
    fn test_augment_prompt_prefixes() {
        let mut m = CorrectiveMiddleware::from_routing(
            &routing(RouteMode::Immediate, &[("tdd", 0.9)]),
            2,
        );
        let prompt = m.augment_prompt("fix the bug");
        assert!(prompt.starts_with("[MUST_CALL: Skill(tdd)]"));
        assert!(prompt.ends_with("fix the bug"));
        assert_eq!(m.state(), MiddlewareState::AwaitingResponse);

        let mut m = CorrectiveMiddleware::from_routing(
            &routing(RouteMode::Suggestion, &[("tdd", 0.8)]),
            2,
        );
        assert!(m.augment_prompt("fix").starts_with("[CONSIDER_CALLING: Skill(tdd)]"));

        let mut m = CorrectiveMiddleware::from_routing(&routing(RouteMode::Chat, &[]), 2);
        assert_eq!(m.augment_prompt("hello"), "hello");
    }

    #[test]
    fn test_immediate_accepts_iff_required_subset_found() {
        let mut m = CorrectiveMiddleware::from_routing(
            &routing(RouteMode::Immediate, &[("tdd", 0.9)]),
            2,
        );
        m.augment_prompt("fix");
        match m.process_response(r#"Skill("tdd") then proceed"#) {
            Decision::Accepted { found } => assert_eq!(found, vec!["tdd"]),
            other => panic!("expected accept, got {other:?}"),
        }
        assert_eq!(m.state(), MiddlewareState::Accepted);
    }

    #[test]
    fn test_suggestion_always_accepts() {
        let mut m = CorrectiveMiddleware::from_routing(
            &routing(RouteMode::Suggestion, &[("tdd", 0.8)]),
            2,
        );
        m.augment_prompt("fix");
        assert!(matches!(
            m.process_response("just implementing"),
            Decision::Accepted { .. }
        ));
    }

    #[test]
    fn test_retry_then_accept_on_third_attempt() {
        let mut m = CorrectiveMiddleware::from_routing(
            &routing(RouteMode::Immediate, &[("tdd", 0.9)]),
            2,
        );
        m.augment_prompt("fix the bug");

        let first = m.process_response("implementing…");
        let Decision::Retry {
            missing,
            reason,
            corrective_prompt,
            attempt,
        } = first
        else {
            panic!("expected retry");
        };
        assert_eq!(missing, vec!["tdd"]);
        assert_eq!(reason, "COMPLIANCE ERROR: You MUST call Skill(tdd). Attempt 1/2");
        assert!(corrective_prompt.contains("fix the bug"));
        assert_eq!(attempt, 2);

        let second = m.process_response("writing code…");
        assert!(matches!(second, Decision::Retry { attempt: 3, .. }));

        let third = m.process_response(r#"Skill("tdd") then proceed"#);
        assert!(matches!(third, Decision::Accepted { .. }));
    }

    #[test]
    fn test_retry_exhausted() {
        let mut m = CorrectiveMiddleware::from_routing(
            &routing(RouteMode::Immediate, &[("tdd", 0.9)]),
            2,
        );
        m.augment_prompt("fix");
        assert!(matches!(m.process_response("nope"), Decision::Retry { .. }));
        assert!(matches!(m.process_response("nope"), Decision::Retry { .. }));
        let last = m.process_response("nope");
        let Decision::Exhausted { reason } = last else {
            panic!("expected exhausted");
        };
        assert!(reason.contains("Attempt 3/2"));
        assert_eq!(m.state(), MiddlewareState::Exhausted);
    }
}
