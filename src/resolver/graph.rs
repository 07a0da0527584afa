use crate::config::SkillDef;
use std::collections::{BTreeSet, HashMap};

/// Index-based view of the skill corpus: skills as array slots, with
/// capability → provider and name → slot lookups.
pub struct SkillGraph<'a> {
    pub skills: Vec<&'a SkillDef>,
    pub by_name: HashMap<&'a str, usize>,
    pub providers: HashMap<&'a str, Vec<usize>>,
}

impl<'a> SkillGraph<'a> {
    pub fn build(skills: &'a [SkillDef]) -> Self {
        let mut by_name = HashMap::new();
        let mut providers: HashMap<&str, Vec<usize>> = HashMap::new();
        let refs: Vec<&SkillDef> = skills.iter().collect();
        for (idx, skill) in refs.iter().enumerate() {
            by_name.entry(skill.name.as_str()).or_insert(idx);
            for cap in &skill.provides {
                providers.entry(cap.as_str()).or_default().push(idx);
            }
        }
        Self {
            skills: refs,
            by_name,
            providers,
        }
    }

    pub fn providers_of(&self, capability: &str) -> &[usize] {
        self.providers
            .get(capability)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Transitive closure of capabilities reachable from `roots`: each
    /// capability pulls in the `requires` of every skill that could provide
    /// it. Over-approximates (all providers considered), which is what the
    /// relevance filter needs.
    pub fn requirement_closure(&self, roots: &[String]) -> BTreeSet<String> {
        let mut closed: BTreeSet<String> = BTreeSet::new();
        let mut frontier: Vec<String> = roots.to_vec();
        while let Some(cap) = frontier.pop() {
            if !closed.insert(cap.clone()) {
                continue;
            }
            for &idx in self.providers_of(&cap) {
                for req in &self.skills[idx].requires {
                    if !closed.contains(req) {
                        frontier.push(req.clone());
                    }
                }
            }
        }
        closed
    }

    /// Indices of skills providing at least one capability in `needed`.
    pub fn relevant_skills(&self, needed: &BTreeSet<String>) -> Vec<usize> {
        (0..self.skills.len())
            .filter(|&idx| {
                self.skills[idx]
                    .provides
                    .iter()
                    .any(|cap| needed.contains(cap))
            })
            .collect()
    }

    /// Three-colour DFS over the skill requirement graph (edge u → v when v
    /// provides a capability u requires). Returns the first cycle found as a
    /// list of skill names, or None.
    pub fn find_requirement_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Colour {
            White,
            Grey,
            Black,
        }

        fn visit(
            graph: &SkillGraph<'_>,
            node: usize,
            colours: &mut [Colour],
            stack: &mut Vec<usize>,
        ) -> Option<Vec<String>> {
            colours[node] = Colour::Grey;
            stack.push(node);
            for req in &graph.skills[node].requires {
                for &next in graph.providers_of(req) {
                    match colours[next] {
                        Colour::Grey => {
                            // Cycle: slice the stack from the first occurrence.
                            let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                            let mut cycle: Vec<String> = stack[start..]
                                .iter()
                                .map(|&n| graph.skills[n].name.clone())
                                .collect();
                            cycle.push(graph.skills[next].name.clone());
                            return Some(cycle);
                        }
                        Colour::White => {
                            if let Some(cycle) = visit(graph, next, colours, stack) {
                                return Some(cycle);
                            }
                        }
                        Colour::Black => {}
                    }
                }
            }
            stack.pop();
            colours[node] = Colour::Black;
            None
        }

        let mut colours = vec![Colour::White; self.skills.len()];
        let mut stack = Vec::new();
        for node in 0..self.skills.len() {
            if colours[node] == Colour::White {
                if let Some(cycle) = visit(self, node, &mut colours, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_fixtures::skill;

    #[test]
    fn test_providers_index() {
        let skills = vec![
            skill("a", &["x", "y"], &[]),
            skill("b", &["y"], &[]),
        ];
        let graph = SkillGraph::build(&skills);
        assert_eq!(graph.providers_of("x"), &[0]);
        assert_eq!(graph.providers_of("y"), &[0, 1]);
        assert!(graph.providers_of("z").is_empty());
    }

    #[test]
    fn test_requirement_closure() {
        let skills = vec![
            skill("top", &["goal"], &["mid"]),
            skill("middle", &["mid"], &["base"]),
            skill("bottom", &["base"], &[]),
        ];
        let graph = SkillGraph::build(&skills);
        let closure = graph.requirement_closure(&["goal".to_string()]);
        assert!(closure.contains("goal"));
        assert!(closure.contains("mid"));
        assert!(closure.contains("base"));
    }

    #[test]
    fn test_relevant_skills_filter() {
        let skills = vec![
            skill("wanted", &["goal"], &[]),
            skill("unrelated", &["other"], &[]),
        ];
        let graph = SkillGraph::build(&skills);
        let needed: BTreeSet<String> = ["goal".to_string()].into();
        assert_eq!(graph.relevant_skills(&needed), vec![0]);
    }

    #[test]
    fn test_no_cycle() {
        let skills = vec![
            skill("a", &["x"], &["y"]),
            skill("b", &["y"], &[]),
        ];
        let graph = SkillGraph::build(&skills);
        assert!(graph.find_requirement_cycle().is_none());
    }

    #[test]
    fn test_detects_cycle_with_names() {
        let skills = vec![
            skill("a", &["x"], &["y"]),
            skill("b", &["y"], &["x"]),
        ];
        let graph = SkillGraph::build(&skills);
        let cycle = graph.find_requirement_cycle().unwrap();
        assert!(cycle.contains(&"a".to_string()));
        assert!(cycle.contains(&"b".to_string()));
        // The reported walk closes on the node it started from.
        assert_eq!(cycle.first(), cycle.last());
    }

    #[test]
    fn test_self_cycle() {
        let skills = vec![skill("selfish", &["x"], &["x"])];
        let graph = SkillGraph::build(&skills);
        let cycle = graph.find_requirement_cycle().unwrap();
        assert_eq!(cycle, vec!["selfish".to_string(), "selfish".to_string()]);
    }
}
