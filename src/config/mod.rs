use crate::errors::{Error, Result, ValidationIssue};
use crate::intent::Intent;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub const SKILLS_FILE: &str = "skills.yaml";
pub const PROFILES_FILE: &str = "profiles.yaml";
const SCHEMA_VERSION: &str = "1.0";

/// Ordinal risk/cost tier, used as a secondary sort key during resolution.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Low,
    Medium,
    High,
}

/// Enforcement regime for a profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    Strict,
    #[default]
    Advisory,
    Permissive,
}

/// Evidence predicate kind, shared by skill artifacts, profile completion
/// requirements and session evidence records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    FileExists,
    MarkerFound,
    CommandSuccess,
    Manual,
}

/// A declarative evidence predicate. `pattern` is a glob for `file_exists`
/// and a regex for `marker_found`; `path` names the file to scan for
/// `marker_found`; `command` is the shell line for `command_success`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidencePredicate {
    #[serde(rename = "type")]
    pub kind: EvidenceKind,
    #[serde(default)]
    pub capability: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default = "default_exit_code")]
    pub expected_exit: i32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_exit_code() -> i32 {
    0
}

fn default_timeout_secs() -> u64 {
    30
}

impl EvidencePredicate {
    /// Short human form for denial and validation output.
    pub fn describe(&self) -> String {
        match self.kind {
            EvidenceKind::FileExists => format!(
                "file_exists({})",
                self.pattern.as_deref().unwrap_or("<missing pattern>")
            ),
            EvidenceKind::MarkerFound => format!(
                "marker_found({} in {})",
                self.pattern.as_deref().unwrap_or("<missing pattern>"),
                self.path.as_deref().unwrap_or("<missing path>")
            ),
            EvidenceKind::CommandSuccess => format!(
                "command_success({})",
                self.command.as_deref().unwrap_or("<missing command>")
            ),
            EvidenceKind::Manual => format!(
                "manual({})",
                self.capability.as_deref().unwrap_or("<missing capability>")
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenyRule {
    pub until: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPolicy {
    #[serde(default)]
    pub deny_until: BTreeMap<Intent, DenyRule>,
}

/// A declared skill: a named capability bundle with dependency, conflict and
/// intent deny metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillDef {
    pub name: String,
    #[serde(default)]
    pub skill_path: Option<String>,
    #[serde(default)]
    pub provides: Vec<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub risk: Tier,
    #[serde(default)]
    pub cost: Tier,
    #[serde(default)]
    pub artifacts: Vec<EvidencePredicate>,
    #[serde(default)]
    pub tool_policy: ToolPolicy,
}

impl SkillDef {
    /// The capability a given artifact evidences: its explicit `capability`,
    /// falling back to the skill's sole `provides` entry.
    pub fn artifact_capability<'a>(&'a self, artifact: &'a EvidencePredicate) -> Option<&'a str> {
        artifact
            .capability
            .as_deref()
            .or_else(|| match self.provides.as_slice() {
                [only] => Some(only.as_str()),
                _ => None,
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillsFile {
    pub version: String,
    #[serde(default)]
    pub skills: Vec<SkillDef>,
}

/// A workflow definition: required capabilities, strictness, completion
/// criteria, and fast-matching substrings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "match")]
    pub match_patterns: Vec<String>,
    #[serde(default)]
    pub capabilities_required: Vec<String>,
    #[serde(default)]
    pub strictness: Strictness,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub completion_requirements: Vec<EvidencePredicate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilesFile {
    pub version: String,
    #[serde(default)]
    pub default_profile: Option<String>,
    #[serde(default)]
    pub profiles: Vec<ProfileDef>,
}

impl ProfilesFile {
    pub fn find(&self, name: &str) -> Option<&ProfileDef> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Substring match against each profile's `match` patterns. Among the
    /// profiles that hit, the highest priority wins; ties break on name for
    /// determinism.
    pub fn match_query(&self, query: &str) -> Option<&ProfileDef> {
        let q = query.to_ascii_lowercase();
        self.profiles
            .iter()
            .filter(|p| {
                p.match_patterns
                    .iter()
                    .any(|pat| !pat.is_empty() && q.contains(&pat.to_ascii_lowercase()))
            })
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.name.cmp(&a.name))
            })
    }
}

pub fn load_skills(path: &Path) -> Result<SkillsFile> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::config(path.display().to_string(), e))?;
    let file: SkillsFile = serde_yml::from_str(&content)
        .map_err(|e| Error::config(path.display().to_string(), e))?;
    Ok(file)
}

pub fn load_profiles(path: &Path) -> Result<ProfilesFile> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::config(path.display().to_string(), e))?;
    let file: ProfilesFile = serde_yml::from_str(&content)
        .map_err(|e| Error::config(path.display().to_string(), e))?;
    Ok(file)
}

/// Cross-validate the config pair. Every capability referenced by any profile
/// or any skill's `requires` must be provided by at least one skill; the
/// default profile must exist; `conflicts` must name known skills.
pub fn validate(skills: &SkillsFile, profiles: &ProfilesFile) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    for (file, version) in [
        (SKILLS_FILE, &skills.version),
        (PROFILES_FILE, &profiles.version),
    ] {
        if version != SCHEMA_VERSION {
            issues.push(ValidationIssue {
                file: file.to_string(),
                path: "version".to_string(),
                message: format!("unsupported schema version '{version}', expected '{SCHEMA_VERSION}'"),
            });
        }
    }

    let mut names = BTreeSet::new();
    let mut provided = BTreeSet::new();
    for skill in &skills.skills {
        if !names.insert(skill.name.as_str()) {
            issues.push(ValidationIssue {
                file: SKILLS_FILE.to_string(),
                path: format!("skills.{}", skill.name),
                message: "duplicate skill name".to_string(),
            });
        }
        provided.extend(skill.provides.iter().map(|c| c.as_str()));
    }

    for skill in &skills.skills {
        for req in &skill.requires {
            if !provided.contains(req.as_str()) {
                issues.push(ValidationIssue {
                    file: SKILLS_FILE.to_string(),
                    path: format!("skills.{}.requires", skill.name),
                    message: format!("capability '{req}' is not provided by any skill"),
                });
            }
        }
        for conflict in &skill.conflicts {
            if !names.contains(conflict.as_str()) {
                issues.push(ValidationIssue {
                    file: SKILLS_FILE.to_string(),
                    path: format!("skills.{}.conflicts", skill.name),
                    message: format!("unknown skill '{conflict}'"),
                });
            }
        }
        for rule in skill.tool_policy.deny_until.values() {
            if !skill.provides.contains(&rule.until) && !provided.contains(rule.until.as_str()) {
                issues.push(ValidationIssue {
                    file: SKILLS_FILE.to_string(),
                    path: format!("skills.{}.tool_policy", skill.name),
                    message: format!("deny_until capability '{}' is never provided", rule.until),
                });
            }
        }
        if skill.provides.len() > 1 {
            for artifact in &skill.artifacts {
                if artifact.capability.is_none() {
                    issues.push(ValidationIssue {
                        file: SKILLS_FILE.to_string(),
                        path: format!("skills.{}.artifacts", skill.name),
                        message: "artifact needs an explicit 'capability' when the skill provides more than one".to_string(),
                    });
                }
            }
        }
    }

    for profile in &profiles.profiles {
        for cap in &profile.capabilities_required {
            if !provided.contains(cap.as_str()) {
                issues.push(ValidationIssue {
                    file: PROFILES_FILE.to_string(),
                    path: format!("profiles.{}.capabilities_required", profile.name),
                    message: format!("capability '{cap}' is not provided by any skill"),
                });
            }
        }
    }

    if let Some(default) = &profiles.default_profile {
        if profiles.find(default).is_none() {
            issues.push(ValidationIssue {
                file: PROFILES_FILE.to_string(),
                path: "default_profile".to_string(),
                message: format!("default profile '{default}' is not defined"),
            });
        }
    }

    issues
}
