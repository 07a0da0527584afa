use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The abstract operation a tool invocation would perform, decoupled from the
/// tool's name. Path-aware variants carry the classification of the touched
/// file; path-agnostic ones describe the action itself.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Write,
    Edit,
    Read,
    Run,
    Commit,
    Push,
    Deploy,
    Delete,
    WriteTest,
    WriteImpl,
    WriteDocs,
    WriteConfig,
    EditTest,
    EditImpl,
    EditDocs,
    EditConfig,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Write => "write",
            Intent::Edit => "edit",
            Intent::Read => "read",
            Intent::Run => "run",
            Intent::Commit => "commit",
            Intent::Push => "push",
            Intent::Deploy => "deploy",
            Intent::Delete => "delete",
            Intent::WriteTest => "write_test",
            Intent::WriteImpl => "write_impl",
            Intent::WriteDocs => "write_docs",
            Intent::WriteConfig => "write_config",
            Intent::EditTest => "edit_test",
            Intent::EditImpl => "edit_impl",
            Intent::EditDocs => "edit_docs",
            Intent::EditConfig => "edit_config",
        }
    }

    /// Intents that advisory strictness still blocks.
    pub fn is_high_impact(&self) -> bool {
        matches!(
            self,
            Intent::WriteImpl | Intent::Commit | Intent::Push | Intent::Deploy | Intent::Delete
        )
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a written/edited path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathClass {
    Test,
    Docs,
    Config,
    Impl,
}

/// A tool call as seen by the pre-tool-use hook. The recognised set is
/// closed; anything else lands in `Unknown` and maps to no intents.
#[derive(Debug, Clone)]
pub enum ToolInvocation {
    Write { path: Option<String> },
    Edit { path: Option<String> },
    Read,
    Bash { command: String },
    Unknown { name: String, raw: serde_json::Value },
}

impl ToolInvocation {
    /// Parse the hook's `--tool` JSON: `{"tool": "...", "input": {...}}`.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let name = value
            .get("tool")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let input = value.get("input").cloned().unwrap_or(serde_json::Value::Null);

        match name.as_str() {
            "Write" => ToolInvocation::Write {
                path: path_arg(&input),
            },
            "Edit" | "MultiEdit" => ToolInvocation::Edit {
                path: path_arg(&input),
            },
            "Read" | "Glob" | "Grep" => ToolInvocation::Read,
            "Bash" => ToolInvocation::Bash {
                command: input
                    .get("command")
                    .or_else(|| input.get("cmd"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
            },
            _ => ToolInvocation::Unknown { name, raw: input },
        }
    }
}

fn path_arg(input: &serde_json::Value) -> Option<String> {
    input
        .get("path")
        .or_else(|| input.get("file_path"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Map a tool invocation to the set of intents it would exercise.
pub fn map_invocation(invocation: &ToolInvocation) -> BTreeSet<Intent> {
    let mut intents = BTreeSet::new();
    match invocation {
        ToolInvocation::Write { path } => {
            intents.insert(Intent::Write);
            if let Some(p) = path {
                intents.insert(write_intent_for(classify_path(p)));
            }
        }
        ToolInvocation::Edit { path } => {
            intents.insert(Intent::Edit);
            if let Some(p) = path {
                intents.insert(edit_intent_for(classify_path(p)));
            }
        }
        ToolInvocation::Read => {}
        ToolInvocation::Bash { command } => {
            intents.extend(intents_from_command(command));
        }
        ToolInvocation::Unknown { .. } => {}
    }
    intents
}

fn write_intent_for(class: PathClass) -> Intent {
    match class {
        PathClass::Test => Intent::WriteTest,
        PathClass::Docs => Intent::WriteDocs,
        PathClass::Config => Intent::WriteConfig,
        PathClass::Impl => Intent::WriteImpl,
    }
}

fn edit_intent_for(class: PathClass) -> Intent {
    match class {
        PathClass::Test => Intent::EditTest,
        PathClass::Docs => Intent::EditDocs,
        PathClass::Config => Intent::EditConfig,
        PathClass::Impl => Intent::EditImpl,
    }
}

/// Classify a file path into test/docs/config/impl. Ordered rules, first
/// match wins; case-insensitive; forward and backward separators treated
/// alike.
pub fn classify_path(path: &str) -> PathClass {
    let normalized = path.to_ascii_lowercase().replace('\\', "/");
    let file_name = normalized.rsplit('/').next().unwrap_or("").to_string();
    let stem = file_name.split('.').next().unwrap_or("");

    // Test patterns
    if in_dir(&normalized, "tests")
        || in_dir(&normalized, "test")
        || in_dir(&normalized, "__tests__")
        || file_name.contains(".test.")
        || file_name.contains(".spec.")
        || file_name.contains("_test.")
        || (file_name.starts_with("test_") && file_name.ends_with(".py"))
    {
        return PathClass::Test;
    }

    // Docs patterns
    if in_dir(&normalized, "docs")
        || has_ext(&file_name, &["md", "mdx", "rst", "txt"])
        || matches!(stem, "readme" | "changelog" | "license")
    {
        return PathClass::Docs;
    }

    // Config patterns
    if has_ext(&file_name, &["json", "yaml", "yml", "toml", "lock"])
        || file_name.starts_with(".env")
        || file_name.ends_with("rc")
        || file_name.contains(".config.")
        || file_name.starts_with("tsconfig")
        || matches!(file_name.as_str(), "dockerfile" | "makefile")
    {
        return PathClass::Config;
    }

    PathClass::Impl
}

fn in_dir(normalized: &str, dir: &str) -> bool {
    normalized.starts_with(&format!("{dir}/")) || normalized.contains(&format!("/{dir}/"))
}

fn has_ext(file_name: &str, exts: &[&str]) -> bool {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| exts.contains(&ext))
        .unwrap_or(false)
}

/// Scan a shell command against a fixed lexicon. Multiple intents may fire
/// for a compound command line.
pub fn intents_from_command(command: &str) -> BTreeSet<Intent> {
    let mut intents = BTreeSet::new();
    let cmd = command.to_ascii_lowercase();

    if cmd.contains("git commit") {
        intents.insert(Intent::Commit);
    }
    if cmd.contains("git push --delete") || contains_branch_force_delete(command) {
        intents.insert(Intent::Delete);
    }
    if cmd.contains("git push") {
        intents.insert(Intent::Push);
    }
    if cmd.contains("npm publish")
        || cmd.contains("cargo publish")
        || cmd.contains("yarn publish")
        || cmd.contains("deploy")
    {
        intents.insert(Intent::Deploy);
    }
    if is_recursive_rm(&cmd) {
        intents.insert(Intent::Delete);
    }
    if cmd.contains('>') || cmd.contains("| tee") || cmd.contains("mkdir") || cmd.contains("touch")
    {
        intents.insert(Intent::Write);
    }

    intents
}

// `git branch -D` is force-delete; the flag is case-sensitive.
fn contains_branch_force_delete(command: &str) -> bool {
    command.contains("git branch -D")
}

fn is_recursive_rm(cmd: &str) -> bool {
    cmd.split(&['&', '|', ';'][..]).any(|part| {
        let mut words = part.split_whitespace();
        if words.next() != Some("rm") {
            return false;
        }
        words.any(|w| {
            w.starts_with('-') && (w.contains('r') || w.contains('R')) && !w.starts_with("--")
                || w == "--recursive"
        })
    })
}
