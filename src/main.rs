mod activator;
mod cache;
mod config;
#[allow(dead_code)]
mod enforcer;
mod errors;
mod evidence;
mod hooks;
mod intent;
mod logging;
mod middleware;
mod paths;
mod resolver;
mod router;
mod session;

use activator::{ChainActivator, RouteDecision};
use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use config::{ProfilesFile, SkillsFile};
use hooks::{pre_tool_use::PreToolUseHook, stop::StopHook};
use intent::ToolInvocation;
use middleware::CorrectiveMiddleware;
use router::{RouteMode, RouterConfig, SemanticRouter};
use session::{mint_session_id, SessionStore};
use std::io::Read;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sgate", version)]
#[command(about = "Skillgate: workflow enforcement for coding agents", long_about = None)]
struct Cli {
    /// Workspace root. If omitted, detects by walking up for .git.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Log level for the file log (error/warn/info/debug/trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Also log to stdout (never set for hook commands)
    #[arg(long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Route a prompt read from stdin ({"prompt": "...", "sessionId"?}) and
    /// activate the matching workflow
    Route {
        /// Emit machine-readable JSON instead of the activation block
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Activate a workflow profile by name
    Activate {
        /// Profile name
        profile: String,

        /// Idempotency key; repeated activations with the same id reuse the
        /// session
        #[arg(long)]
        request_id: Option<String>,
    },
    /// Pre-tool-use hook: allow or deny a tool call
    PreToolUse {
        /// Tool invocation JSON: {"tool": "...", "input": {...}}
        #[arg(long)]
        tool: String,
    },
    /// Stop hook: allow or deny session termination
    Stop,
    /// Show the current session
    Status,
    /// Show the next required capability and skill
    Next {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Drop the current session pointer (session files are kept)
    Clear {
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Validate skills.yaml, profiles.yaml and the vector store
    Validate,
    /// List persisted sessions, newest first
    Sessions,
    /// Middleware hook mode: judge an agent response read from stdin against
    /// REQUIRED_SKILLS / SUGGESTED_SKILLS / MAX_RETRIES / ATTEMPT_NUMBER
    Guard {
        /// Instead of judging a response, print the augmented prompt for the
        /// given text
        #[arg(long)]
        augment: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let _ = logging::setup_tracing(cli.log_level.as_deref(), cli.verbose);
    let ws_root = paths::resolve_workspace_root(cli.root.clone())?;
    let store = SessionStore::new(&ws_root);

    match cli.cmd {
        Command::Route { json } => cmd_route(&ws_root, &store, json).await,
        Command::Activate {
            profile,
            request_id,
        } => cmd_activate(&ws_root, &store, &profile, request_id),
        Command::PreToolUse { tool } => cmd_pre_tool_use(&ws_root, &store, &tool).await,
        Command::Stop => cmd_stop(&ws_root, &store).await,
        Command::Status => cmd_status(&store),
        Command::Next { json } => cmd_next(&ws_root, &store, json),
        Command::Clear { force } => cmd_clear(&store, force),
        Command::Validate => cmd_validate(&ws_root),
        Command::Sessions => cmd_sessions(&store),
        Command::Guard { augment } => cmd_guard(augment),
    }
}

/// Env-driven corrective middleware. Accepted responses exit 0; rejected
/// ones exit 1 with the corrective prompt on stdout and the reason on
/// stderr; exhausted retries surface as `RetryExhausted`.
fn cmd_guard(augment: Option<String>) -> Result<i32> {
    let mut mw = CorrectiveMiddleware::from_env();
    tracing::debug!(mode = %mw.mode(), state = ?mw.state(), "guard invoked");

    if let Some(prompt) = augment {
        println!("{}", mw.augment_prompt(&prompt));
        return Ok(0);
    }

    let mut response = String::new();
    std::io::stdin()
        .read_to_string(&mut response)
        .context("reading agent response from stdin")?;

    // The original prompt is unavailable in hook mode; the corrective prompt
    // degenerates to the rejection reason alone.
    mw.augment_prompt("");
    match mw.process_response(&response) {
        middleware::Decision::Accepted { found } => {
            if !found.is_empty() {
                println!("invoked: {}", found.join(", "));
            }
            Ok(0)
        }
        middleware::Decision::Retry {
            reason,
            corrective_prompt,
            ..
        } => {
            eprintln!("{reason}");
            println!("{}", corrective_prompt.trim_end());
            Ok(1)
        }
        middleware::Decision::Exhausted { reason } => Err(errors::Error::RetryExhausted {
            attempts: mw.attempt(),
            reason,
        }
        .into()),
    }
}

/// Load the config pair. Hooks tolerate a missing pair (enforcement then
/// relies on the persisted session alone); activation paths require it.
fn load_configs(ws_root: &std::path::Path) -> Result<Option<(SkillsFile, ProfilesFile)>> {
    let Some(skills_path) = paths::find_config_file(ws_root, config::SKILLS_FILE) else {
        return Ok(None);
    };
    let Some(profiles_path) = paths::find_config_file(ws_root, config::PROFILES_FILE) else {
        return Ok(None);
    };
    let skills = config::load_skills(&skills_path)?;
    let profiles = config::load_profiles(&profiles_path)?;
    Ok(Some((skills, profiles)))
}

fn require_configs(ws_root: &std::path::Path) -> Result<(SkillsFile, ProfilesFile)> {
    load_configs(ws_root)?.with_context(|| {
        format!(
            "missing {} / {} (looked in {} and {})",
            config::SKILLS_FILE,
            config::PROFILES_FILE,
            paths::workspace_state_dir(ws_root).display(),
            paths::global_config_dir().display()
        )
    })
}

fn fail_on_validation(skills: &SkillsFile, profiles: &ProfilesFile) -> Result<()> {
    let issues = config::validate(skills, profiles);
    if issues.is_empty() {
        return Ok(());
    }
    let report: Vec<String> = issues.iter().map(|i| i.to_string()).collect();
    Err(errors::Error::Validation { issues })
        .with_context(|| format!("invalid configuration:\n  {}", report.join("\n  ")))
}

#[derive(serde::Deserialize)]
struct RouteInput {
    prompt: String,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn cmd_route(
    ws_root: &std::path::Path,
    store: &SessionStore,
    json: bool,
) -> Result<i32> {
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("reading stdin")?;
    let input: RouteInput = serde_json::from_str(raw.trim())
        .context("stdin must be {\"prompt\": \"...\", \"sessionId\"?: \"...\"}")?;

    let (skills, profiles) = require_configs(ws_root)?;
    fail_on_validation(&skills, &profiles)?;

    let vs_path = paths::vector_store_path(ws_root);
    let vector_store = router::store::VectorStore::load(&vs_path)?;
    let dimension = vector_store.dimension();
    let semantic_router = SemanticRouter::initialize(
        vector_store,
        Box::new(router::embedding::HashEmbedder::new(dimension)),
        RouterConfig::from_env(),
    )?;

    let routing = semantic_router.route(&input.prompt)?;
    let corrective = CorrectiveMiddleware::from_routing(&routing, middleware::DEFAULT_MAX_RETRIES);
    let required: Vec<&str> = corrective
        .required_tools()
        .iter()
        .map(|s| s.as_str())
        .collect();

    let decision = RouteDecision {
        request_id: input
            .session_id
            .clone()
            .unwrap_or_else(|| mint_session_id(Utc::now())),
        query: input.prompt.clone(),
        mode: routing.mode,
        candidates: routing.matches.clone(),
        selected_profile: None,
        session_id: input.session_id,
        decided_at: Utc::now(),
    };
    let activator = ChainActivator::new(store, &skills.skills, &profiles);
    let activation = activator.activate(&decision)?;

    if json {
        let out = serde_json::json!({
            "mode": routing.mode,
            "requiredSkills": required,
            "topScore": routing.top_score(),
            "processingTimeMs": routing.processing_time_ms,
        });
        println!("{}", serde_json::to_string(&out)?);
        return Ok(0);
    }

    println!(
        "Routing: {} (top score {:.2}, {}ms)",
        routing.mode,
        routing.top_score(),
        routing.processing_time_ms
    );
    for (rank, m) in routing.matches.iter().take(5).enumerate() {
        let patterns = if m.matched_patterns.is_empty() {
            String::new()
        } else {
            format!("  [{}]", m.matched_patterns.join(", "))
        };
        println!("  {}. {:<24} {:.2}{}", rank + 1, m.skill_name, m.score, patterns);
    }
    if !required.is_empty() {
        println!("Required skills: {}", required.join(", "));
    }
    match (&activation.session_id, &activation.reason, &activation.error) {
        (Some(id), _, _) => {
            println!(
                "Activated session {} (profile {})",
                id,
                activation.profile_id.as_deref().unwrap_or("?")
            );
            if !activation.chain.is_empty() {
                println!("  chain: {}", activation.chain.join(" -> "));
            }
            for (intent, reason) in &activation.blocked_intents {
                println!("  blocked: {intent} ({reason})");
            }
        }
        (None, Some(reason), _) => println!("No activation: {reason}"),
        (None, _, Some(error)) => println!("Activation failed: {error}"),
        _ => {}
    }
    Ok(0)
}

fn cmd_activate(
    ws_root: &std::path::Path,
    store: &SessionStore,
    profile: &str,
    request_id: Option<String>,
) -> Result<i32> {
    let (skills, profiles) = require_configs(ws_root)?;
    fail_on_validation(&skills, &profiles)?;

    let decision = RouteDecision {
        request_id: request_id.unwrap_or_else(|| mint_session_id(Utc::now())),
        query: String::new(),
        mode: RouteMode::Immediate,
        candidates: Vec::new(),
        selected_profile: Some(profile.to_string()),
        session_id: None,
        decided_at: Utc::now(),
    };
    let activator = ChainActivator::new(store, &skills.skills, &profiles);
    let result = activator.activate(&decision)?;

    if let Some(error) = &result.error {
        eprintln!("{error}: {profile}");
        return Ok(1);
    }
    let id = result.session_id.as_deref().unwrap_or("?");
    if result.idempotent {
        println!("Session {id} already active for this request");
    } else {
        println!("Activated session {id} (profile {profile})");
        if !result.chain.is_empty() {
            println!("  chain: {}", result.chain.join(" -> "));
        }
        for (intent, reason) in &result.blocked_intents {
            println!("  blocked: {intent} ({reason})");
        }
    }
    Ok(0)
}

async fn cmd_pre_tool_use(
    ws_root: &std::path::Path,
    store: &SessionStore,
    tool_json: &str,
) -> Result<i32> {
    let value: serde_json::Value =
        serde_json::from_str(tool_json).context("--tool must be valid JSON")?;
    let invocation = ToolInvocation::from_json(&value);

    // Enforcement works from the persisted session even without config; the
    // corpus only adds the evidence sweep.
    let skills = load_configs(ws_root)?
        .map(|(s, _)| s.skills)
        .unwrap_or_default();
    let hook = PreToolUseHook::new(store, &skills, ws_root);
    let decision = hook.check(&invocation).await?;

    if decision.allowed {
        if let Some(ref message) = decision.message {
            println!("{message}");
        }
    } else if let Some(ref message) = decision.message {
        eprintln!("{message}");
    }
    Ok(decision.exit_code())
}

async fn cmd_stop(ws_root: &std::path::Path, store: &SessionStore) -> Result<i32> {
    let Some((_, profiles)) = load_configs(ws_root)? else {
        // No config to evaluate completion against.
        return Ok(0);
    };
    let hook = StopHook::new(store, &profiles, ws_root);
    let decision = hook.check().await?;
    if !decision.allowed {
        if let Some(ref message) = decision.message {
            eprintln!("{message}");
        }
    }
    Ok(decision.exit_code())
}

fn cmd_status(store: &SessionStore) -> Result<i32> {
    let Some(session) = store.load_current()? else {
        println!("No active session.");
        return Ok(0);
    };
    let (done, total) = session.progress();
    println!("sgate status\n");
    println!("  Session:   {}", session.session_id);
    println!(
        "  Profile:   {} ({})",
        session.profile_id,
        strictness_label(session.strictness)
    );
    println!(
        "  Chain:     {}",
        if session.chain.is_empty() {
            "(empty)".to_string()
        } else {
            session.chain.join(" -> ")
        }
    );
    println!("  Progress:  {done}/{total} capabilities");
    match session.next_unsatisfied() {
        Some(cap) => println!("  Next:      {cap}"),
        None => println!("  Next:      (complete)"),
    }
    if session.blocked_intents.is_empty() {
        println!("  Blocked:   (none)");
    } else {
        for (intent, reason) in &session.blocked_intents {
            println!("  Blocked:   {intent} ({reason})");
        }
    }
    Ok(0)
}

fn cmd_next(ws_root: &std::path::Path, store: &SessionStore, json: bool) -> Result<i32> {
    let session = store.load_current()?;
    let skills = load_configs(ws_root)?
        .map(|(s, _)| s.skills)
        .unwrap_or_default();

    let (capability, skill, complete) = match &session {
        None => (None, None, false),
        Some(s) => {
            let capability = s.next_unsatisfied().map(|c| c.to_string());
            let skill = capability.as_deref().and_then(|cap| {
                s.chain
                    .iter()
                    .find(|name| {
                        skills
                            .iter()
                            .find(|sk| &sk.name == *name)
                            .map(|sk| sk.provides.iter().any(|c| c == cap))
                            .unwrap_or(false)
                    })
                    .cloned()
                    .or_else(|| s.current_skill().map(|n| n.to_string()))
            });
            (capability, skill, s.capabilities_complete())
        }
    };

    if json {
        let out = serde_json::json!({
            "session": session.as_ref().map(|s| s.session_id.clone()),
            "capability": capability,
            "skill": skill,
            "complete": complete,
        });
        println!("{}", serde_json::to_string(&out)?);
        return Ok(0);
    }

    match (session.is_some(), capability) {
        (false, _) => println!("No active session."),
        (true, Some(cap)) => {
            println!("Next capability: {cap}");
            if let Some(skill) = skill {
                println!("Suggested skill: {skill}");
            }
        }
        (true, None) => println!("All required capabilities satisfied."),
    }
    Ok(0)
}

fn cmd_clear(store: &SessionStore, force: bool) -> Result<i32> {
    if !force {
        eprintln!("clear discards the current session pointer; pass --force to confirm");
        return Ok(1);
    }
    store.clear()?;
    println!("Session cleared.");
    Ok(0)
}

fn cmd_sessions(store: &SessionStore) -> Result<i32> {
    let sessions = store.list()?;
    if sessions.is_empty() {
        println!("No sessions recorded.");
        return Ok(0);
    }
    let current = store.current_session_id()?;
    for s in sessions {
        let marker = if current.as_deref() == Some(s.session_id.as_str()) {
            "*"
        } else {
            " "
        };
        let (done, total) = s.progress();
        println!(
            "{marker} {}  {}  {}  {done}/{total}",
            s.session_id,
            s.activated_at.format("%Y-%m-%dT%H:%M:%SZ"),
            s.profile_id
        );
    }
    Ok(0)
}

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

fn ok(label: &str, detail: &str) {
    println!("  {GREEN}[OK]{RESET}   {label}: {detail}");
}

fn fail(label: &str, detail: &str) {
    println!("  {RED}[FAIL]{RESET} {label}: {detail}");
}

fn info_line(label: &str, detail: &str) {
    println!("  {CYAN}[INFO]{RESET} {label}: {detail}");
}

fn cmd_validate(ws_root: &std::path::Path) -> Result<i32> {
    println!("sgate validate\n");
    ok("Version", env!("CARGO_PKG_VERSION"));
    ok("Workspace", &ws_root.display().to_string());

    let mut failures = 0usize;

    let configs = match load_configs(ws_root)? {
        Some(pair) => pair,
        None => {
            fail(
                "Config",
                &format!("{} / {} not found", config::SKILLS_FILE, config::PROFILES_FILE),
            );
            return Ok(1);
        }
    };
    let (skills, profiles) = configs;
    ok(
        "Config",
        &format!(
            "{} skill(s), {} profile(s)",
            skills.skills.len(),
            profiles.profiles.len()
        ),
    );

    let issues = config::validate(&skills, &profiles);
    if issues.is_empty() {
        ok("Schema", "all capability references resolve");
    } else {
        for issue in &issues {
            fail("Schema", &issue.to_string());
        }
        failures += issues.len();
    }

    let graph = resolver::graph::SkillGraph::build(&skills.skills);
    match graph.find_requirement_cycle() {
        None => ok("Dependencies", "no requirement cycles"),
        Some(cycle) => {
            fail("Dependencies", &format!("cycle: {}", cycle.join(" -> ")));
            failures += 1;
        }
    }

    let vs_path = paths::vector_store_path(ws_root);
    if vs_path.exists() {
        match router::store::VectorStore::load(&vs_path) {
            Ok(vs) => ok(
                "Vector store",
                &format!("{} entries, dim {}, model {}", vs.skills.len(), vs.dimension(), vs.model),
            ),
            Err(e) => {
                fail("Vector store", &e.to_string());
                failures += 1;
            }
        }
    } else {
        info_line("Vector store", "not present (router unavailable)");
    }

    if failures == 0 {
        println!("\nAll checks passed.");
        Ok(0)
    } else {
        println!("\n{failures} check(s) failed.");
        Ok(1)
    }
}

fn strictness_label(s: config::Strictness) -> &'static str {
    match s {
        config::Strictness::Strict => "strict",
        config::Strictness::Advisory => "advisory",
        config::Strictness::Permissive => "permissive",
    }
}
