use crate::cache::FifoCache;
use crate::config::{ProfileDef, ProfilesFile, SkillDef};
use crate::errors::Result;
use crate::intent::Intent;
use crate::resolver;
use crate::router::{RouteMode, SkillMatch};
use crate::session::{mint_session_id, SessionState, SessionStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, OnceLock};
use tracing::{info, warn};

const REQUEST_CACHE_CAPACITY: usize = 1000;

/// Process-local idempotency cache: `request_id → session_id`. Best-effort
/// by design; after a restart a replayed request activates a fresh session.
static REQUEST_CACHE: OnceLock<Mutex<FifoCache<String>>> = OnceLock::new();

fn request_cache() -> &'static Mutex<FifoCache<String>> {
    REQUEST_CACHE.get_or_init(|| Mutex::new(FifoCache::new(REQUEST_CACHE_CAPACITY)))
}

/// A routing outcome packaged for activation.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub request_id: String,
    pub query: String,
    pub mode: RouteMode,
    pub candidates: Vec<SkillMatch>,
    pub selected_profile: Option<String>,
    pub session_id: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivationResult {
    pub activated: bool,
    pub is_new: bool,
    pub idempotent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub blocked_intents: BTreeMap<Intent, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActivationResult {
    fn skipped(reason: &str) -> Self {
        Self {
            activated: false,
            is_new: false,
            idempotent: false,
            session_id: None,
            profile_id: None,
            chain: Vec::new(),
            blocked_intents: BTreeMap::new(),
            reason: Some(reason.to_string()),
            error: None,
        }
    }

    fn failed(error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            reason: None,
            ..Self::skipped("")
        }
    }
}

/// Materialise a routing decision into a persisted session, idempotently per
/// `request_id`.
pub struct ChainActivator<'a> {
    store: &'a SessionStore,
    skills: &'a [SkillDef],
    profiles: &'a ProfilesFile,
}

impl<'a> ChainActivator<'a> {
    pub fn new(
        store: &'a SessionStore,
        skills: &'a [SkillDef],
        profiles: &'a ProfilesFile,
    ) -> Self {
        Self {
            store,
            skills,
            profiles,
        }
    }

    pub fn activate(&self, decision: &RouteDecision) -> Result<ActivationResult> {
        tracing::debug!(
            request_id = %decision.request_id,
            mode = %decision.mode,
            decided_at = %decision.decided_at,
            prior_session = ?decision.session_id,
            "activation requested"
        );

        // Idempotent replay: only honoured while the cached session is still
        // the workspace's current one.
        if let Some(session_id) = self.cached_session(&decision.request_id) {
            if let Some(existing) = self.store.load(&session_id)? {
                if self.store.current_session_id()?.as_deref() == Some(session_id.as_str()) {
                    return Ok(ActivationResult {
                        activated: true,
                        is_new: false,
                        idempotent: true,
                        session_id: Some(existing.session_id.clone()),
                        profile_id: Some(existing.profile_id.clone()),
                        chain: existing.chain.clone(),
                        blocked_intents: existing.blocked_intents.clone(),
                        reason: None,
                        error: None,
                    });
                }
            }
        }

        if decision.mode == RouteMode::Chat {
            return Ok(ActivationResult::skipped("chat mode"));
        }

        let Some(profile) = self.select_profile(decision) else {
            return Ok(ActivationResult::failed("profile not found"));
        };

        let resolution = resolver::resolve(profile, self.skills)?;
        if resolution.chain.is_empty() {
            warn!(
                profile = %profile.name,
                "activating with an empty skill chain"
            );
        }

        let now = Utc::now();
        let session = SessionState {
            session_id: mint_session_id(now),
            profile_id: profile.name.clone(),
            activated_at: now,
            chain: resolution.chain.clone(),
            capabilities_required: profile.capabilities_required.clone(),
            capabilities_satisfied: Vec::new(),
            current_skill_index: 0,
            strictness: profile.strictness,
            blocked_intents: resolution.blocked_intents.clone(),
        };
        self.store.create(&session)?;

        {
            let mut cache = request_cache().lock().unwrap_or_else(|e| e.into_inner());
            cache.insert(decision.request_id.clone(), session.session_id.clone());
        }

        info!(
            session_id = %session.session_id,
            profile = %profile.name,
            chain = ?resolution.chain,
            "session activated"
        );

        Ok(ActivationResult {
            activated: true,
            is_new: true,
            idempotent: false,
            session_id: Some(session.session_id),
            profile_id: Some(profile.name.clone()),
            chain: resolution.chain,
            blocked_intents: resolution.blocked_intents,
            reason: None,
            error: None,
        })
    }

    fn cached_session(&self, request_id: &str) -> Option<String> {
        let cache = request_cache().lock().unwrap_or_else(|e| e.into_inner());
        cache.get(request_id).cloned()
    }

    /// Profile precedence: the decision's explicit `selected_profile` (a
    /// profile name, never a skill name), then the top candidate's name if a
    /// profile shares it, then substring patterns by priority.
    fn select_profile(&self, decision: &RouteDecision) -> Option<&ProfileDef> {
        if let Some(name) = &decision.selected_profile {
            return self.profiles.find(name);
        }
        if let Some(top) = decision.candidates.first() {
            if let Some(profile) = self.profiles.find(&top.skill_name) {
                return Some(profile);
            }
        }
        self.profiles.match_query(&decision.query)
    }
}
