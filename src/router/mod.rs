pub mod embedding;
pub mod store;
pub mod vector;

use crate::cache::FifoCache;
use crate::errors::Result;
use embedding::Embedder;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Instant;
use store::VectorStore;
use tracing::debug;
use vector::{cosine_similarity, fuse_scores, FusionWeights, KeywordIndex};

const QUERY_CACHE_CAPACITY: usize = 256;

/// Router classification of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMode {
    Immediate,
    Suggestion,
    Chat,
}

impl std::fmt::Display for RouteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RouteMode::Immediate => "immediate",
            RouteMode::Suggestion => "suggestion",
            RouteMode::Chat => "chat",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub immediate_threshold: f32,
    pub suggestion_threshold: f32,
    pub weights: FusionWeights,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            immediate_threshold: 0.85,
            suggestion_threshold: 0.70,
            weights: FusionWeights::default(),
        }
    }
}

impl RouterConfig {
    /// Apply `IMMEDIATE_THRESHOLD` / `SUGGESTION_THRESHOLD` overrides.
    /// Values outside `[0, 1]` are rejected and the default kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_threshold("IMMEDIATE_THRESHOLD") {
            config.immediate_threshold = v;
        }
        if let Some(v) = env_threshold("SUGGESTION_THRESHOLD") {
            config.suggestion_threshold = v;
        }
        config
    }
}

fn env_threshold(name: &str) -> Option<f32> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<f32>() {
        Ok(v) if (0.0..=1.0).contains(&v) => Some(v),
        _ => {
            tracing::warn!("ignoring {name}={raw}: expected a float in [0,1]");
            None
        }
    }
}

/// One ranked candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillMatch {
    pub skill_name: String,
    pub score: f32,
    #[serde(default)]
    pub matched_patterns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Keyword,
    Embedding,
}

/// Per-signal observability record.
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub score: f32,
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoutingResult {
    pub query: String,
    pub mode: RouteMode,
    pub matches: Vec<SkillMatch>,
    pub signals: Vec<Signal>,
    pub processing_time_ms: u64,
}

impl RoutingResult {
    pub fn top_score(&self) -> f32 {
        self.matches.first().map(|m| m.score).unwrap_or(0.0)
    }
}

/// Query → `{mode, ranked matches, signals}` over a pre-computed skill
/// corpus. Pure for a fixed store and embedding function, modulo
/// `processing_time_ms`.
pub struct SemanticRouter {
    store: VectorStore,
    index: KeywordIndex,
    embedder: Box<dyn Embedder>,
    query_cache: Mutex<FifoCache<Vec<f32>>>,
    config: RouterConfig,
}

impl SemanticRouter {
    /// Validate the store, build keyword patterns and wire up the embedding
    /// collaborator.
    pub fn initialize(
        store: VectorStore,
        embedder: Box<dyn Embedder>,
        config: RouterConfig,
    ) -> Result<Self> {
        let index = KeywordIndex::build(
            store
                .skills
                .iter()
                .map(|s| (s.skill_name.as_str(), s.keywords.as_slice())),
        )?;
        debug!(
            skills = store.skills.len(),
            model = %store.model,
            "router initialized"
        );
        Ok(Self {
            store,
            index,
            embedder,
            query_cache: Mutex::new(FifoCache::new(QUERY_CACHE_CAPACITY)),
            config,
        })
    }

    pub fn route(&self, query: &str) -> Result<RoutingResult> {
        let started = Instant::now();

        let query_embedding = self.embed_cached(query)?;
        let keyword_hits = self.index.matches(query);

        let mut signals = Vec::new();
        let mut matches = Vec::new();
        for entry in &self.store.skills {
            let hit = keyword_hits.iter().find(|h| h.candidate == entry.skill_name);
            let keyword_score = hit.map(|h| h.score).unwrap_or(0.0);
            let embedding_score = cosine_similarity(&query_embedding, &entry.embedding).max(0.0);
            let combined = fuse_scores(keyword_score, embedding_score, &self.config.weights);

            if let Some(hit) = hit {
                signals.push(Signal {
                    signal_type: SignalType::Keyword,
                    score: keyword_score,
                    source: format!("{}:{}", entry.skill_name, hit.matched.join(",")),
                });
            }
            signals.push(Signal {
                signal_type: SignalType::Embedding,
                score: embedding_score,
                source: entry.skill_name.clone(),
            });

            matches.push(SkillMatch {
                skill_name: entry.skill_name.clone(),
                score: combined,
                matched_patterns: hit.map(|h| h.matched.clone()).unwrap_or_default(),
            });
        }

        // Descending by score; ties break on name so routing stays
        // deterministic for a fixed store.
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.skill_name.cmp(&b.skill_name))
        });

        let top = matches.first().map(|m| m.score).unwrap_or(0.0);
        let mode = if top >= self.config.immediate_threshold {
            RouteMode::Immediate
        } else if top >= self.config.suggestion_threshold {
            RouteMode::Suggestion
        } else {
            RouteMode::Chat
        };

        Ok(RoutingResult {
            query: query.to_string(),
            mode,
            matches,
            signals,
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Embed a query at most once; the per-instance cache evicts in
    /// insertion order when full.
    fn embed_cached(&self, query: &str) -> Result<Vec<f32>> {
        let mut cache = self.query_cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(hit) = cache.get(query) {
            return Ok(hit.clone());
        }
        let embedding = self.embedder.embed(query)?;
        cache.insert(query.to_string(), embedding.clone());
        Ok(embedding)
    }
}
