use crate::errors::{Error, Result};
use regex::Regex;

/// Cosine similarity between two vectors. Accumulates in f64, returns 0.0
/// for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-12 {
        0.0
    } else {
        (dot / denom) as f32
    }
}

/// Linear blend of keyword and embedding scores, clamped to `[0, 1]`.
#[derive(Debug, Clone, Copy)]
pub struct FusionWeights {
    pub keyword: f32,
    pub embedding: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            keyword: 0.3,
            embedding: 0.7,
        }
    }
}

pub fn fuse_scores(keyword: f32, embedding: f32, weights: &FusionWeights) -> f32 {
    (weights.keyword * keyword + weights.embedding * embedding).clamp(0.0, 1.0)
}

/// One keyword-index hit. Multiple keyword matches for the same candidate
/// accumulate into `matched` while the score saturates at 1.0.
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub candidate: String,
    pub score: f32,
    pub matched: Vec<String>,
}

struct KeywordEntry {
    candidate: String,
    patterns: Vec<(String, Regex)>,
}

/// Word-boundary, case-insensitive keyword matcher over the skill corpus.
/// Regex metacharacters in keywords are escaped at build time.
pub struct KeywordIndex {
    entries: Vec<KeywordEntry>,
}

impl KeywordIndex {
    pub fn build<'a, I>(candidates: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a [String])>,
    {
        let mut entries = Vec::new();
        for (candidate, keywords) in candidates {
            let mut patterns = Vec::new();
            for keyword in keywords {
                let keyword = keyword.trim();
                if keyword.is_empty() {
                    continue;
                }
                let pattern = format!(r"(?i)\b{}\b", regex::escape(keyword));
                let regex = Regex::new(&pattern).map_err(|e| {
                    Error::config("vector store keywords", format!("keyword '{keyword}': {e}"))
                })?;
                patterns.push((keyword.to_string(), regex));
            }
            entries.push(KeywordEntry {
                candidate: candidate.to_string(),
                patterns,
            });
        }
        Ok(Self { entries })
    }

    pub fn matches(&self, query: &str) -> Vec<KeywordHit> {
        let mut hits = Vec::new();
        for entry in &self.entries {
            let matched: Vec<String> = entry
                .patterns
                .iter()
                .filter(|(_, regex)| regex.is_match(query))
                .map(|(keyword, _)| keyword.clone())
                .collect();
            if !matched.is_empty() {
                hits.push(KeywordHit {
                    candidate: entry.candidate.clone(),
                    score: 1.0,
                    matched,
                });
            }
        }
        hits
    }
}
