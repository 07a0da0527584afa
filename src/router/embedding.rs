use crate::errors::Result;
use std::hash::{Hash, Hasher};

/// The embedding collaborator: text in, unit-norm vector out. The real model
/// (a sentence-transformer served out of process) plugs in behind this trait;
/// the control plane never assumes more than determinism for a fixed input.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Identifier reported in routing signals.
    fn id(&self) -> &str;
}

/// Deterministic hash-based pseudo-embedding. A bounded fallback for
/// environments without the model; same text always yields the same
/// unit-norm vector.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut values = Vec::with_capacity(self.dimension);
        for i in 0..self.dimension {
            // DefaultHasher::new() uses fixed keys, so this is stable across
            // processes and runs.
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let raw = hasher.finish();
            // Map the 64-bit hash into [-1, 1].
            let unit = (raw as f64 / u64::MAX as f64) * 2.0 - 1.0;
            values.push(unit as f32);
        }

        let norm = values.iter().map(|v| (*v as f64).powi(2)).sum::<f64>().sqrt();
        if norm > 1e-12 {
            for v in &mut values {
                *v = (*v as f64 / norm) as f32;
            }
        }
        Ok(values)
    }

    fn id(&self) -> &str {
        "hash-fallback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let e = HashEmbedder::new(16);
        assert_eq!(e.embed("fix the bug").unwrap(), e.embed("fix the bug").unwrap());
    }

    #[test]
    fn test_distinct_texts_differ() {
        let e = HashEmbedder::new(16);
        assert_ne!(e.embed("fix the bug").unwrap(), e.embed("write docs").unwrap());
    }

    #[test]
    fn test_unit_norm() {
        let e = HashEmbedder::new(32);
        let v = e.embed("anything at all").unwrap();
        let norm: f64 = v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_dimension_clamped() {
        let e = HashEmbedder::new(0);
        assert_eq!(e.embed("x").unwrap().len(), 1);
    }
}
