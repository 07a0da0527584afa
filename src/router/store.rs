use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// One skill entry in the pre-computed vector store artifact.
#[derive(Debug, Clone, Deserialize)]
pub struct VectorEntry {
    pub skill_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub trigger_examples: Vec<String>,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// The JSON artifact produced by the external store generator. Unknown
/// fields are ignored; missing required fields fail the load.
#[derive(Debug, Clone, Deserialize)]
pub struct VectorStore {
    pub version: String,
    pub model: String,
    pub generated_at: String,
    pub skills: Vec<VectorEntry>,
}

impl VectorStore {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(path.display().to_string(), e))?;
        let store: VectorStore = serde_json::from_str(&content)
            .map_err(|e| Error::config(path.display().to_string(), e))?;
        store.validate(&path.display().to_string())?;
        Ok(store)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let store: VectorStore = serde_json::from_str(content)
            .map_err(|e| Error::config("vector store", e))?;
        store.validate("vector store")?;
        Ok(store)
    }

    /// Every embedding must be non-empty and share one dimension.
    fn validate(&self, source: &str) -> Result<()> {
        let mut dimension = None;
        for entry in &self.skills {
            if entry.skill_name.is_empty() {
                return Err(Error::config(source, "entry with empty skill_name"));
            }
            if entry.embedding.is_empty() {
                return Err(Error::config(
                    source,
                    format!("skill '{}' has an empty embedding", entry.skill_name),
                ));
            }
            match dimension {
                None => dimension = Some(entry.embedding.len()),
                Some(d) if d != entry.embedding.len() => {
                    return Err(Error::config(
                        source,
                        format!(
                            "skill '{}' embedding dimension {} differs from {}",
                            entry.skill_name,
                            entry.embedding.len(),
                            d
                        ),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.skills.first().map(|s| s.embedding.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_json(skills: &str) -> String {
        format!(
            r#"{{"version":"1.0","model":"all-MiniLM-L6-v2","generated_at":"2026-01-01T00:00:00Z","skills":[{skills}]}}"#
        )
    }

    #[test]
    fn test_load_valid_store() {
        let json = store_json(
            r#"{"skill_name":"tdd","description":"test first","trigger_examples":["write a failing test"],"embedding":[0.1,0.2],"keywords":["tdd","test"]}"#,
        );
        let store = VectorStore::from_json(&json).unwrap();
        assert_eq!(store.model, "all-MiniLM-L6-v2");
        assert_eq!(store.skills.len(), 1);
        assert_eq!(store.dimension(), 2);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = store_json(
            r#"{"skill_name":"tdd","embedding":[0.5],"weights":"extra","shard":3}"#,
        );
        let store = VectorStore::from_json(&json).unwrap();
        assert_eq!(store.skills[0].skill_name, "tdd");
        assert!(store.skills[0].keywords.is_empty());
    }

    #[test]
    fn test_missing_required_field_fatal() {
        // No embedding.
        let json = store_json(r#"{"skill_name":"tdd"}"#);
        assert!(VectorStore::from_json(&json).is_err());
        // No model.
        let json = r#"{"version":"1.0","generated_at":"x","skills":[]}"#;
        assert!(VectorStore::from_json(json).is_err());
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let json = store_json(
            r#"{"skill_name":"a","embedding":[0.1,0.2]},{"skill_name":"b","embedding":[0.1]}"#,
        );
        let err = VectorStore::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("dimension"));
    }

    #[test]
    fn test_empty_embedding_rejected() {
        let json = store_json(r#"{"skill_name":"a","embedding":[]}"#);
        assert!(VectorStore::from_json(&json).is_err());
    }
}
