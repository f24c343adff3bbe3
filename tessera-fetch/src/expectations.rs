use std::collections::HashMap;
use std::path::Path;

use tessera_core::error::Result;
use tessera_core::proof::GpuExpectations;

/// Key whose entry applies to every model without its own entry.
pub const FALLBACK_KEY: &str = "*";

/// Per-model GPU reference values, read from a JSON object mapping model
/// names to expectation records.
#[derive(Debug, Clone, Default)]
pub struct ExpectationStore {
    by_model: HashMap<String, GpuExpectations>,
}

impl ExpectationStore {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let store = Self::from_json(&text)?;
        tracing::debug!(path = %path.display(), models = store.len(), "loaded GPU expectations");
        Ok(store)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let raw: HashMap<String, GpuExpectations> = serde_json::from_str(text)?;
        let by_model = raw
            .into_iter()
            .map(|(model, exp)| (model.trim().to_ascii_lowercase(), exp))
            .collect();
        Ok(Self { by_model })
    }

    /// Case-insensitive lookup, falling back to the `*` entry.
    pub fn lookup(&self, model: &str) -> Option<&GpuExpectations> {
        self.by_model
            .get(&model.trim().to_ascii_lowercase())
            .or_else(|| self.by_model.get(FALLBACK_KEY))
    }

    pub fn len(&self) -> usize {
        self.by_model.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_model.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "deepseek-ai/DeepSeek-V3.1": {
            "arch": "HOPPER",
            "deviceCertHash": "aa",
            "rimHash": "bb",
            "ueid": "cc",
            "measurements": ["m1"]
        },
        "*": { "arch": "HOPPER" }
    }"#;

    #[test]
    fn lookup_is_case_insensitive() {
        let store = ExpectationStore::from_json(DOC).unwrap();
        assert_eq!(store.len(), 2);
        let exp = store.lookup("DeepSeek-AI/deepseek-v3.1").unwrap();
        assert!(exp.is_complete());
    }

    #[test]
    fn falls_back_to_wildcard() {
        let store = ExpectationStore::from_json(DOC).unwrap();
        let exp = store.lookup("other/model").unwrap();
        assert_eq!(exp.arch.as_deref(), Some("HOPPER"));
        assert!(!exp.is_complete());
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(ExpectationStore::from_json("[1, 2]").is_err());
        assert!(ExpectationStore::load(Path::new("/nonexistent/expectations.json")).is_err());
    }
}
