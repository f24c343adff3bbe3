use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TesseraError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("missing configuration: {}", .0.keys().cloned().collect::<Vec<_>>().join(", "))]
    ConfigMissing(BTreeMap<String, String>),

    #[error("proof not yet available: {0}")]
    Unavailable(String),

    #[error("upstream timeout: {0}")]
    Timeout(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TesseraError {
    pub fn config_missing(setting: &str, env: &str) -> Self {
        let mut map = BTreeMap::new();
        map.insert(setting.to_string(), env.to_string());
        Self::ConfigMissing(map)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, TesseraError>;
