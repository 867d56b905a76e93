//! Implements ArtifactPort. The artifact is one pretty-printed JSON array of
//! `{"<channel_id>": record}` objects, rewritten in full on every append.

use super::atomic_write;
use crate::domain::DomainError;
use crate::ports::ArtifactPort;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tracing::{info, warn};

/// JSON-array artifact store. Stateless; the path is chosen per run.
#[derive(Debug, Default)]
pub struct JsonArtifact;

impl JsonArtifact {
    pub fn new() -> Self {
        Self
    }

    /// Parse artifact text. A non-array document counts as a one-element list.
    fn entries_from_str(s: &str) -> Result<Vec<Value>, serde_json::Error> {
        Ok(match serde_json::from_str::<Value>(s)? {
            Value::Array(items) => items,
            other => vec![other],
        })
    }
}

#[async_trait::async_trait]
impl ArtifactPort for JsonArtifact {
    async fn append(&self, path: &Path, records: &[Value]) -> Result<usize, DomainError> {
        let mut all = match fs::read_to_string(path).await {
            Ok(s) => match Self::entries_from_str(&s) {
                Ok(existing) => {
                    info!(path = %path.display(), existing = existing.len(), "loaded existing artifact");
                    existing
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "existing artifact unreadable, starting a new one");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "existing artifact unreadable, starting a new one");
                Vec::new()
            }
        };
        all.extend_from_slice(records);

        let json = serde_json::to_string_pretty(&all)
            .map_err(|e| DomainError::Serialization(e.to_string()))?;
        atomic_write(path, json.as_bytes()).await?;

        let abs_path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        info!(
            path = %abs_path.display(),
            added = records.len(),
            total = all.len(),
            "saved records to artifact"
        );
        Ok(all.len())
    }

    async fn read(&self, path: &Path) -> Result<Vec<Value>, DomainError> {
        let s = fs::read_to_string(path)
            .await
            .map_err(|e| DomainError::Artifact(format!("{}: {}", path.display(), e)))?;
        Self::entries_from_str(&s)
            .map_err(|e| DomainError::Serialization(format!("{}: {}", path.display(), e)))
    }
}
