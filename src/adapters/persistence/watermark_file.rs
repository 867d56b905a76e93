//! Implements WatermarkPort using a plain-text file holding one RFC 3339 UTC timestamp.

use super::atomic_write;
use crate::domain::DomainError;
use crate::ports::WatermarkPort;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Watermark file (`.last_run` by default).
pub struct WatermarkFile {
    path: PathBuf,
}

impl WatermarkFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl WatermarkPort for WatermarkFile {
    async fn load(&self) -> Result<Option<DateTime<Utc>>, DomainError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(DomainError::State(e.to_string())),
        };
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| {
                DomainError::Serialization(format!("watermark {:?}: {}", raw.trim(), e))
            })
    }

    async fn store(&self, at: DateTime<Utc>) -> Result<(), DomainError> {
        atomic_write(&self.path, at.to_rfc3339().as_bytes())
            .await
            .map_err(|e| DomainError::State(format!("write watermark: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_loads_none() {
        let dir = tempdir().unwrap();
        let wm = WatermarkFile::new(dir.path().join(".last_run"));
        assert_eq!(wm.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn store_then_load() {
        let dir = tempdir().unwrap();
        let wm = WatermarkFile::new(dir.path().join("state").join(".last_run"));
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        wm.store(at).await.unwrap();
        assert_eq!(wm.load().await.unwrap(), Some(at));
    }

    #[tokio::test]
    async fn offset_timestamps_are_normalized_to_utc() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".last_run");
        std::fs::write(&path, "2024-03-01T21:00:00+09:00\n").unwrap();
        let wm = WatermarkFile::new(&path);
        assert_eq!(
            wm.load().await.unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn corrupt_file_is_a_serialization_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".last_run");
        std::fs::write(&path, "yesterday-ish").unwrap();
        let err = WatermarkFile::new(&path).load().await.unwrap_err();
        assert!(matches!(err, DomainError::Serialization(_)));
    }
}
