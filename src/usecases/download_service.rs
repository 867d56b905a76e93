//! Downloads media by coordinates: one `(channel, message)` pair, or every
//! `media.download_info` found in a persisted artifact.
//!
//! Grouped seeds are expanded into their album first. Per-message failures are
//! counted and skipped; storage exhaustion aborts the whole batch.
//!
//! Downloads land in `STAGING_DIR` and are moved into the output directory only
//! once complete, so a file there is never a leftover partial download.

use crate::domain::{DomainError, DownloadCoordinates, SourceMessage, native_channel_id};
use crate::ports::{ArtifactPort, MessageSource};
use crate::usecases::album_resolver::AlbumResolver;
use crate::usecases::download_executor::{DownloadExecutor, DownloadPolicy};
use serde_json::Value;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Subdirectory of the output directory holding in-flight downloads.
pub const STAGING_DIR: &str = ".partial";

/// Outcome counts of a download request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadSummary {
    pub downloaded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl AddAssign for DownloadSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.downloaded += rhs.downloaded;
        self.failed += rhs.failed;
        self.skipped += rhs.skipped;
    }
}

/// Download service. Owns the resolver and executor; shares the message source.
pub struct DownloadService {
    source: Arc<dyn MessageSource>,
    artifacts: Arc<dyn ArtifactPort>,
    resolver: AlbumResolver,
    executor: DownloadExecutor,
    output_dir: PathBuf,
    policy: DownloadPolicy,
}

impl DownloadService {
    pub fn new(
        source: Arc<dyn MessageSource>,
        artifacts: Arc<dyn ArtifactPort>,
        output_dir: PathBuf,
        policy: DownloadPolicy,
    ) -> Self {
        Self {
            resolver: AlbumResolver::new(Arc::clone(&source)),
            executor: DownloadExecutor::new(Arc::clone(&source)),
            source,
            artifacts,
            output_dir,
            policy,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Download the media of one message (and of its album, if grouped).
    ///
    /// `channel_id` may be native or `-100…`. Only storage exhaustion is returned as `Err`.
    pub async fn download_message(
        &self,
        channel_id: i64,
        message_id: i32,
    ) -> Result<DownloadSummary, DomainError> {
        let channel_id = native_channel_id(channel_id);
        let mut summary = DownloadSummary::default();

        let channel = match self.source.get_channel(channel_id).await {
            Ok(c) => c,
            Err(e) => {
                warn!(channel_id, msg_id = message_id, error = %e, "channel lookup failed, skipping");
                summary.failed += 1;
                return Ok(summary);
            }
        };

        let seed = match self.source.get_message(channel_id, message_id).await {
            Ok(Some(m)) => m,
            Ok(None) => {
                warn!(channel_id, msg_id = message_id, "message not found, skipping");
                summary.failed += 1;
                return Ok(summary);
            }
            Err(e) => {
                warn!(channel_id, msg_id = message_id, error = %e, "message lookup failed, skipping");
                summary.failed += 1;
                return Ok(summary);
            }
        };

        if seed.media.is_none() {
            debug!(channel_id, msg_id = message_id, "message has no media");
            summary.skipped += 1;
            return Ok(summary);
        }

        let members = if seed.grouped_id.is_some() {
            let album = self.resolver.resolve(&seed).await;
            summary.failed += album.lookup_errors;
            if album.members.is_empty() { vec![seed] } else { album.members }
        } else {
            vec![seed]
        };

        info!(
            channel = %channel.display_name,
            channel_id,
            msg_id = message_id,
            members = members.len(),
            "downloading media"
        );

        for member in &members {
            summary += self.download_one(member).await?;
        }
        Ok(summary)
    }

    /// Download every media item referenced by the artifact at `artifact`.
    pub async fn download_from_records(
        &self,
        artifact: &Path,
    ) -> Result<DownloadSummary, DomainError> {
        let entries = self.artifacts.read(artifact).await?;
        let targets = extract_coordinates(&entries);
        info!(
            path = %artifact.display(),
            entries = entries.len(),
            targets = targets.len(),
            "downloading media from records"
        );

        let mut summary = DownloadSummary::default();
        for coords in targets {
            summary += self
                .download_message(coords.channel_id, coords.message_id)
                .await?;
        }
        info!(
            downloaded = summary.downloaded,
            failed = summary.failed,
            skipped = summary.skipped,
            "download batch finished"
        );
        Ok(summary)
    }

    async fn download_one(&self, msg: &SourceMessage) -> Result<DownloadSummary, DomainError> {
        let mut summary = DownloadSummary::default();
        let Some(media) = &msg.media else {
            summary.skipped += 1;
            return Ok(summary);
        };

        let name = media.file_name(msg.channel_id, msg.id);
        let dest = self.output_dir.join(&name);
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            debug!(path = %dest.display(), "file already exists, skipping download");
            summary.skipped += 1;
            return Ok(summary);
        }

        let staging = self.output_dir.join(STAGING_DIR);
        let outcome = match self.executor.fetch(msg, &staging, self.policy).await {
            Ok(staged) => promote(&staged, &dest).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => summary.downloaded += 1,
            Err(e) => {
                discard(&staging.join(&name)).await;
                if e.is_fatal() {
                    return Err(e);
                }
                warn!(channel_id = msg.channel_id, msg_id = msg.id, error = %e, "media download failed");
                summary.failed += 1;
            }
        }
        Ok(summary)
    }
}

/// Move a finished download into place.
async fn promote(staged: &Path, dest: &Path) -> Result<(), DomainError> {
    tokio::fs::rename(staged, dest)
        .await
        .map_err(|e| DomainError::from_io(&e))
}

/// Remove a partial download; nothing to do if none was written.
async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "partial download removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove partial download"),
    }
}

/// Every `media.download_info` in an artifact's entries. Malformed entries are logged and skipped.
pub fn extract_coordinates(entries: &[Value]) -> Vec<DownloadCoordinates> {
    let mut out = Vec::new();
    for entry in entries {
        let Some(keyed) = entry.as_object() else {
            warn!("artifact entry is not an object, skipping");
            continue;
        };
        for record in keyed.values() {
            let Some(info) = record.get("media").and_then(|m| m.get("download_info")) else {
                continue;
            };
            match serde_json::from_value::<DownloadCoordinates>(info.clone()) {
                Ok(coords) => out.push(coords),
                Err(e) => warn!(error = %e, "malformed download_info, skipping"),
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemorySource, ScriptedDownload};
    use crate::adapters::persistence::json_artifact::JsonArtifact;
    use crate::domain::SourceMedia;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;

    const CH: i64 = 1234;

    fn msg(id: i32, grouped_id: Option<i64>, with_media: bool) -> SourceMessage {
        let mut m = SourceMessage::new(CH, id, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        m.grouped_id = grouped_id;
        if with_media {
            m.media = Some(SourceMedia::Photo { id: id as i64 });
        }
        m
    }

    fn service(source: Arc<InMemorySource>, dir: &Path) -> DownloadService {
        DownloadService::new(
            source,
            Arc::new(JsonArtifact::new()),
            dir.to_path_buf(),
            DownloadPolicy {
                max_retries: 1,
                deadline: Duration::from_secs(5),
            },
        )
    }

    fn record(channel_id: i64, message_id: i32) -> Value {
        json!({
            channel_id.to_string(): {
                "message_id": message_id,
                "media": {
                    "type": "photo",
                    "photo_id": 1,
                    "download_info": {"channel_id": channel_id, "message_id": message_id, "grouped_id": null}
                }
            }
        })
    }

    #[tokio::test]
    async fn accepts_bot_api_channel_id() {
        let dir = tempdir().unwrap();
        let source = Arc::new(
            InMemorySource::new()
                .with_channel(CH, "News")
                .with_message(msg(7, None, true)),
        );
        let summary = service(source, dir.path())
            .download_message(-1_000_000_001_234, 7)
            .await
            .unwrap();
        assert_eq!(summary.downloaded, 1);
        assert!(dir.path().join("1234_7.jpg").exists());
    }

    #[tokio::test]
    async fn grouped_seed_downloads_whole_album() {
        let dir = tempdir().unwrap();
        let source = Arc::new(
            InMemorySource::new().with_channel(CH, "News").with_messages([
                msg(10, Some(7), true),
                msg(11, None, false),
                msg(12, Some(7), true),
                msg(13, Some(7), true),
            ]),
        );
        let summary = service(source, dir.path())
            .download_message(CH, 12)
            .await
            .unwrap();
        assert_eq!(
            summary,
            DownloadSummary {
                downloaded: 3,
                failed: 0,
                skipped: 0
            }
        );
    }

    #[tokio::test]
    async fn missing_message_and_missing_media_are_counted() {
        let dir = tempdir().unwrap();
        let source = Arc::new(
            InMemorySource::new()
                .with_channel(CH, "News")
                .with_message(msg(1, None, false)),
        );
        let svc = service(source, dir.path());
        assert_eq!(svc.download_message(CH, 99).await.unwrap().failed, 1);
        assert_eq!(svc.download_message(CH, 1).await.unwrap().skipped, 1);
        assert_eq!(svc.download_message(777, 1).await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn existing_file_is_not_downloaded_again() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("1234_3.jpg"), b"old").unwrap();
        let source = Arc::new(
            InMemorySource::new()
                .with_channel(CH, "News")
                .with_message(msg(3, None, true)),
        );
        let summary = service(source.clone(), dir.path())
            .download_message(CH, 3)
            .await
            .unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(source.download_calls(CH, 3), 0);
    }

    #[tokio::test]
    async fn failed_download_leaves_nothing_to_skip_on_rerun() {
        let dir = tempdir().unwrap();
        let source = Arc::new(
            InMemorySource::new()
                .with_channel(CH, "News")
                .with_message(msg(8, None, true))
                .with_download_script(CH, 8, [ScriptedDownload::Partial("connection reset".into())]),
        );
        let svc = service(source.clone(), dir.path());

        let first = svc.download_message(CH, 8).await.unwrap();
        assert_eq!(first.failed, 1);
        assert!(!dir.path().join("1234_8.jpg").exists());
        assert!(!dir.path().join(STAGING_DIR).join("1234_8.jpg").exists());

        let second = svc.download_message(CH, 8).await.unwrap();
        assert_eq!(second.downloaded, 1);
        assert_eq!(source.download_calls(CH, 8), 2);
        assert_eq!(std::fs::read(dir.path().join("1234_8.jpg")).unwrap(), b"media");
    }

    #[tokio::test]
    async fn document_with_slash_in_name_is_saved() {
        let dir = tempdir().unwrap();
        let mut m = msg(4, None, false);
        m.media = Some(SourceMedia::Document {
            id: 1,
            mime_type: Some("application/pdf".into()),
            file_name: Some("report/2024.pdf".into()),
            size: Some(3),
        });
        let source = Arc::new(InMemorySource::new().with_channel(CH, "News").with_message(m));
        let summary = service(source.clone(), dir.path())
            .download_message(CH, 4)
            .await
            .unwrap();
        assert_eq!(summary.downloaded, 1);
        assert_eq!(source.download_calls(CH, 4), 1);
        assert!(dir.path().join("1234_4_report_2024.pdf").exists());
    }

    #[tokio::test]
    async fn album_lookup_errors_count_as_failed() {
        let dir = tempdir().unwrap();
        let source = Arc::new(
            InMemorySource::new()
                .with_channel(CH, "News")
                .with_messages([msg(20, Some(5), true), msg(21, Some(5), true)])
                .with_failing_lookup(CH, 19),
        );
        let summary = service(source, dir.path())
            .download_message(CH, 20)
            .await
            .unwrap();
        assert_eq!(
            summary,
            DownloadSummary {
                downloaded: 2,
                failed: 1,
                skipped: 0
            }
        );
    }

    #[tokio::test]
    async fn records_batch_skips_failed_entries() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("run.json");
        std::fs::write(
            &artifact,
            serde_json::to_string(&json!([record(CH, 1), record(CH, 2), {"1234": {"message_id": 3}}]))
                .unwrap(),
        )
        .unwrap();
        let source = Arc::new(
            InMemorySource::new()
                .with_channel(CH, "News")
                .with_messages([msg(1, None, true), msg(2, None, true)])
                .with_download_script(CH, 1, [ScriptedDownload::Fail("reset".into())]),
        );
        let out = dir.path().join("media");
        let summary = service(source, &out)
            .download_from_records(&artifact)
            .await
            .unwrap();
        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn storage_exhaustion_aborts_batch() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("run.json");
        std::fs::write(
            &artifact,
            serde_json::to_string(&json!([record(CH, 1), record(CH, 2)])).unwrap(),
        )
        .unwrap();
        let source = Arc::new(
            InMemorySource::new()
                .with_channel(CH, "News")
                .with_messages([msg(1, None, true), msg(2, None, true)])
                .with_download_script(CH, 1, [ScriptedDownload::StorageFull]),
        );
        let err = service(source.clone(), &dir.path().join("media"))
            .download_from_records(&artifact)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::StorageExhausted(_)));
        assert_eq!(source.download_calls(CH, 2), 0);
    }

    #[test]
    fn extracts_coordinates_and_ignores_text_records() {
        let entries = vec![record(CH, 5), json!({"1234": {"message_id": 6}}), json!("junk")];
        let coords = extract_coordinates(&entries);
        assert_eq!(
            coords,
            vec![DownloadCoordinates {
                channel_id: CH,
                message_id: 5,
                grouped_id: None
            }]
        );
    }
}
