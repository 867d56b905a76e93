//! Incremental crawl: watermark -> channel directory -> windowed scan per
//! channel -> transform -> persist -> advance watermark.
//!
//! - Only messages strictly newer than the watermark are recorded
//! - At most `CANDIDATE_CAP` candidates are read per channel and run
//! - The watermark always advances to the run's start time, even when the
//!   artifact could not be written (those messages are not fetched again)

use crate::domain::{
    ChannelDirectory, ChannelIdentity, DomainError, ExclusionList, HistoryWindow, MessageRecord,
    ScanDirection, channel_key,
};
use crate::ports::{ArtifactPort, MessageSource, WatermarkPort};
use crate::usecases::transformer::{MessageTransformer, jst};
use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Upper bound on candidates read per channel in one run.
pub const CANDIDATE_CAP: usize = 100;

/// Look-back used when no watermark is stored.
pub const DEFAULT_LOOKBACK_HOURS: i64 = 24;

/// Artifact base name when none is configured.
pub const DEFAULT_OUTPUT_BASE: &str = "telegram_messages.json";

/// Result of one crawl run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CrawlStats {
    pub dialogs: usize,
    pub channels_scanned: usize,
    pub excluded: usize,
    pub without_new: usize,
    pub records: usize,
    pub errors: usize,
    /// Set only when records were written.
    pub artifact: Option<PathBuf>,
}

/// Artifact path for a run: `<run start JST %Y%m%d_%H%M%S>_<base name>` next to `base`.
pub fn artifact_path(base: &Path, started_at: DateTime<Utc>) -> PathBuf {
    let stamp = started_at.with_timezone(&jst()).format("%Y%m%d_%H%M%S");
    let name = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_OUTPUT_BASE.to_string());
    let file = format!("{}_{}", stamp, name);
    match base.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(file),
        _ => PathBuf::from(file),
    }
}

/// Crawl controller. One instance can serve many runs (see the watcher).
pub struct CrawlController {
    source: Arc<dyn MessageSource>,
    watermark: Arc<dyn WatermarkPort>,
    artifacts: Arc<dyn ArtifactPort>,
    transformer: MessageTransformer,
    exclusions: ExclusionList,
    output_base: PathBuf,
    direction: ScanDirection,
}

impl CrawlController {
    pub fn new(
        source: Arc<dyn MessageSource>,
        watermark: Arc<dyn WatermarkPort>,
        artifacts: Arc<dyn ArtifactPort>,
        exclusions: ExclusionList,
        output_base: PathBuf,
        direction: ScanDirection,
    ) -> Self {
        Self {
            transformer: MessageTransformer::new(Arc::clone(&source)),
            source,
            watermark,
            artifacts,
            exclusions,
            output_base,
            direction,
        }
    }

    /// Run one crawl starting now.
    pub async fn run(&self) -> Result<CrawlStats, DomainError> {
        self.run_at(Utc::now()).await
    }

    /// Run one crawl whose start time (artifact name, next watermark) is `started_at`.
    pub async fn run_at(&self, started_at: DateTime<Utc>) -> Result<CrawlStats, DomainError> {
        let (watermark, watermark_readable) = self.load_watermark(started_at).await;
        info!(
            watermark = %watermark.to_rfc3339(),
            direction = ?self.direction,
            excluded_patterns = self.exclusions.patterns().len(),
            "crawl started"
        );

        let dialogs = self.source.list_channels().await?;
        let directory = ChannelDirectory::from_dialogs(&dialogs);
        debug!(dialogs = dialogs.len(), channels = directory.len(), "channel directory built");

        let lookup_failures_before = self.transformer.lookup_failures();
        let mut stats = CrawlStats::default();
        if !watermark_readable {
            stats.errors += 1;
        }
        let mut records: Vec<MessageRecord> = Vec::new();

        for dialog in &dialogs {
            stats.dialogs += 1;
            if !dialog.kind.is_channel() {
                continue;
            }
            let Some(channel) = dialog
                .channel_id
                .and_then(|id| directory.get(&channel_key(id)))
            else {
                debug!(dialog_id = dialog.dialog_id, "dialog not in channel directory, skipping");
                continue;
            };
            if self.exclusions.excludes(&channel.display_name) {
                info!(channel = %channel.display_name, "channel excluded");
                stats.excluded += 1;
                continue;
            }

            stats.channels_scanned += 1;
            match self.scan_channel(channel, watermark).await {
                Ok(batch) if batch.is_empty() => stats.without_new += 1,
                Ok(batch) => records.extend(batch),
                Err(e) => {
                    stats.errors += 1;
                    warn!(
                        channel_id = channel.numeric_id,
                        channel = %channel.display_name,
                        error = %e,
                        "channel scan failed, skipping"
                    );
                }
            }
        }
        stats.errors += self.transformer.lookup_failures() - lookup_failures_before;
        stats.records = records.len();

        let persisted = self.persist(&records, started_at, &mut stats).await;
        if !persisted {
            warn!(
                records = stats.records,
                "advancing watermark although the artifact was not written; these messages will not be crawled again"
            );
        }
        self.watermark.store(started_at).await?;

        info!(
            dialogs = stats.dialogs,
            channels = stats.channels_scanned,
            excluded = stats.excluded,
            without_new = stats.without_new,
            records = stats.records,
            errors = stats.errors,
            next_watermark = %started_at.to_rfc3339(),
            "crawl finished"
        );
        Ok(stats)
    }

    /// Stored watermark or the look-back fallback. The flag is false when a stored value could not be read.
    async fn load_watermark(&self, started_at: DateTime<Utc>) -> (DateTime<Utc>, bool) {
        let fallback = started_at - Duration::hours(DEFAULT_LOOKBACK_HOURS);
        match self.watermark.load().await {
            Ok(Some(at)) => (at, true),
            Ok(None) => {
                info!(fallback = %fallback.to_rfc3339(), "no watermark stored, looking back 24h");
                (fallback, true)
            }
            Err(e) => {
                warn!(error = %e, fallback = %fallback.to_rfc3339(), "watermark unreadable, looking back 24h");
                (fallback, false)
            }
        }
    }

    async fn scan_channel(
        &self,
        channel: &ChannelIdentity,
        watermark: DateTime<Utc>,
    ) -> Result<Vec<MessageRecord>, DomainError> {
        let window = HistoryWindow {
            offset_date: match self.direction {
                ScanDirection::NewestFirst => None,
                ScanDirection::OldestFirst => Some(watermark),
            },
            direction: self.direction,
            limit: CANDIDATE_CAP,
        };
        let candidates = self.source.iter_messages(channel.numeric_id, window).await?;
        if candidates.len() >= CANDIDATE_CAP {
            warn!(
                channel_id = channel.numeric_id,
                cap = CANDIDATE_CAP,
                "candidate cap reached, some new messages may be missed"
            );
        }

        let mut batch = Vec::new();
        for msg in &candidates {
            if msg.date > watermark {
                batch.push(self.transformer.transform(msg, channel).await);
            } else if self.direction.yields_newer_first() {
                break;
            }
        }

        if batch.is_empty() {
            debug!(channel = %channel.display_name, "no new messages");
        } else {
            let url = channel.public_url();
            info!(
                channel_id = channel.numeric_id,
                channel = %channel.display_name,
                url = url.as_deref().unwrap_or("-"),
                count = batch.len(),
                "new messages"
            );
        }
        Ok(batch)
    }

    /// Write accumulated records. Returns false when the artifact write failed.
    async fn persist(
        &self,
        records: &[MessageRecord],
        started_at: DateTime<Utc>,
        stats: &mut CrawlStats,
    ) -> bool {
        if records.is_empty() {
            info!("no new messages in any channel, nothing to save");
            return true;
        }

        let mut values = Vec::with_capacity(records.len());
        for record in records {
            match record.to_keyed_value() {
                Ok(v) => values.push(v),
                Err(e) => {
                    stats.errors += 1;
                    warn!(
                        channel_id = record.channel_id,
                        msg_id = record.message_id,
                        error = %e,
                        "record serialization failed, skipping"
                    );
                }
            }
        }

        let path = artifact_path(&self.output_base, started_at);
        match self.artifacts.append(&path, &values).await {
            Ok(_) => {
                stats.artifact = Some(path);
                true
            }
            Err(e) => {
                stats.errors += 1;
                error!(path = %path.display(), error = %e, "failed to save records");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemorySource;
    use crate::adapters::persistence::json_artifact::JsonArtifact;
    use crate::adapters::persistence::watermark_file::WatermarkFile;
    use crate::domain::{ChatType, Dialog, SourceMessage};
    use chrono::TimeZone;
    use serde_json::Value;
    use tempfile::{TempDir, tempdir};

    const NEWS: i64 = 1111;
    const TEST: i64 = 2222;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn msg(channel_id: i64, id: i32, minutes_before_start: i64) -> SourceMessage {
        let mut m = SourceMessage::new(channel_id, id, start() - Duration::minutes(minutes_before_start));
        m.text = format!("post {}", id);
        m.is_post = true;
        m
    }

    struct Fixture {
        dir: TempDir,
        watermark: Arc<WatermarkFile>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let watermark = Arc::new(WatermarkFile::new(dir.path().join(".last_run")));
            Self { dir, watermark }
        }

        fn controller(&self, source: Arc<InMemorySource>, exclusions: &str) -> CrawlController {
            self.controller_with(source, exclusions, ScanDirection::NewestFirst)
        }

        fn controller_with(
            &self,
            source: Arc<InMemorySource>,
            exclusions: &str,
            direction: ScanDirection,
        ) -> CrawlController {
            CrawlController::new(
                source,
                self.watermark.clone(),
                Arc::new(JsonArtifact::new()),
                ExclusionList::parse(exclusions),
                self.dir.path().join(DEFAULT_OUTPUT_BASE),
                direction,
            )
        }

        fn read(&self, path: &Path) -> Vec<Value> {
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
        }
    }

    #[test]
    fn artifact_name_uses_jst_run_start() {
        let path = artifact_path(Path::new("out/telegram_messages.json"), start());
        assert_eq!(path, PathBuf::from("out/20240501_210000_telegram_messages.json"));
        let bare = artifact_path(Path::new("dump.json"), start());
        assert_eq!(bare, PathBuf::from("20240501_210000_dump.json"));
    }

    #[tokio::test]
    async fn records_new_messages_and_advances_watermark() {
        let fx = Fixture::new();
        fx.watermark.store(start() - Duration::hours(1)).await.unwrap();
        let source = Arc::new(
            InMemorySource::new()
                .with_channel(NEWS, "Daily News")
                .with_messages([msg(NEWS, 1, 120), msg(NEWS, 2, 30), msg(NEWS, 3, 5)]),
        );

        let stats = fx.controller(source, "").run_at(start()).await.unwrap();

        assert_eq!(stats.records, 2);
        assert_eq!(stats.channels_scanned, 1);
        let artifact = stats.artifact.unwrap();
        let entries = fx.read(&artifact);
        let ids: Vec<i64> = entries
            .iter()
            .map(|e| e[NEWS.to_string()]["message_id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![3, 2]);
        assert_eq!(entries[0][NEWS.to_string()]["channel_name"], "Daily News");
        assert_eq!(fx.watermark.load().await.unwrap(), Some(start()));
    }

    #[tokio::test]
    async fn excluded_channel_is_skipped_whole() {
        let fx = Fixture::new();
        let source = Arc::new(
            InMemorySource::new()
                .with_channel(NEWS, "Daily News")
                .with_channel(TEST, "My Test Channel")
                .with_messages([msg(NEWS, 1, 5), msg(TEST, 1, 5)]),
        );

        let stats = fx.controller(source, "Test, ,Foo").run_at(start()).await.unwrap();

        assert_eq!(stats.excluded, 1);
        assert_eq!(stats.records, 1);
        let entries = fx.read(&stats.artifact.unwrap());
        assert!(entries[0].get(NEWS.to_string()).is_some());
    }

    #[tokio::test]
    async fn empty_exclusion_list_excludes_nothing() {
        let fx = Fixture::new();
        let source = Arc::new(
            InMemorySource::new()
                .with_channel(NEWS, "Daily News")
                .with_message(msg(NEWS, 1, 5)),
        );
        let stats = fx.controller(source, " , ").run_at(start()).await.unwrap();
        assert_eq!(stats.excluded, 0);
        assert_eq!(stats.records, 1);
    }

    #[tokio::test]
    async fn zero_new_messages_writes_nothing_but_advances() {
        let fx = Fixture::new();
        let source = Arc::new(
            InMemorySource::new()
                .with_channel(NEWS, "Daily News")
                .with_message(msg(NEWS, 1, 60 * 48)),
        );
        let controller = fx.controller(source, "");

        let stats = controller.run_at(start()).await.unwrap();

        assert_eq!(stats.records, 0);
        assert_eq!(stats.without_new, 1);
        assert!(stats.artifact.is_none());
        assert!(!artifact_path(&fx.dir.path().join(DEFAULT_OUTPUT_BASE), start()).exists());
        assert_eq!(fx.watermark.load().await.unwrap(), Some(start()));

        // The next run's lower bound is the previous start.
        let later = start() + Duration::hours(1);
        let stats = controller.run_at(later).await.unwrap();
        assert_eq!(stats.records, 0);
        assert_eq!(fx.watermark.load().await.unwrap(), Some(later));
    }

    #[tokio::test]
    async fn message_at_watermark_is_not_new() {
        let fx = Fixture::new();
        let at = start() - Duration::minutes(10);
        fx.watermark.store(at).await.unwrap();
        let source = Arc::new(
            InMemorySource::new()
                .with_channel(NEWS, "Daily News")
                .with_messages([msg(NEWS, 1, 10), msg(NEWS, 2, 9)]),
        );
        let stats = fx.controller(source, "").run_at(start()).await.unwrap();
        assert_eq!(stats.records, 1);
    }

    #[tokio::test]
    async fn missing_or_corrupt_watermark_looks_back_a_day() {
        let fx = Fixture::new();
        std::fs::write(fx.watermark.path(), "yesterday-ish").unwrap();
        let source = Arc::new(
            InMemorySource::new()
                .with_channel(NEWS, "Daily News")
                .with_messages([msg(NEWS, 1, 25 * 60), msg(NEWS, 2, 23 * 60)]),
        );
        let stats = fx.controller(source, "").run_at(start()).await.unwrap();
        assert_eq!(stats.records, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(fx.watermark.load().await.unwrap(), Some(start()));
    }

    #[tokio::test]
    async fn absent_watermark_is_not_an_error() {
        let fx = Fixture::new();
        let source = Arc::new(
            InMemorySource::new()
                .with_channel(NEWS, "Daily News")
                .with_messages([msg(NEWS, 1, 25 * 60), msg(NEWS, 2, 23 * 60)]),
        );
        let stats = fx.controller(source, "").run_at(start()).await.unwrap();
        assert_eq!(stats.records, 1);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn newest_first_stops_at_first_old_message() {
        let fx = Fixture::new();
        fx.watermark.store(start() - Duration::hours(1)).await.unwrap();
        // Id 4 is the latest by id but carries an old date, so the scan stops there.
        let source = Arc::new(
            InMemorySource::new()
                .with_channel(NEWS, "Daily News")
                .with_messages([msg(NEWS, 1, 120), msg(NEWS, 2, 10), msg(NEWS, 3, 5), msg(NEWS, 4, 180)]),
        );
        let stats = fx.controller(source.clone(), "").run_at(start()).await.unwrap();
        assert_eq!(stats.records, 0);

        let fx = Fixture::new();
        fx.watermark.store(start() - Duration::hours(1)).await.unwrap();
        let stats = fx
            .controller_with(source, "", ScanDirection::OldestFirst)
            .run_at(start())
            .await
            .unwrap();
        assert_eq!(stats.records, 2);
    }

    #[tokio::test]
    async fn candidates_are_capped_per_channel() {
        let fx = Fixture::new();
        let history: Vec<SourceMessage> = (1..=150).map(|id| msg(NEWS, id, 1)).collect();
        let source = Arc::new(
            InMemorySource::new()
                .with_channel(NEWS, "Daily News")
                .with_messages(history),
        );
        let stats = fx.controller(source, "").run_at(start()).await.unwrap();
        assert_eq!(stats.records, CANDIDATE_CAP);
    }

    #[tokio::test]
    async fn failing_channel_is_counted_and_skipped() {
        let fx = Fixture::new();
        let source = Arc::new(
            InMemorySource::new()
                .with_channel(NEWS, "Daily News")
                .with_channel(TEST, "Weather")
                .with_messages([msg(NEWS, 1, 5), msg(TEST, 1, 5)])
                .with_failing_history(NEWS),
        );
        let stats = fx.controller(source, "").run_at(start()).await.unwrap();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.records, 1);
    }

    #[tokio::test]
    async fn non_channel_dialogs_are_ignored() {
        let fx = Fixture::new();
        let source = Arc::new(
            InMemorySource::new()
                .with_dialog(Dialog {
                    dialog_id: 42,
                    channel_id: None,
                    name: "Alice".into(),
                    username: None,
                    kind: ChatType::Private,
                })
                .with_channel(NEWS, "Daily News")
                .with_message(msg(NEWS, 1, 5)),
        );
        let stats = fx.controller(source, "").run_at(start()).await.unwrap();
        assert_eq!(stats.dialogs, 2);
        assert_eq!(stats.channels_scanned, 1);
    }

    struct BrokenArtifacts;

    #[async_trait::async_trait]
    impl ArtifactPort for BrokenArtifacts {
        async fn append(&self, _path: &Path, _records: &[Value]) -> Result<usize, DomainError> {
            Err(DomainError::Artifact("read-only filesystem".into()))
        }

        async fn read(&self, _path: &Path) -> Result<Vec<Value>, DomainError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn persist_failure_still_advances_watermark() {
        let fx = Fixture::new();
        let source = Arc::new(
            InMemorySource::new()
                .with_channel(NEWS, "Daily News")
                .with_message(msg(NEWS, 1, 5)),
        );
        let controller = CrawlController::new(
            source,
            fx.watermark.clone(),
            Arc::new(BrokenArtifacts),
            ExclusionList::default(),
            fx.dir.path().join(DEFAULT_OUTPUT_BASE),
            ScanDirection::NewestFirst,
        );
        let stats = controller.run_at(start()).await.unwrap();
        assert_eq!(stats.records, 1);
        assert_eq!(stats.errors, 1);
        assert!(stats.artifact.is_none());
        assert_eq!(fx.watermark.load().await.unwrap(), Some(start()));
    }
}
