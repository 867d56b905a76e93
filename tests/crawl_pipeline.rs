//! End-to-end: crawl into artifacts across runs, then download media from the records.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tg_crawler::adapters::memory::InMemorySource;
use tg_crawler::adapters::persistence::{json_artifact::JsonArtifact, watermark_file::WatermarkFile};
use tg_crawler::domain::{ExclusionList, ScanDirection, SenderAddress, SourceMedia, SourceMessage, UserEntity};
use tg_crawler::ports::WatermarkPort;
use tg_crawler::usecases::{CrawlController, DownloadPolicy, DownloadService};

const NEWS: i64 = 1111;
const ADS: i64 = 3333;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
}

fn post(channel_id: i64, id: i32, at: DateTime<Utc>) -> SourceMessage {
    let mut m = SourceMessage::new(channel_id, id, at);
    m.text = format!("post {}", id);
    m.is_post = true;
    m
}

fn read(path: &Path) -> Vec<Value> {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn two_runs_then_download_from_records() {
    let dir = tempfile::tempdir().unwrap();
    let watermark = Arc::new(WatermarkFile::new(dir.path().join(".last_run")));
    watermark.store(t0()).await.unwrap();

    let mut album_a = post(NEWS, 10, t0() + Duration::minutes(5));
    album_a.grouped_id = Some(77);
    album_a.media = Some(SourceMedia::Photo { id: 1 });
    let mut album_b = post(NEWS, 11, t0() + Duration::minutes(5));
    album_b.grouped_id = Some(77);
    album_b.media = Some(SourceMedia::Photo { id: 2 });
    let mut human = post(NEWS, 12, t0() + Duration::minutes(6));
    human.is_post = false;
    human.from = SenderAddress::User(500);

    let source = Arc::new(
        InMemorySource::new()
            .with_channel(NEWS, "Daily News")
            .with_channel(ADS, "Ads Channel")
            .with_user(UserEntity {
                id: 500,
                is_bot: false,
                username: Some("alice".into()),
                phone: None,
                first_name: Some("Alice".into()),
                last_name: None,
            })
            .with_messages([
                post(NEWS, 9, t0() - Duration::minutes(1)),
                album_a,
                album_b,
                human,
                post(ADS, 1, t0() + Duration::minutes(1)),
            ]),
    );

    let controller = CrawlController::new(
        source.clone(),
        watermark.clone(),
        Arc::new(JsonArtifact::new()),
        ExclusionList::parse("Ads"),
        dir.path().join("out").join("telegram_messages.json"),
        ScanDirection::NewestFirst,
    );

    let run1_start = t0() + Duration::hours(1);
    let run1 = controller.run_at(run1_start).await.unwrap();
    assert_eq!(run1.records, 3);
    assert_eq!(run1.excluded, 1);
    let artifact1 = run1.artifact.unwrap();
    assert_eq!(
        artifact1.file_name().unwrap().to_string_lossy(),
        "20240501_100000_telegram_messages.json"
    );
    let run1_entries = read(&artifact1);

    let human_record = run1_entries
        .iter()
        .map(|e| &e[NEWS.to_string()])
        .find(|r| r["message_id"] == 12)
        .unwrap();
    assert_eq!(human_record["from_id"]["peerUser"], 500);
    assert_eq!(human_record["bot"], false);
    assert_eq!(human_record["sender_user"]["username"], "alice");
    assert_eq!(human_record["JST_send_time"], "2024/05/01 09:06:00");

    // Run 2 sees only what arrived after run 1 started.
    source.insert_message(post(NEWS, 13, run1_start + Duration::minutes(1)));
    let run2_start = run1_start + Duration::hours(1);
    let run2 = controller.run_at(run2_start).await.unwrap();
    assert_eq!(run2.records, 1);
    assert_eq!(read(&artifact1), run1_entries);
    assert_eq!(read(&run2.artifact.unwrap()).len() + run1_entries.len(), 4);
    assert_eq!(watermark.load().await.unwrap(), Some(run2_start));

    // Both album records expand to the same album; existing files are skipped.
    let media_dir = dir.path().join("media");
    let downloads = DownloadService::new(
        source.clone(),
        Arc::new(JsonArtifact::new()),
        media_dir.clone(),
        DownloadPolicy::default(),
    );
    let summary = downloads.download_from_records(&artifact1).await.unwrap();
    assert_eq!(summary.downloaded, 2);
    assert_eq!(summary.skipped, 2);
    assert!(media_dir.join("1111_10.jpg").exists());
    assert!(media_dir.join("1111_11.jpg").exists());
}
