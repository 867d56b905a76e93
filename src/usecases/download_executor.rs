//! Drives one media download to completion or terminal failure.
//!
//! - Flood waits sleep the platform-given duration and retry the same attempt.
//! - Deadline and other transient errors back off `2^attempt` seconds.
//! - Storage exhaustion aborts at once.
//!
//! No partial-file cleanup: after a failure the destination may hold a partial file.

use crate::domain::{DomainError, SourceMedia, SourceMessage};
use crate::ports::MessageSource;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Files above this size get an advisory log line.
pub const LARGE_FILE_BYTES: i64 = 100 * 1024 * 1024;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Retry budget and per-attempt deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadPolicy {
    pub max_retries: u32,
    pub deadline: Duration,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            deadline: Duration::from_secs(300),
        }
    }
}

/// Sleep before retrying after failed attempt `attempt` (1-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt))
}

/// Per-message attempt state. Lives for one `fetch` call.
#[derive(Debug)]
struct DownloadAttempt {
    channel_id: i64,
    message_id: i32,
    number: u32,
    flood_waits: u32,
}

/// Download executor. Stateless between calls.
pub struct DownloadExecutor {
    source: Arc<dyn MessageSource>,
}

impl DownloadExecutor {
    pub fn new(source: Arc<dyn MessageSource>) -> Self {
        Self { source }
    }

    /// Download `message`'s media into `dest_dir`, retrying per `policy`.
    pub async fn fetch(
        &self,
        message: &SourceMessage,
        dest_dir: &Path,
        policy: DownloadPolicy,
    ) -> Result<PathBuf, DomainError> {
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| DomainError::from_io(&e))?;

        let max_retries = policy.max_retries.max(1);
        let mut attempt = DownloadAttempt {
            channel_id: message.channel_id,
            message_id: message.id,
            number: 1,
            flood_waits: 0,
        };

        loop {
            if let Some(size) = message.media.as_ref().and_then(SourceMedia::size) {
                let size_mb = size as f64 / BYTES_PER_MB;
                debug!(
                    channel_id = attempt.channel_id,
                    msg_id = attempt.message_id,
                    attempt = attempt.number,
                    size_mb = format!("{:.2}", size_mb),
                    "downloading"
                );
                if size > LARGE_FILE_BYTES {
                    warn!(
                        channel_id = attempt.channel_id,
                        msg_id = attempt.message_id,
                        size_mb = format!("{:.2}", size_mb),
                        "large file, download may take a while"
                    );
                }
            }

            let outcome =
                match tokio::time::timeout(policy.deadline, self.source.download_media(message, dest_dir))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(DomainError::DeadlineExceeded {
                        seconds: policy.deadline.as_secs(),
                    }),
                };

            match outcome {
                Ok(path) => {
                    info!(
                        channel_id = attempt.channel_id,
                        msg_id = attempt.message_id,
                        attempt = attempt.number,
                        flood_waits = attempt.flood_waits,
                        path = %path.display(),
                        "media downloaded"
                    );
                    return Ok(path);
                }
                Err(DomainError::FloodWait { seconds }) => {
                    attempt.flood_waits += 1;
                    warn!(
                        channel_id = attempt.channel_id,
                        msg_id = attempt.message_id,
                        attempt = attempt.number,
                        wait_secs = seconds,
                        "FloodWait, sleeping"
                    );
                    tokio::time::sleep(Duration::from_secs(seconds)).await;
                }
                Err(e) if e.is_fatal() => {
                    error!(
                        channel_id = attempt.channel_id,
                        msg_id = attempt.message_id,
                        attempt = attempt.number,
                        error = %e,
                        "fatal download error, not retrying"
                    );
                    return Err(e);
                }
                Err(e) if attempt.number < max_retries => {
                    let delay = backoff_delay(attempt.number);
                    warn!(
                        channel_id = attempt.channel_id,
                        msg_id = attempt.message_id,
                        attempt = attempt.number,
                        max_retries,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "download attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt.number += 1;
                }
                Err(e) => {
                    error!(
                        channel_id = attempt.channel_id,
                        msg_id = attempt.message_id,
                        attempts = attempt.number,
                        error = %e,
                        "download failed after all attempts"
                    );
                    return Err(e);
                }
            }
        }
    }
}
