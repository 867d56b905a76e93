//! Outbound ports. Application calls into infrastructure.
//!
//! Implemented by adapters.

use crate::domain::{
    ChannelIdentity, Dialog, DomainError, HistoryWindow, SignInResult, SourceMessage, UserEntity,
};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Message retrieval contract shared by the crawler, the album resolver and downloads.
///
/// Channel ids are native (positive) ids throughout.
#[async_trait::async_trait]
pub trait MessageSource: Send + Sync {
    /// Every dialog visible to the account, pinned dialogs excluded.
    async fn list_channels(&self) -> Result<Vec<Dialog>, DomainError>;

    /// Look up one channel by id.
    async fn get_channel(&self, channel_id: i64) -> Result<ChannelIdentity, DomainError>;

    /// Look up one user by id.
    async fn get_user(&self, user_id: i64) -> Result<UserEntity, DomainError>;

    /// The message with this id, or `None` when it does not exist (deleted or beyond history).
    async fn get_message(
        &self,
        channel_id: i64,
        message_id: i32,
    ) -> Result<Option<SourceMessage>, DomainError>;

    /// A finite window of history. Order follows `window.direction`.
    async fn iter_messages(
        &self,
        channel_id: i64,
        window: HistoryWindow,
    ) -> Result<Vec<SourceMessage>, DomainError>;

    /// Download the message's media into `dest_dir`; returns the written file.
    async fn download_media(
        &self,
        message: &SourceMessage,
        dest_dir: &Path,
    ) -> Result<PathBuf, DomainError>;
}

/// Persisted crawl watermark.
#[async_trait::async_trait]
pub trait WatermarkPort: Send + Sync {
    /// Stored watermark; `Ok(None)` when absent. Corrupt data is an `Err(Serialization)`.
    async fn load(&self) -> Result<Option<DateTime<Utc>>, DomainError>;

    /// Overwrite the stored watermark.
    async fn store(&self, at: DateTime<Utc>) -> Result<(), DomainError>;
}

/// Output artifact: a JSON array of channel-keyed records.
#[async_trait::async_trait]
pub trait ArtifactPort: Send + Sync {
    /// Read-merge-write `records` onto the artifact at `path`. Returns the merged length.
    async fn append(
        &self,
        path: &Path,
        records: &[serde_json::Value],
    ) -> Result<usize, DomainError>;

    /// Read every entry of the artifact at `path`.
    async fn read(&self, path: &Path) -> Result<Vec<serde_json::Value>, DomainError>;
}

/// Account authorization against the platform. Implemented by the Telegram auth adapter.
#[async_trait::async_trait]
pub trait AuthPort: Send + Sync {
    async fn is_authenticated(&self) -> Result<bool, DomainError>;

    /// Ask the platform to send a login code to `phone`.
    async fn request_login_code(&self, phone: &str, api_hash: &str) -> Result<(), DomainError>;

    /// Submit the code received after `request_login_code`.
    async fn sign_in(&self, code: &str) -> Result<SignInResult, DomainError>;

    /// Submit the two-step verification password after `PasswordRequired`.
    async fn check_password(&self, password: &[u8]) -> Result<(), DomainError>;
}

/// Interactive credential entry (terminal prompts).
pub trait LoginPrompt: Send + Sync {
    fn phone(&self) -> Result<String, DomainError>;
    fn code(&self) -> Result<String, DomainError>;
    fn password(&self, hint: Option<&str>) -> Result<String, DomainError>;
}
