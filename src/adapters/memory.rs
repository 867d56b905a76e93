//! In-memory MessageSource. Holds dialogs, messages and users in maps and
//! replays scripted download outcomes.
//!
//! Backs use-case tests and offline dry runs; it never touches the network.

use crate::domain::{
    ChannelIdentity, ChatType, Dialog, DomainError, HistoryWindow, ScanDirection, SourceMessage,
    UserEntity, channel_key,
};
use crate::ports::MessageSource;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Scripted result of one `download_media` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedDownload {
    /// Write the file and return its path.
    Complete,
    /// Platform flood wait of this many seconds.
    FloodWait(u64),
    /// Never resolve; only a deadline ends the attempt.
    Hang,
    /// Generic transient failure.
    Fail(String),
    /// Write a truncated file, then fail like `Fail`.
    Partial(String),
    /// Disk full.
    StorageFull,
}

#[derive(Default)]
struct Inner {
    dialogs: Vec<Dialog>,
    messages: HashMap<i64, BTreeMap<i32, SourceMessage>>,
    users: HashMap<i64, UserEntity>,
    downloads: HashMap<(i64, i32), VecDeque<ScriptedDownload>>,
    failing_history: HashSet<i64>,
    failing_lookups: HashSet<(i64, i32)>,
    download_calls: HashMap<(i64, i32), usize>,
    lookups: usize,
}

/// In-memory message source.
#[derive(Default)]
pub struct InMemorySource {
    inner: Mutex<Inner>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a broadcast channel dialog.
    pub fn with_channel(self, channel_id: i64, name: &str) -> Self {
        self.with_dialog(Dialog {
            dialog_id: channel_key(channel_id).parse().unwrap_or(-channel_id),
            channel_id: Some(channel_id),
            name: name.to_string(),
            username: None,
            kind: ChatType::Channel,
        })
    }

    pub fn with_dialog(self, dialog: Dialog) -> Self {
        self.lock().dialogs.push(dialog);
        self
    }

    pub fn with_message(self, message: SourceMessage) -> Self {
        self.insert_message(message);
        self
    }

    pub fn with_messages(self, messages: impl IntoIterator<Item = SourceMessage>) -> Self {
        for m in messages {
            self.insert_message(m);
        }
        self
    }

    pub fn with_user(self, user: UserEntity) -> Self {
        self.lock().users.insert(user.id, user);
        self
    }

    /// Outcomes for successive downloads of one message. Once exhausted, downloads complete.
    pub fn with_download_script(
        self,
        channel_id: i64,
        message_id: i32,
        script: impl IntoIterator<Item = ScriptedDownload>,
    ) -> Self {
        self.lock()
            .downloads
            .insert((channel_id, message_id), script.into_iter().collect());
        self
    }

    /// History reads for this channel fail with a gateway error.
    pub fn with_failing_history(self, channel_id: i64) -> Self {
        self.lock().failing_history.insert(channel_id);
        self
    }

    /// Single-message lookups of this id fail with a gateway error.
    pub fn with_failing_lookup(self, channel_id: i64, message_id: i32) -> Self {
        self.lock().failing_lookups.insert((channel_id, message_id));
        self
    }

    /// Add a message after construction (e.g. between two crawl runs).
    pub fn insert_message(&self, message: SourceMessage) {
        self.lock()
            .messages
            .entry(message.channel_id)
            .or_default()
            .insert(message.id, message);
    }

    /// Number of `download_media` calls seen for one message.
    pub fn download_calls(&self, channel_id: i64, message_id: i32) -> usize {
        self.lock()
            .download_calls
            .get(&(channel_id, message_id))
            .copied()
            .unwrap_or(0)
    }

    /// Number of single-message lookups served.
    pub fn lookups(&self) -> usize {
        self.lock().lookups
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-call; the data is still usable.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl MessageSource for InMemorySource {
    async fn list_channels(&self) -> Result<Vec<Dialog>, DomainError> {
        Ok(self.lock().dialogs.clone())
    }

    async fn get_channel(&self, channel_id: i64) -> Result<ChannelIdentity, DomainError> {
        self.lock()
            .dialogs
            .iter()
            .find(|d| d.channel_id == Some(channel_id))
            .map(|d| ChannelIdentity {
                numeric_id: channel_id,
                display_name: d.name.clone(),
                public_handle: d.username.clone(),
            })
            .ok_or_else(|| DomainError::Resolution(format!("channel {} not found", channel_id)))
    }

    async fn get_user(&self, user_id: i64) -> Result<UserEntity, DomainError> {
        self.lock()
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| DomainError::Resolution(format!("user {} not found", user_id)))
    }

    async fn get_message(
        &self,
        channel_id: i64,
        message_id: i32,
    ) -> Result<Option<SourceMessage>, DomainError> {
        let mut inner = self.lock();
        inner.lookups += 1;
        if inner.failing_lookups.contains(&(channel_id, message_id)) {
            return Err(DomainError::TgGateway(format!(
                "lookup of {}/{} failed",
                channel_id, message_id
            )));
        }
        Ok(inner
            .messages
            .get(&channel_id)
            .and_then(|m| m.get(&message_id))
            .cloned())
    }

    async fn iter_messages(
        &self,
        channel_id: i64,
        window: HistoryWindow,
    ) -> Result<Vec<SourceMessage>, DomainError> {
        let inner = self.lock();
        if inner.failing_history.contains(&channel_id) {
            return Err(DomainError::TgGateway(format!(
                "history unavailable for {}",
                channel_id
            )));
        }
        let Some(history) = inner.messages.get(&channel_id) else {
            return Ok(Vec::new());
        };
        let out = match window.direction {
            ScanDirection::NewestFirst => history
                .values()
                .rev()
                .filter(|m| window.offset_date.is_none_or(|d| m.date < d))
                .take(window.limit)
                .cloned()
                .collect(),
            ScanDirection::OldestFirst => history
                .values()
                .filter(|m| window.offset_date.is_none_or(|d| m.date > d))
                .take(window.limit)
                .cloned()
                .collect(),
        };
        Ok(out)
    }

    async fn download_media(
        &self,
        message: &SourceMessage,
        dest_dir: &Path,
    ) -> Result<PathBuf, DomainError> {
        let key = (message.channel_id, message.id);
        let step = {
            let mut inner = self.lock();
            *inner.download_calls.entry(key).or_default() += 1;
            inner
                .downloads
                .get_mut(&key)
                .and_then(VecDeque::pop_front)
                .unwrap_or(ScriptedDownload::Complete)
        };
        match step {
            ScriptedDownload::Complete => {
                let media = message
                    .media
                    .as_ref()
                    .ok_or_else(|| DomainError::Media("message has no media".into()))?;
                let path = dest_dir.join(media.file_name(message.channel_id, message.id));
                // Synchronous write keeps paused-clock tests from auto-advancing mid-write.
                std::fs::write(&path, b"media").map_err(|e| DomainError::from_io(&e))?;
                Ok(path)
            }
            ScriptedDownload::FloodWait(seconds) => Err(DomainError::FloodWait { seconds }),
            ScriptedDownload::Hang => {
                std::future::pending::<()>().await;
                Err(DomainError::Media("unreachable".into()))
            }
            ScriptedDownload::Fail(reason) => Err(DomainError::Media(reason)),
            ScriptedDownload::Partial(reason) => {
                if let Some(media) = &message.media {
                    let path = dest_dir.join(media.file_name(message.channel_id, message.id));
                    std::fs::write(&path, b"par").map_err(|e| DomainError::from_io(&e))?;
                }
                Err(DomainError::Media(reason))
            }
            ScriptedDownload::StorageFull => Err(DomainError::StorageExhausted(
                "No space left on device".into(),
            )),
        }
    }
}
