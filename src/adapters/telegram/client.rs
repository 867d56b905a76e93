//! Implements MessageSource using grammers Client.
//!
//! History, single-message lookups and user refreshes use raw TL invokes.
//! Peers are cached by native channel id so lookups do not re-walk the dialog
//! list (avoids FLOOD_WAIT). Lookup requests sleep through FloodWait themselves;
//! downloads report it to the caller, whose executor owns the waiting.

use crate::adapters::telegram::mapper::{self, SenderIndex};
use crate::domain::{
    ChannelIdentity, Dialog, DomainError, HistoryWindow, ScanDirection, SourceMessage, UserEntity,
    channel_key,
};
use crate::ports::MessageSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grammers_client::Client;
use grammers_client::InvocationError;
use grammers_client::peer::Peer;
use grammers_client::tl;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One history request returns at most this many messages.
const MAX_HISTORY_PAGE: usize = 100;
/// FloodWait sleeps tolerated per lookup request before giving up.
const LOOKUP_FLOOD_RETRIES: u32 = 3;

/// Telegram message source. Clone of the session's client; no global lock.
pub struct GrammersSource {
    client: Client,
    /// Native channel id -> dialog peer.
    peers: Mutex<HashMap<i64, Peer>>,
    channels: Mutex<HashMap<i64, ChannelIdentity>>,
    /// Users seen in responses: entity plus access hash for `users.getUsers`.
    users: Mutex<HashMap<i64, (UserEntity, Option<i64>)>>,
}

impl GrammersSource {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            peers: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            users: Mutex::new(HashMap::new()),
        }
    }

    /// Invoke with FloodWait handling: sleep and retry a bounded number of times.
    async fn invoke<R: tl::RemoteCall>(&self, req: &R) -> Result<R::Return, DomainError> {
        let mut last_wait = 0;
        for attempt in 1..=LOOKUP_FLOOD_RETRIES {
            match self.client.invoke(req).await {
                Ok(res) => return Ok(res),
                Err(InvocationError::Rpc(rpc)) if rpc.code == 420 => {
                    let wait_secs = rpc.value.unwrap_or(60) as u64;
                    warn!(attempt, wait_secs, "FloodWait, sleeping");
                    tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                    last_wait = wait_secs;
                }
                Err(e) => return Err(DomainError::TgGateway(e.to_string())),
            }
        }
        Err(DomainError::FloodWait { seconds: last_wait })
    }

    /// Walk the dialog list once, refreshing the peer and channel caches.
    async fn load_dialogs(&self) -> Result<Vec<Dialog>, DomainError> {
        let mut dialogs = self.client.iter_dialogs();
        let mut out = Vec::new();
        let mut peers = HashMap::new();
        let mut channels = HashMap::new();
        while let Some(dialog) = dialogs
            .next()
            .await
            .map_err(|e| DomainError::TgGateway(e.to_string()))?
        {
            if mapper::is_pinned(&dialog.raw) {
                continue;
            }
            let peer = dialog.peer();
            let d = mapper::dialog_from_peer(peer);
            if let Some(channel_id) = d.channel_id {
                peers.insert(channel_id, peer.clone());
                channels.insert(
                    channel_id,
                    ChannelIdentity {
                        numeric_id: channel_id,
                        display_name: d.name.clone(),
                        public_handle: d.username.clone(),
                    },
                );
            }
            out.push(d);
        }
        debug!(dialogs = out.len(), channels = channels.len(), "dialog list loaded");
        self.peers.lock().await.extend(peers);
        self.channels.lock().await.extend(channels);
        Ok(out)
    }

    async fn peer(&self, channel_id: i64) -> Result<Peer, DomainError> {
        if let Some(peer) = self.peers.lock().await.get(&channel_id) {
            return Ok(peer.clone());
        }
        self.load_dialogs().await?;
        self.peers
            .lock()
            .await
            .get(&channel_id)
            .cloned()
            .ok_or_else(|| {
                DomainError::Resolution(format!("channel {} not in dialogs", channel_key(channel_id)))
            })
    }

    async fn input_peer(&self, channel_id: i64) -> Result<tl::enums::InputPeer, DomainError> {
        let peer = self.peer(channel_id).await?;
        let peer_ref = peer
            .to_ref()
            .await
            .ok_or_else(|| DomainError::Resolution("peer not in session cache".into()))?;
        Ok(peer_ref.into())
    }

    async fn input_channel(&self, channel_id: i64) -> Result<tl::enums::InputChannel, DomainError> {
        match self.input_peer(channel_id).await? {
            tl::enums::InputPeer::Channel(c) => Ok(tl::types::InputChannel {
                channel_id: c.channel_id,
                access_hash: c.access_hash,
            }
            .into()),
            _ => Err(DomainError::Resolution(format!(
                "{} is not a channel",
                channel_key(channel_id)
            ))),
        }
    }

    /// Map a `messages.Messages` response, caching the users it carries.
    async fn messages_from_response(
        &self,
        raw: tl::enums::messages::Messages,
        channel_id: i64,
    ) -> Vec<SourceMessage> {
        use tl::enums::messages::Messages;

        let (messages, users, chats) = match raw {
            Messages::Messages(m) => (m.messages, m.users, m.chats),
            Messages::Slice(m) => (m.messages, m.users, m.chats),
            Messages::ChannelMessages(m) => (m.messages, m.users, m.chats),
            Messages::NotModified(_) => return Vec::new(),
        };
        let index = SenderIndex::from_response(&users, &chats);
        {
            let mut cache = self.users.lock().await;
            for (id, user) in &index.users {
                cache.insert(*id, (user.clone(), index.user_hashes.get(id).copied()));
            }
        }
        messages
            .iter()
            .filter_map(|m| mapper::message_from_tl(m, channel_id, &index))
            .collect()
    }
}

fn unix_seconds(at: Option<DateTime<Utc>>) -> i32 {
    at.map(|d| i32::try_from(d.timestamp()).unwrap_or(i32::MAX))
        .unwrap_or(0)
}

/// Map a download failure. Disk full and flood waits keep their meaning.
fn download_error(e: impl std::fmt::Display) -> DomainError {
    let text = e.to_string();
    if text.contains("No space left") || text.contains("os error 28") {
        DomainError::StorageExhausted(text)
    } else if let Some(seconds) = mapper::flood_wait_from_text(&text) {
        DomainError::FloodWait { seconds }
    } else {
        DomainError::Media(text)
    }
}

#[async_trait]
impl MessageSource for GrammersSource {
    async fn list_channels(&self) -> Result<Vec<Dialog>, DomainError> {
        let dialogs = self.load_dialogs().await?;
        info!(dialogs = dialogs.len(), "dialogs fetched");
        Ok(dialogs)
    }

    async fn get_channel(&self, channel_id: i64) -> Result<ChannelIdentity, DomainError> {
        if let Some(c) = self.channels.lock().await.get(&channel_id) {
            return Ok(c.clone());
        }
        self.load_dialogs().await?;
        self.channels
            .lock()
            .await
            .get(&channel_id)
            .cloned()
            .ok_or_else(|| DomainError::Resolution(format!("channel {} not found", channel_id)))
    }

    async fn get_user(&self, user_id: i64) -> Result<UserEntity, DomainError> {
        let cached = self.users.lock().await.get(&user_id).cloned();
        let Some((user, access_hash)) = cached else {
            return Err(DomainError::Resolution(format!("user {} not seen in any response", user_id)));
        };
        let Some(access_hash) = access_hash else {
            return Ok(user);
        };
        let req = tl::functions::users::GetUsers {
            id: vec![tl::types::InputUser {
                user_id,
                access_hash,
            }
            .into()],
        };
        let fetched = self.invoke(&req).await?;
        let refreshed = fetched
            .iter()
            .find_map(mapper::user_from_tl)
            .ok_or_else(|| DomainError::Resolution(format!("user {} not returned", user_id)))?;
        self.users
            .lock()
            .await
            .insert(user_id, (refreshed.clone(), Some(access_hash)));
        Ok(refreshed)
    }

    async fn get_message(
        &self,
        channel_id: i64,
        message_id: i32,
    ) -> Result<Option<SourceMessage>, DomainError> {
        let channel = self.input_channel(channel_id).await?;
        let req = tl::functions::channels::GetMessages {
            channel,
            id: vec![tl::types::InputMessageId { id: message_id }.into()],
        };
        let raw = self.invoke(&req).await?;
        Ok(self
            .messages_from_response(raw, channel_id)
            .await
            .into_iter()
            .find(|m| m.id == message_id))
    }

    async fn iter_messages(
        &self,
        channel_id: i64,
        window: HistoryWindow,
    ) -> Result<Vec<SourceMessage>, DomainError> {
        let limit = window.limit.min(MAX_HISTORY_PAGE);
        let peer = self.input_peer(channel_id).await?;
        // Oldest-first reads the page just after offset_date (negative add_offset),
        // which the server still returns newest-first.
        let add_offset = match window.direction {
            ScanDirection::NewestFirst => 0,
            ScanDirection::OldestFirst => -(limit as i32),
        };
        let req = tl::functions::messages::GetHistory {
            peer,
            offset_id: 0,
            offset_date: unix_seconds(window.offset_date),
            add_offset,
            limit: limit as i32,
            max_id: 0,
            min_id: 0,
            hash: 0,
        };
        let raw = self.invoke(&req).await?;
        let mut messages = self.messages_from_response(raw, channel_id).await;
        messages.sort_by_key(|m| std::cmp::Reverse(m.id));
        if window.direction == ScanDirection::OldestFirst {
            messages.reverse();
            if let Some(cut) = window.offset_date {
                messages.retain(|m| m.date > cut);
            }
        }
        debug!(channel_id, count = messages.len(), direction = ?window.direction, "history fetched");
        Ok(messages)
    }

    async fn download_media(
        &self,
        message: &SourceMessage,
        dest_dir: &Path,
    ) -> Result<PathBuf, DomainError> {
        let media_info = message
            .media
            .as_ref()
            .ok_or_else(|| DomainError::Media("message has no media".into()))?;
        let dest = dest_dir.join(media_info.file_name(message.channel_id, message.id));

        let peer_ref = self
            .peer(message.channel_id)
            .await?
            .to_ref()
            .await
            .ok_or_else(|| DomainError::Media("peer not in session cache".into()))?;
        let fetched = self
            .client
            .get_messages_by_id(peer_ref, &[message.id])
            .await
            .map_err(download_error)?;
        let msg = fetched
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| DomainError::Media("message not found".into()))?;
        let media = msg
            .media()
            .ok_or_else(|| DomainError::Media("message has no media".into()))?;

        self.client
            .download_media(&media, &dest)
            .await
            .map_err(download_error)?;

        debug!(
            channel_id = message.channel_id,
            msg_id = message.id,
            path = %dest.display(),
            "media written"
        );
        Ok(dest)
    }
}
