//! Maps one retrieved message into a `MessageRecord`.
//!
//! Bot detection precedence: explicit sender flag, then bot-relay marker, then
//! channel-post marker, then an explicit user lookup, then "not a bot".

use crate::domain::{
    ChannelIdentity, DownloadCoordinates, EntityKind, EntityRecord, MediaDescriptor, MediaKind,
    MessageRecord, Sender, SenderDescriptor, SourceMedia, SourceMessage, TextEntity, UserEntity,
    UserProfile,
};
use crate::ports::MessageSource;
use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

/// UTC+9, the offset every record timestamp is rendered in.
const JST_OFFSET_SECS: i32 = 9 * 3600;
const JST_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Render a UTC instant as JST wall-clock time (`%Y/%m/%d %H:%M:%S`).
pub fn to_jst_string(at: DateTime<Utc>) -> String {
    at.with_timezone(&jst()).format(JST_FORMAT).to_string()
}

pub(crate) fn jst() -> FixedOffset {
    FixedOffset::east_opt(JST_OFFSET_SECS).expect("UTC+9 is a valid offset")
}

/// Message transformer. Uses the source only for the user-lookup fallback.
pub struct MessageTransformer {
    source: Arc<dyn MessageSource>,
    lookup_failures: AtomicUsize,
}

impl MessageTransformer {
    pub fn new(source: Arc<dyn MessageSource>) -> Self {
        Self {
            source,
            lookup_failures: AtomicUsize::new(0),
        }
    }

    /// Sender lookups that failed and fell back to "not a bot".
    pub fn lookup_failures(&self) -> usize {
        self.lookup_failures.load(Ordering::Relaxed)
    }

    pub async fn transform(&self, msg: &SourceMessage, channel: &ChannelIdentity) -> MessageRecord {
        MessageRecord {
            channel_id: msg.channel_id,
            channel_name: channel.display_name.clone(),
            message_id: msg.id,
            text: msg.text.clone(),
            geo: msg.geo,
            sent_at: to_jst_string(msg.date),
            author_display: msg.post_author.clone(),
            media: media_descriptor(msg),
            entities: entity_records(&msg.text, &msg.entities),
            sender: self.sender_descriptor(msg).await,
        }
    }

    async fn sender_descriptor(&self, msg: &SourceMessage) -> SenderDescriptor {
        let (is_bot, profile) = match &msg.sender {
            Some(Sender::User(user)) => classify_user(user),
            Some(Sender::Chat { .. } | Sender::Channel { .. }) => (false, None),
            None if msg.via_bot_id.is_some() => (true, None),
            None if msg.is_post => (false, None),
            None => match msg.from.user_id() {
                Some(user_id) => match self.source.get_user(user_id).await {
                    Ok(user) => classify_user(&user),
                    Err(e) => {
                        self.lookup_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            channel_id = msg.channel_id,
                            msg_id = msg.id,
                            user_id,
                            error = %e,
                            "sender lookup failed, assuming not a bot"
                        );
                        (false, None)
                    }
                },
                None => (false, None),
            },
        };
        SenderDescriptor {
            address: msg.from,
            profile,
            is_bot,
        }
    }
}

fn classify_user(user: &UserEntity) -> (bool, Option<UserProfile>) {
    if user.is_bot {
        return (true, None);
    }
    let profile = UserProfile {
        id: user.id,
        username: user.username.clone(),
        phone: user.phone.clone(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
    };
    (false, Some(profile))
}

fn media_descriptor(msg: &SourceMessage) -> Option<MediaDescriptor> {
    let kind = match msg.media.as_ref()? {
        SourceMedia::Photo { id } => MediaKind::Photo { photo_id: *id },
        SourceMedia::Video {
            id, duration, size, ..
        } => MediaKind::Video {
            video_id: *id,
            duration: *duration,
            file_size: *size,
        },
        SourceMedia::Document {
            id,
            mime_type,
            file_name,
            size,
        } => MediaKind::Document {
            document_id: *id,
            mime_type: mime_type.clone(),
            file_name: file_name.clone(),
            file_size: *size,
        },
        SourceMedia::Other { class } => MediaKind::Other {
            media_class: class.clone(),
        },
    };
    Some(MediaDescriptor {
        kind,
        grouped_id: msg.grouped_id,
        is_grouped: msg.grouped_id.is_some(),
        message_id: msg.id,
        channel_id: msg.channel_id,
        download_info: DownloadCoordinates {
            channel_id: msg.channel_id,
            message_id: msg.id,
            grouped_id: msg.grouped_id,
        },
    })
}

fn entity_records(text: &str, entities: &[TextEntity]) -> Vec<EntityRecord> {
    entities
        .iter()
        .filter(|e| !e.kind.is_decoration())
        .map(|e| {
            let url = match e.kind {
                EntityKind::Url => utf16_slice(text, e.offset, e.length).or_else(|| e.url.clone()),
                _ => e.url.clone(),
            };
            EntityRecord {
                kind: e.kind.type_name().to_string(),
                offset: e.offset,
                length: e.length,
                url,
                user_id: e.user_id,
            }
        })
        .collect()
}

/// Slice `text` by UTF-16 offset/length, the unit the platform reports entities in.
fn utf16_slice(text: &str, offset: i32, length: i32) -> Option<String> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(usize::try_from(length).ok()?)?;
    let units: Vec<u16> = text.encode_utf16().collect();
    units.get(start..end).map(String::from_utf16_lossy)
}
