//! Domain entities. Pure data structures for the core business.
//!
//! No Telegram/IO types here; adapters map into these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Offset between a channel's native id and its bot-API dialog id (`-100…`).
pub const CHANNEL_DIALOG_OFFSET: i64 = 1_000_000_000_000;

/// Kind of dialog as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatType {
    /// Broadcast channels and supergroups are both addressed as channels.
    pub fn is_channel(self) -> bool {
        matches!(self, ChatType::Supergroup | ChatType::Channel)
    }
}

/// One entry of the account's dialog list (pinned dialogs never appear here).
#[derive(Debug, Clone)]
pub struct Dialog {
    /// Bot-API style id (`-100…` for channels).
    pub dialog_id: i64,
    /// Native positive channel id; `None` for users and basic groups.
    pub channel_id: Option<i64>,
    pub name: String,
    pub username: Option<String>,
    pub kind: ChatType,
}

/// A visible channel. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelIdentity {
    pub numeric_id: i64,
    pub display_name: String,
    pub public_handle: Option<String>,
}

impl ChannelIdentity {
    /// Normalized directory key: `"-100" + numeric_id`.
    pub fn key(&self) -> String {
        channel_key(self.numeric_id)
    }

    pub fn public_url(&self) -> Option<String> {
        self.public_handle.as_ref().map(|h| format!("t.me/{}", h))
    }
}

/// Normalized key for a native channel id. Non-positive ids are kept verbatim.
pub fn channel_key(numeric_id: i64) -> String {
    if numeric_id > 0 {
        format!("-100{}", numeric_id)
    } else {
        numeric_id.to_string()
    }
}

/// Accepts either a native channel id or a bot-API `-100…` id and returns the native id.
pub fn native_channel_id(raw: i64) -> i64 {
    if raw <= -CHANNEL_DIALOG_OFFSET {
        -raw - CHANNEL_DIALOG_OFFSET
    } else {
        raw.abs()
    }
}

/// Structural addressing of a message: who it is "from".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderAddress {
    User(i64),
    Chat(i64),
    Channel(i64),
    Anonymous,
}

impl SenderAddress {
    pub fn user_id(self) -> Option<i64> {
        match self {
            SenderAddress::User(id) => Some(id),
            _ => None,
        }
    }
}

/// A user account as resolved by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntity {
    pub id: i64,
    pub is_bot: bool,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Sender object attached to a retrieved message, when the platform resolved one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sender {
    User(UserEntity),
    Chat { id: i64, title: String },
    Channel { id: i64, title: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub long: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_radius: Option<i32>,
}

/// Media attached to a retrieved message.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceMedia {
    Photo {
        id: i64,
    },
    Video {
        id: i64,
        duration: Option<f64>,
        mime_type: Option<String>,
        size: Option<i64>,
    },
    Document {
        id: i64,
        mime_type: Option<String>,
        file_name: Option<String>,
        size: Option<i64>,
    },
    /// Anything else (web page preview, poll, contact, …). Carries the platform class name.
    Other {
        class: String,
    },
}

impl SourceMedia {
    /// Size in bytes when the platform reports one.
    pub fn size(&self) -> Option<i64> {
        match self {
            SourceMedia::Video { size, .. } | SourceMedia::Document { size, .. } => *size,
            _ => None,
        }
    }

    /// File name used when the media is saved to disk.
    pub fn file_name(&self, channel_id: i64, message_id: i32) -> String {
        match self {
            SourceMedia::Document {
                file_name: Some(name),
                ..
            } if !name.trim().is_empty() => {
                format!("{}_{}_{}", channel_id, message_id, sanitize_file_name(name))
            }
            other => format!("{}_{}.{}", channel_id, message_id, other.extension()),
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            SourceMedia::Photo { .. } => "jpg",
            SourceMedia::Video { .. } => "mp4",
            SourceMedia::Document { .. } | SourceMedia::Other { .. } => "bin",
        }
    }
}

/// Platform-supplied names must stay a single path component.
fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Text entity kinds the platform reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKind {
    Mention,
    Hashtag,
    Cashtag,
    BotCommand,
    Url,
    Email,
    Phone,
    Bold,
    Italic,
    Underline,
    Strike,
    Spoiler,
    Code,
    Pre,
    Blockquote,
    TextUrl,
    MentionName,
    BankCard,
    CustomEmoji,
    Unknown,
}

impl EntityKind {
    /// Platform class name, as stored in records.
    pub fn type_name(&self) -> &'static str {
        match self {
            EntityKind::Mention => "MessageEntityMention",
            EntityKind::Hashtag => "MessageEntityHashtag",
            EntityKind::Cashtag => "MessageEntityCashtag",
            EntityKind::BotCommand => "MessageEntityBotCommand",
            EntityKind::Url => "MessageEntityUrl",
            EntityKind::Email => "MessageEntityEmail",
            EntityKind::Phone => "MessageEntityPhone",
            EntityKind::Bold => "MessageEntityBold",
            EntityKind::Italic => "MessageEntityItalic",
            EntityKind::Underline => "MessageEntityUnderline",
            EntityKind::Strike => "MessageEntityStrike",
            EntityKind::Spoiler => "MessageEntitySpoiler",
            EntityKind::Code => "MessageEntityCode",
            EntityKind::Pre => "MessageEntityPre",
            EntityKind::Blockquote => "MessageEntityBlockquote",
            EntityKind::TextUrl => "MessageEntityTextUrl",
            EntityKind::MentionName => "MessageEntityMentionName",
            EntityKind::BankCard => "MessageEntityBankCard",
            EntityKind::CustomEmoji => "MessageEntityCustomEmoji",
            EntityKind::Unknown => "MessageEntityUnknown",
        }
    }

    /// Purely stylistic kinds that records leave out.
    pub fn is_decoration(&self) -> bool {
        matches!(self, EntityKind::Bold | EntityKind::CustomEmoji)
    }
}

/// A formatting/link entity. Offsets and lengths are UTF-16 code units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEntity {
    pub kind: EntityKind,
    pub offset: i32,
    pub length: i32,
    pub url: Option<String>,
    pub user_id: Option<i64>,
}

/// A message as retrieved from the source, before it becomes a record.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMessage {
    pub id: i32,
    /// Native id of the channel the message lives in.
    pub channel_id: i64,
    pub date: DateTime<Utc>,
    pub text: String,
    pub geo: Option<GeoPoint>,
    pub post_author: Option<String>,
    pub grouped_id: Option<i64>,
    pub from: SenderAddress,
    pub sender: Option<Sender>,
    pub via_bot_id: Option<i64>,
    /// Posted by the channel itself (broadcast post).
    pub is_post: bool,
    pub media: Option<SourceMedia>,
    pub entities: Vec<TextEntity>,
}

impl SourceMessage {
    /// Minimal text message; used by adapters and tests as a starting point.
    pub fn new(channel_id: i64, id: i32, date: DateTime<Utc>) -> Self {
        Self {
            id,
            channel_id,
            date,
            text: String::new(),
            geo: None,
            post_author: None,
            grouped_id: None,
            from: SenderAddress::Anonymous,
            sender: None,
            via_bot_id: None,
            is_post: false,
            media: None,
            entities: Vec::new(),
        }
    }
}

/// Traversal direction of a windowed history read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanDirection {
    /// From the latest message backwards; `offset_date` is an exclusive upper bound.
    #[default]
    NewestFirst,
    /// From `offset_date` forwards, ascending.
    OldestFirst,
}

impl ScanDirection {
    /// Whether every message newer than a cut-off precedes every older one.
    pub fn yields_newer_first(self) -> bool {
        matches!(self, ScanDirection::NewestFirst)
    }
}

impl std::str::FromStr for ScanDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "newest_first" | "newest" => Ok(ScanDirection::NewestFirst),
            "oldest_first" | "oldest" | "reverse" => Ok(ScanDirection::OldestFirst),
            other => Err(format!("unknown scan direction '{}'", other)),
        }
    }
}

/// Parameters of one windowed history read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryWindow {
    pub offset_date: Option<DateTime<Utc>>,
    pub direction: ScanDirection,
    pub limit: usize,
}

/// Outcome of submitting a login code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInResult {
    Success,
    /// Two-step verification is enabled; a password must follow.
    PasswordRequired { hint: Option<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_key_prefixes_positive_ids() {
        assert_eq!(channel_key(1234567890), "-1001234567890");
        assert_eq!(channel_key(-42), "-42");
    }

    #[test]
    fn native_id_accepts_both_forms() {
        assert_eq!(native_channel_id(-1001234567890), 1234567890);
        assert_eq!(native_channel_id(1234567890), 1234567890);
    }

    #[test]
    fn media_file_names() {
        let doc = SourceMedia::Document {
            id: 1,
            mime_type: Some("application/pdf".into()),
            file_name: Some("report.pdf".into()),
            size: Some(10),
        };
        assert_eq!(doc.file_name(5, 7), "5_7_report.pdf");
        assert_eq!(SourceMedia::Photo { id: 1 }.file_name(5, 7), "5_7.jpg");
    }

    #[test]
    fn document_names_cannot_escape_the_download_dir() {
        let doc = |name: &str| SourceMedia::Document {
            id: 1,
            mime_type: None,
            file_name: Some(name.into()),
            size: None,
        };
        assert_eq!(doc("report/2024.pdf").file_name(5, 7), "5_7_report_2024.pdf");
        assert_eq!(doc("..\\evil\nname").file_name(5, 7), "5_7_.._evil_name");
    }

    #[test]
    fn public_url_needs_a_handle() {
        let mut channel = ChannelIdentity {
            numeric_id: 1,
            display_name: "News".into(),
            public_handle: None,
        };
        assert_eq!(channel.public_url(), None);
        channel.public_handle = Some("news".into());
        assert_eq!(channel.public_url().as_deref(), Some("t.me/news"));
    }

    #[test]
    fn scan_direction_parses() {
        assert_eq!(
            "oldest-first".parse::<ScanDirection>().unwrap(),
            ScanDirection::OldestFirst
        );
        assert!("sideways".parse::<ScanDirection>().is_err());
    }
}
