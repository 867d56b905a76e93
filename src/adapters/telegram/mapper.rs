//! Map Grammers types to domain entities.
//!
//! Extracts Dialog, SourceMessage, UserEntity and sender objects from
//! grammers_client tl types.

use crate::domain::{
    ChatType, Dialog, EntityKind, GeoPoint, Sender, SenderAddress, SourceMedia, SourceMessage,
    TextEntity, UserEntity, native_channel_id,
};
use chrono::DateTime;
use grammers_client::peer::Peer;
use grammers_client::tl;
use std::collections::HashMap;

/// Map a grammers Peer to domain ChatType.
///
/// * `Peer::User` → Private (DM).
/// * `Peer::Group` → Group or Supergroup (Supergroup when megagroup).
/// * `Peer::Channel` → Channel (broadcast).
pub fn chat_type_from_peer(peer: &Peer) -> ChatType {
    match peer {
        Peer::User(_) => ChatType::Private,
        Peer::Group(g) => {
            if g.is_megagroup() {
                ChatType::Supergroup
            } else {
                ChatType::Group
            }
        }
        Peer::Channel(_) => ChatType::Channel,
    }
}

pub fn dialog_from_peer(peer: &Peer) -> Dialog {
    let dialog_id = peer.id().bot_api_dialog_id();
    let kind = chat_type_from_peer(peer);
    Dialog {
        dialog_id,
        channel_id: kind.is_channel().then(|| native_channel_id(dialog_id)),
        name: peer
            .name()
            .map(String::from)
            .unwrap_or_else(|| dialog_id.to_string()),
        username: peer.username().map(String::from),
        kind,
    }
}

pub fn is_pinned(raw: &tl::enums::Dialog) -> bool {
    match raw {
        tl::enums::Dialog::Dialog(d) => d.pinned,
        tl::enums::Dialog::Folder(f) => f.pinned,
    }
}

/// Users and chats that arrived with a response, for resolving message senders.
#[derive(Debug, Default)]
pub struct SenderIndex {
    pub users: HashMap<i64, UserEntity>,
    /// Access hashes needed to re-fetch a user later.
    pub user_hashes: HashMap<i64, i64>,
    chats: HashMap<i64, String>,
    channels: HashMap<i64, String>,
}

impl SenderIndex {
    pub fn from_response(users: &[tl::enums::User], chats: &[tl::enums::Chat]) -> Self {
        let mut index = SenderIndex::default();
        for u in users {
            if let tl::enums::User::User(raw) = u {
                if let Some(hash) = raw.access_hash {
                    index.user_hashes.insert(raw.id, hash);
                }
            }
            if let Some(user) = user_from_tl(u) {
                index.users.insert(user.id, user);
            }
        }
        for c in chats {
            match c {
                tl::enums::Chat::Chat(c) => {
                    index.chats.insert(c.id, c.title.clone());
                }
                tl::enums::Chat::Forbidden(c) => {
                    index.chats.insert(c.id, c.title.clone());
                }
                tl::enums::Chat::Channel(c) => {
                    index.channels.insert(c.id, c.title.clone());
                }
                tl::enums::Chat::ChannelForbidden(c) => {
                    index.channels.insert(c.id, c.title.clone());
                }
                tl::enums::Chat::Empty(_) => {}
            }
        }
        index
    }

    pub fn resolve(&self, address: SenderAddress) -> Option<Sender> {
        match address {
            SenderAddress::User(id) => self.users.get(&id).cloned().map(Sender::User),
            SenderAddress::Chat(id) => self.chats.get(&id).map(|title| Sender::Chat {
                id,
                title: title.clone(),
            }),
            SenderAddress::Channel(id) => self.channels.get(&id).map(|title| Sender::Channel {
                id,
                title: title.clone(),
            }),
            SenderAddress::Anonymous => None,
        }
    }
}

pub fn user_from_tl(user: &tl::enums::User) -> Option<UserEntity> {
    match user {
        tl::enums::User::User(u) => Some(UserEntity {
            id: u.id,
            is_bot: u.bot,
            username: u.username.clone(),
            phone: u.phone.clone(),
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
        }),
        tl::enums::User::Empty(_) => None,
    }
}

fn address_from_peer(peer: Option<&tl::enums::Peer>) -> SenderAddress {
    match peer {
        Some(tl::enums::Peer::User(u)) => SenderAddress::User(u.user_id),
        Some(tl::enums::Peer::Chat(c)) => SenderAddress::Chat(c.chat_id),
        Some(tl::enums::Peer::Channel(c)) => SenderAddress::Channel(c.channel_id),
        None => SenderAddress::Anonymous,
    }
}

/// Map a raw message. Empty and service messages yield `None`.
pub fn message_from_tl(
    msg: &tl::enums::Message,
    channel_id: i64,
    senders: &SenderIndex,
) -> Option<SourceMessage> {
    let tl::enums::Message::Message(m) = msg else {
        return None;
    };
    let date = DateTime::from_timestamp(i64::from(m.date), 0).unwrap_or_default();
    let mut out = SourceMessage::new(channel_id, m.id, date);
    out.text = m.message.clone();
    out.post_author = m.post_author.clone();
    out.grouped_id = m.grouped_id;
    out.from = address_from_peer(m.from_id.as_ref());
    out.sender = senders.resolve(out.from);
    out.via_bot_id = m.via_bot_id;
    out.is_post = m.post;
    if let Some(media) = &m.media {
        out.geo = geo_from_media(media);
        out.media = media_from_tl(media);
    }
    out.entities = m
        .entities
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(entity_from_tl)
        .collect();
    Some(out)
}

fn geo_from_media(media: &tl::enums::MessageMedia) -> Option<GeoPoint> {
    let point = match media {
        tl::enums::MessageMedia::Geo(g) => &g.geo,
        tl::enums::MessageMedia::GeoLive(g) => &g.geo,
        tl::enums::MessageMedia::Venue(v) => &v.geo,
        _ => return None,
    };
    match point {
        tl::enums::GeoPoint::Point(p) => Some(GeoPoint {
            lat: p.lat,
            long: p.long,
            accuracy_radius: p.accuracy_radius,
        }),
        tl::enums::GeoPoint::Empty => None,
    }
}

/// Photo, video (document with a video attribute), document, or the media class name.
pub fn media_from_tl(media: &tl::enums::MessageMedia) -> Option<SourceMedia> {
    match media {
        tl::enums::MessageMedia::Empty => None,
        tl::enums::MessageMedia::Photo(p) => match &p.photo {
            Some(tl::enums::Photo::Photo(photo)) => Some(SourceMedia::Photo { id: photo.id }),
            _ => Some(SourceMedia::Other {
                class: "MessageMediaPhoto".into(),
            }),
        },
        tl::enums::MessageMedia::Document(d) => match &d.document {
            Some(tl::enums::Document::Document(doc)) => Some(document_media(doc)),
            _ => Some(SourceMedia::Other {
                class: "MessageMediaDocument".into(),
            }),
        },
        other => Some(SourceMedia::Other {
            class: media_class(other).into(),
        }),
    }
}

fn document_media(doc: &tl::types::Document) -> SourceMedia {
    let mut duration = None;
    let mut file_name = None;
    for attr in &doc.attributes {
        match attr {
            tl::enums::DocumentAttribute::Video(v) => duration = Some(f64::from(v.duration)),
            tl::enums::DocumentAttribute::Filename(f) => file_name = Some(f.file_name.clone()),
            _ => {}
        }
    }
    let mime_type = Some(doc.mime_type.clone()).filter(|m| !m.is_empty());
    match duration {
        Some(_) => SourceMedia::Video {
            id: doc.id,
            duration,
            mime_type,
            size: Some(doc.size),
        },
        None => SourceMedia::Document {
            id: doc.id,
            mime_type,
            file_name,
            size: Some(doc.size),
        },
    }
}

fn media_class(media: &tl::enums::MessageMedia) -> &'static str {
    match media {
        tl::enums::MessageMedia::Geo(_) => "MessageMediaGeo",
        tl::enums::MessageMedia::GeoLive(_) => "MessageMediaGeoLive",
        tl::enums::MessageMedia::Venue(_) => "MessageMediaVenue",
        tl::enums::MessageMedia::Contact(_) => "MessageMediaContact",
        tl::enums::MessageMedia::WebPage(_) => "MessageMediaWebPage",
        tl::enums::MessageMedia::Poll(_) => "MessageMediaPoll",
        tl::enums::MessageMedia::Dice(_) => "MessageMediaDice",
        tl::enums::MessageMedia::Game(_) => "MessageMediaGame",
        tl::enums::MessageMedia::Invoice(_) => "MessageMediaInvoice",
        tl::enums::MessageMedia::Story(_) => "MessageMediaStory",
        _ => "MessageMediaUnsupported",
    }
}

pub fn entity_from_tl(entity: &tl::enums::MessageEntity) -> Option<TextEntity> {
    use tl::enums::MessageEntity as E;

    let plain = |kind: EntityKind, offset: i32, length: i32| TextEntity {
        kind,
        offset,
        length,
        url: None,
        user_id: None,
    };
    Some(match entity {
        E::Mention(e) => plain(EntityKind::Mention, e.offset, e.length),
        E::Hashtag(e) => plain(EntityKind::Hashtag, e.offset, e.length),
        E::Cashtag(e) => plain(EntityKind::Cashtag, e.offset, e.length),
        E::BotCommand(e) => plain(EntityKind::BotCommand, e.offset, e.length),
        E::Url(e) => plain(EntityKind::Url, e.offset, e.length),
        E::Email(e) => plain(EntityKind::Email, e.offset, e.length),
        E::Phone(e) => plain(EntityKind::Phone, e.offset, e.length),
        E::Bold(e) => plain(EntityKind::Bold, e.offset, e.length),
        E::Italic(e) => plain(EntityKind::Italic, e.offset, e.length),
        E::Underline(e) => plain(EntityKind::Underline, e.offset, e.length),
        E::Strike(e) => plain(EntityKind::Strike, e.offset, e.length),
        E::Spoiler(e) => plain(EntityKind::Spoiler, e.offset, e.length),
        E::Code(e) => plain(EntityKind::Code, e.offset, e.length),
        E::Pre(e) => plain(EntityKind::Pre, e.offset, e.length),
        E::Blockquote(e) => plain(EntityKind::Blockquote, e.offset, e.length),
        E::BankCard(e) => plain(EntityKind::BankCard, e.offset, e.length),
        E::CustomEmoji(e) => plain(EntityKind::CustomEmoji, e.offset, e.length),
        E::Unknown(e) => plain(EntityKind::Unknown, e.offset, e.length),
        E::TextUrl(e) => TextEntity {
            url: Some(e.url.clone()),
            ..plain(EntityKind::TextUrl, e.offset, e.length)
        },
        E::MentionName(e) => TextEntity {
            user_id: Some(e.user_id),
            ..plain(EntityKind::MentionName, e.offset, e.length)
        },
        _ => return None,
    })
}

/// Seconds from a `FLOOD_WAIT_<n>` / `FLOOD_PREMIUM_WAIT_<n>` error text.
pub fn flood_wait_from_text(text: &str) -> Option<u64> {
    let rest = text.split("WAIT_").nth(1)?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}
