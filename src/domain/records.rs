//! Structured message records as they are written to the output artifact.
//!
//! Field names follow the artifact's established JSON shape, so artifacts from
//! earlier runs merge with new ones.

use crate::domain::entities::{GeoPoint, SenderAddress};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One crawled message. Created by the transformer; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Raw numeric channel id; also the record's key inside the artifact.
    #[serde(skip)]
    pub channel_id: i64,
    pub channel_name: String,
    pub message_id: i32,
    #[serde(rename = "message")]
    pub text: String,
    #[serde(rename = "message_from_geo")]
    pub geo: Option<GeoPoint>,
    #[serde(rename = "JST_send_time")]
    pub sent_at: String,
    #[serde(rename = "display_of_post_author")]
    pub author_display: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<EntityRecord>,
    #[serde(flatten)]
    pub sender: SenderDescriptor,
}

impl MessageRecord {
    /// `{"<channel_id>": record}`, the unit stored in the artifact array.
    pub fn to_keyed_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        let mut keyed = serde_json::Map::new();
        keyed.insert(self.channel_id.to_string(), serde_json::to_value(self)?);
        Ok(serde_json::Value::Object(keyed))
    }
}

/// Who sent a message: structural address, bot flag and (for humans) a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderDescriptor {
    #[serde(rename = "from_id")]
    pub address: SenderAddress,
    #[serde(rename = "sender_user", default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<UserProfile>,
    #[serde(rename = "bot")]
    pub is_bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "user_id")]
    pub id: i64,
    pub username: Option<String>,
    pub phone: Option<String>,
    #[serde(rename = "Firstname")]
    pub first_name: Option<String>,
    #[serde(rename = "Lastname")]
    pub last_name: Option<String>,
}

/// Minimal handle to re-locate a media item in a later, separate run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadCoordinates {
    pub channel_id: i64,
    pub message_id: i32,
    #[serde(default)]
    pub grouped_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MediaKind {
    Photo {
        photo_id: i64,
    },
    Video {
        video_id: i64,
        duration: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_size: Option<i64>,
    },
    Document {
        document_id: i64,
        mime_type: Option<String>,
        file_name: Option<String>,
        file_size: Option<i64>,
    },
    Other {
        media_class: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    #[serde(flatten)]
    pub kind: MediaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouped_id: Option<i64>,
    #[serde(default)]
    pub is_grouped: bool,
    pub message_id: i32,
    pub channel_id: i64,
    pub download_info: DownloadCoordinates,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub offset: i32,
    pub length: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

// `from_id` is a single-key object: {"peerUser": 1}, {"peerChat": 2},
// {"peerChannel": 3} or {"anonymous": null}.

const PEER_USER: &str = "peerUser";
const PEER_CHAT: &str = "peerChat";
const PEER_CHANNEL: &str = "peerChannel";
const ANONYMOUS: &str = "anonymous";

impl Serialize for SenderAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            SenderAddress::User(id) => map.serialize_entry(PEER_USER, id)?,
            SenderAddress::Chat(id) => map.serialize_entry(PEER_CHAT, id)?,
            SenderAddress::Channel(id) => map.serialize_entry(PEER_CHANNEL, id)?,
            SenderAddress::Anonymous => map.serialize_entry(ANONYMOUS, &None::<i64>)?,
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for SenderAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AddressVisitor;

        impl<'de> Visitor<'de> for AddressVisitor {
            type Value = SenderAddress;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a single-key sender address object")
            }

            fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Self::Value, A::Error> {
                let entries: BTreeMap<String, Option<i64>> =
                    Deserialize::deserialize(de::value::MapAccessDeserializer::new(map))?;
                let mut iter = entries.into_iter();
                let address = match iter.next() {
                    Some((k, Some(id))) if k == PEER_USER => SenderAddress::User(id),
                    Some((k, Some(id))) if k == PEER_CHAT => SenderAddress::Chat(id),
                    Some((k, Some(id))) if k == PEER_CHANNEL => SenderAddress::Channel(id),
                    Some((k, None)) if k == ANONYMOUS => SenderAddress::Anonymous,
                    None => SenderAddress::Anonymous,
                    Some((k, _)) => {
                        return Err(de::Error::unknown_field(
                            &k,
                            &[PEER_USER, PEER_CHAT, PEER_CHANNEL, ANONYMOUS],
                        ));
                    }
                };
                if iter.next().is_some() {
                    return Err(de::Error::invalid_length(2, &self));
                }
                Ok(address)
            }
        }

        deserializer.deserialize_map(AddressVisitor)
    }
}
