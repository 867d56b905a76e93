//! Core domain layer. No external I/O dependencies.
//!
//! Entities, persisted records and business rules live here. Dependencies flow inward.

pub mod channels;
pub mod entities;
pub mod errors;
pub mod records;

pub use channels::{ChannelDirectory, ExclusionList};
pub use entities::{
    ChannelIdentity, ChatType, Dialog, EntityKind, GeoPoint, HistoryWindow, ScanDirection, Sender,
    SenderAddress, SignInResult, SourceMedia, SourceMessage, TextEntity, UserEntity, channel_key,
    native_channel_id,
};
pub use errors::DomainError;
pub use records::{
    DownloadCoordinates, EntityRecord, MediaDescriptor, MediaKind, MessageRecord,
    SenderDescriptor, UserProfile,
};
