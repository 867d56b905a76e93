//! Telegram adapter: grammers session, auth, message source and TL mapping.

pub mod auth_adapter;
pub mod client;
pub mod mapper;
pub mod session;
