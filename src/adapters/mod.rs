//! Infrastructure adapters. Implement outbound ports.
//!
//! Telegram, filesystem, terminal UI. Map errors to DomainError.

pub mod memory;
pub mod persistence;
pub mod telegram;
pub mod ui;
