//! Domain errors. Used by ports and use cases.
//!
//! Adapters map infrastructure errors into these.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    /// Missing or invalid settings. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Telegram gateway error: {0}")]
    TgGateway(String),

    /// Channel, message or user could not be looked up. Callers skip the unit.
    #[error("Entity resolution failed: {0}")]
    Resolution(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Artifact error: {0}")]
    Artifact(String),

    /// Persisted data could not be parsed. Treated as absent by callers.
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Media download failed: {0}")]
    Media(String),

    /// The platform asked us to wait `seconds` before the next request of this kind.
    #[error("FloodWait: retry after {seconds} seconds")]
    FloodWait { seconds: u64 },

    #[error("Download deadline of {seconds}s exceeded")]
    DeadlineExceeded { seconds: u64 },

    /// No space left on the destination device. Never retried.
    #[error("Storage exhausted: {0}")]
    StorageExhausted(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl DomainError {
    /// Map a filesystem error, keeping disk-full apart from everything else.
    pub fn from_io(e: &std::io::Error) -> Self {
        if is_storage_full(e) {
            DomainError::StorageExhausted(e.to_string())
        } else {
            DomainError::Io(e.to_string())
        }
    }

    /// True for errors that must abort the enclosing download batch.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DomainError::StorageExhausted(_) | DomainError::Config(_))
    }
}

/// ENOSPC on unix, ERROR_DISK_FULL on windows.
const ENOSPC: i32 = 28;
const ERROR_DISK_FULL: i32 = 112;

fn is_storage_full(e: &std::io::Error) -> bool {
    if e.kind() == std::io::ErrorKind::StorageFull {
        return true;
    }
    match e.raw_os_error() {
        Some(code) if cfg!(windows) => code == ERROR_DISK_FULL,
        Some(code) => code == ENOSPC,
        None => e.to_string().contains("No space left"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn disk_full_maps_to_storage_exhausted() {
        let e = io::Error::from(io::ErrorKind::StorageFull);
        assert!(matches!(
            DomainError::from_io(&e),
            DomainError::StorageExhausted(_)
        ));
        let e = io::Error::other("write failed: No space left on device");
        assert!(DomainError::from_io(&e).is_fatal());
    }

    #[test]
    fn other_io_errors_are_transient() {
        let e = io::Error::from(io::ErrorKind::ConnectionReset);
        let mapped = DomainError::from_io(&e);
        assert!(matches!(mapped, DomainError::Io(_)));
        assert!(!mapped.is_fatal());
    }
}
