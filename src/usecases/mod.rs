//! Application use cases. Orchestrate domain logic via ports.

pub mod album_resolver;
pub mod auth_service;
pub mod crawl_controller;
pub mod download_executor;
pub mod download_service;
pub mod transformer;
pub mod watcher;

pub use album_resolver::AlbumResolver;
pub use auth_service::AuthService;
pub use crawl_controller::{CrawlController, CrawlStats};
pub use download_executor::{DownloadExecutor, DownloadPolicy};
pub use download_service::{DownloadService, DownloadSummary};
pub use transformer::MessageTransformer;
pub use watcher::Watcher;
