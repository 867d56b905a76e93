//! Session lifecycle. Opens the SQLite session file, starts the sender pool and
//! hands out the client; `close` stops the network runner at the end of a run.

use crate::shared::config::ProxyConfig;
use grammers_client::{Client, SenderPool};
use grammers_session::storages::SqliteSession;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Opens a persistent session storage at the given path.
///
/// The file is created if it does not exist. Parent directories are created as needed.
pub async fn open_file_session(path: impl AsRef<Path>) -> anyhow::Result<SqliteSession> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| anyhow::anyhow!("create session directory: {}", e))?;
    }
    SqliteSession::open(path)
        .await
        .map_err(|e| anyhow::anyhow!("open session file {}: {}", path.display(), e))
}

/// A connected client plus the task driving its connection.
pub struct TelegramSession {
    client: Client,
    runner: JoinHandle<()>,
}

impl TelegramSession {
    /// Open the session file and start the connection runner.
    pub async fn open(
        session_path: &Path,
        api_id: i32,
        proxy: Option<&ProxyConfig>,
    ) -> anyhow::Result<Self> {
        if let Some(p) = proxy {
            // Not routed: this grammers SenderPool takes no proxy connector.
            warn!(
                kind = ?p.kind,
                addr = %p.addr,
                port = p.port,
                "proxy configured but not supported by the connection layer; connecting directly"
            );
        }
        let session = Arc::new(open_file_session(session_path).await?);
        let pool = SenderPool::new(session, api_id);
        let handle = pool.handle.clone();
        let runner = tokio::spawn(async move {
            pool.runner.run().await;
        });
        info!(path = %session_path.display(), "telegram session opened");
        Ok(Self {
            client: Client::new(handle),
            runner,
        })
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Stop the connection runner. Pending requests fail.
    pub fn close(self) {
        self.runner.abort();
        info!("telegram session closed");
    }
}
