//! Wiring & DI. Entry point: load config, open the session, inject adapters
//! into use cases, dispatch the subcommand (or the interactive menu).

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tg_crawler::adapters::persistence::{json_artifact::JsonArtifact, watermark_file::WatermarkFile};
use tg_crawler::adapters::telegram::{
    auth_adapter::GrammersAuthAdapter, client::GrammersSource, session::TelegramSession,
};
use tg_crawler::adapters::ui::tui::{InquireLoginPrompt, TuiInputPort};
use tg_crawler::domain::{DomainError, ScanDirection};
use tg_crawler::ports::{ArtifactPort, AuthPort, InputPort, MessageSource, WatermarkPort};
use tg_crawler::shared::config::AppConfig;
use tg_crawler::usecases::{AuthService, CrawlController, DownloadService, Watcher};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Incremental Telegram channel crawler.
#[derive(Parser, Debug)]
#[command(name = "tg-crawler")]
#[command(version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    tg-crawler crawl
    tg-crawler watch --cycle-secs 300
    tg-crawler download --channel -1001234567890 --message 42
    tg-crawler download-records 20240501_210000_telegram_messages.json")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl messages newer than the stored watermark, once
    Crawl {
        /// newest_first or oldest_first (overrides config)
        #[arg(long)]
        direction: Option<ScanDirection>,
    },
    /// Crawl repeatedly on a fixed cycle
    Watch {
        /// Seconds between cycles (overrides config)
        #[arg(long)]
        cycle_secs: Option<u64>,
    },
    /// Download the media of one message (and its album)
    Download {
        /// Channel id, native or -100 prefixed
        #[arg(long, allow_hyphen_values = true)]
        channel: i64,
        /// Message id
        #[arg(long)]
        message: i32,
    },
    /// Download every media item referenced by an output file
    DownloadRecords {
        /// Path to the output JSON file
        artifact: PathBuf,
    },
    /// Sign in and store the session, then exit
    Login,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_loaded = dotenv();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    if let Ok(path) = &env_loaded {
        info!(path = %path.display(), "loaded .env");
    }

    let cli = Cli::parse();

    // Configuration errors abort before any network activity.
    let cfg = AppConfig::load().map_err(|e| anyhow::anyhow!("{}", e))?;
    let api_id = cfg.api_id().map_err(|e| anyhow::anyhow!("{}", e))?;
    let api_hash = cfg.api_hash().map_err(|e| anyhow::anyhow!("{}", e))?;
    let mut direction = cfg.scan_direction().map_err(|e| anyhow::anyhow!("{}", e))?;
    let mut cycle = cfg.watcher_cycle();
    match &cli.command {
        Some(Command::Crawl { direction: Some(d) }) => direction = *d,
        Some(Command::Watch {
            cycle_secs: Some(s),
        }) => cycle = Duration::from_secs(*s),
        _ => {}
    }

    tg_crawler::adapters::ui::init_ui();

    let session = TelegramSession::open(&cfg.session_path(), api_id, cfg.proxy().as_ref()).await?;
    let result = run(cli.command, &cfg, &session, api_hash, direction, cycle).await;
    session.close();
    result.map_err(|e| anyhow::anyhow!("{}", e))
}

async fn run(
    command: Option<Command>,
    cfg: &AppConfig,
    session: &TelegramSession,
    api_hash: String,
    direction: ScanDirection,
    cycle: Duration,
) -> Result<(), DomainError> {
    // --- Auth: adapter + service, then run flow ---
    let auth_adapter: Arc<dyn AuthPort> = Arc::new(GrammersAuthAdapter::new(session.client()));
    AuthService::new(auth_adapter, Arc::new(InquireLoginPrompt), api_hash)
        .ensure_authorized()
        .await?;
    if matches!(command, Some(Command::Login)) {
        return Ok(());
    }

    // --- Adapters ---
    let source: Arc<dyn MessageSource> = Arc::new(GrammersSource::new(session.client()));
    let watermark: Arc<dyn WatermarkPort> = Arc::new(WatermarkFile::new(cfg.watermark_path()));
    let artifacts: Arc<dyn ArtifactPort> = Arc::new(JsonArtifact::new());

    // --- Services ---
    let controller = Arc::new(CrawlController::new(
        Arc::clone(&source),
        Arc::clone(&watermark),
        Arc::clone(&artifacts),
        cfg.exclusions(),
        cfg.output_base(),
        direction,
    ));
    let downloads = Arc::new(DownloadService::new(
        Arc::clone(&source),
        Arc::clone(&artifacts),
        cfg.download_dir(),
        cfg.download_policy(),
    ));
    info!(
        output = %cfg.output_base().display(),
        watermark = %cfg.watermark_path().display(),
        downloads = %downloads.output_dir().display(),
        "services ready"
    );

    match command {
        Some(Command::Crawl { .. }) => controller.run().await.map(|_| ()),
        Some(Command::Watch { .. }) => Watcher::new(controller, cycle).run_loop().await,
        Some(Command::Download { channel, message }) => {
            let summary = downloads.download_message(channel, message).await?;
            info!(
                downloaded = summary.downloaded,
                failed = summary.failed,
                skipped = summary.skipped,
                "download finished"
            );
            Ok(())
        }
        Some(Command::DownloadRecords { artifact }) => {
            downloads.download_from_records(&artifact).await.map(|_| ())
        }
        Some(Command::Login) => Ok(()),
        None => {
            let watcher = Arc::new(Watcher::new(Arc::clone(&controller), cycle));
            let input_port: Arc<dyn InputPort> =
                Arc::new(TuiInputPort::new(source, controller, watcher, downloads));
            input_port.run().await
        }
    }
}
