//! Implements InputPort and LoginPrompt. Inquire-based interactive menu and prompts.

use crate::domain::{ChatType, Dialog, DomainError};
use crate::ports::{InputPort, LoginPrompt, MessageSource};
use crate::usecases::{CrawlController, DownloadService, DownloadSummary, Watcher};
use async_trait::async_trait;
use inquire::ui::{RenderConfig, Styled};
use inquire::{CustomType, Password, PasswordDisplayMode, Select, Text};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

fn chat_type_indicator(kind: ChatType) -> &'static str {
    match kind {
        ChatType::Private => "[U]",
        ChatType::Group => "[G]",
        ChatType::Supergroup => "[S]",
        ChatType::Channel => "[C]",
    }
}

fn prompt_error(e: inquire::InquireError) -> DomainError {
    DomainError::Io(format!("prompt: {}", e))
}

/// Colored prompts with a plain `>` prefix for every later inquire prompt.
pub fn apply_theme() {
    inquire::set_global_render_config(
        RenderConfig::default_colored().with_prompt_prefix(Styled::new(">")),
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuAction {
    Crawl,
    Watch,
    DownloadMessage,
    DownloadRecords,
    Exit,
}

impl MenuAction {
    const ALL: [MenuAction; 5] = [
        MenuAction::Crawl,
        MenuAction::Watch,
        MenuAction::DownloadMessage,
        MenuAction::DownloadRecords,
        MenuAction::Exit,
    ];
}

impl fmt::Display for MenuAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MenuAction::Crawl => "Crawl new channel messages",
            MenuAction::Watch => "Watch (crawl on a fixed cycle)",
            MenuAction::DownloadMessage => "Download media of one message",
            MenuAction::DownloadRecords => "Download media listed in an output file",
            MenuAction::Exit => "Exit",
        })
    }
}

struct ChannelChoice(Dialog);

impl fmt::Display for ChannelChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({})",
            chat_type_indicator(self.0.kind),
            self.0.name,
            self.0.dialog_id
        )
    }
}

fn print_summary(summary: &DownloadSummary) {
    println!(
        "downloaded: {}, failed: {}, skipped: {}",
        summary.downloaded, summary.failed, summary.skipped
    );
}

/// TUI adapter. Main menu loop until Exit.
pub struct TuiInputPort {
    source: Arc<dyn MessageSource>,
    controller: Arc<CrawlController>,
    watcher: Arc<Watcher>,
    downloads: Arc<DownloadService>,
}

impl TuiInputPort {
    pub fn new(
        source: Arc<dyn MessageSource>,
        controller: Arc<CrawlController>,
        watcher: Arc<Watcher>,
        downloads: Arc<DownloadService>,
    ) -> Self {
        Self {
            source,
            controller,
            watcher,
            downloads,
        }
    }

    async fn download_message(&self) -> Result<(), DomainError> {
        let channels: Vec<ChannelChoice> = self
            .source
            .list_channels()
            .await?
            .into_iter()
            .filter(|d| d.kind.is_channel())
            .map(ChannelChoice)
            .collect();
        if channels.is_empty() {
            println!("No channels visible to this account.");
            return Ok(());
        }
        let channel = Select::new("Channel", channels)
            .prompt()
            .map_err(prompt_error)?;
        let message_id = CustomType::<i32>::new("Message id")
            .with_error_message("Enter a numeric message id")
            .prompt()
            .map_err(prompt_error)?;
        let summary = self
            .downloads
            .download_message(channel.0.dialog_id, message_id)
            .await?;
        print_summary(&summary);
        Ok(())
    }

    async fn download_records(&self) -> Result<(), DomainError> {
        let path = Text::new("Output file with records")
            .prompt()
            .map_err(prompt_error)?;
        let summary = self
            .downloads
            .download_from_records(&PathBuf::from(path.trim()))
            .await?;
        print_summary(&summary);
        Ok(())
    }
}

#[async_trait]
impl InputPort for TuiInputPort {
    async fn run(&self) -> Result<(), DomainError> {
        loop {
            let action = Select::new("What do you want to do?", MenuAction::ALL.to_vec())
                .prompt()
                .map_err(prompt_error)?;
            let outcome = match action {
                MenuAction::Crawl => self.controller.run().await.map(|stats| {
                    println!(
                        "{} new records from {} channels ({} excluded, {} errors)",
                        stats.records, stats.channels_scanned, stats.excluded, stats.errors
                    );
                    if let Some(path) = stats.artifact {
                        println!("saved to {}", path.display());
                    }
                }),
                MenuAction::Watch => self.watcher.run_loop().await,
                MenuAction::DownloadMessage => self.download_message().await,
                MenuAction::DownloadRecords => self.download_records().await,
                MenuAction::Exit => return Ok(()),
            };
            match outcome {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => println!("Failed: {}", e),
            }
        }
    }
}

/// Terminal prompts for the login flow.
#[derive(Debug, Default)]
pub struct InquireLoginPrompt;

impl LoginPrompt for InquireLoginPrompt {
    fn phone(&self) -> Result<String, DomainError> {
        Text::new("Phone number (international format):")
            .prompt()
            .map_err(|e| DomainError::Auth(e.to_string()))
    }

    fn code(&self) -> Result<String, DomainError> {
        Text::new("Login code:")
            .prompt()
            .map_err(|e| DomainError::Auth(e.to_string()))
    }

    fn password(&self, hint: Option<&str>) -> Result<String, DomainError> {
        let label = match hint {
            Some(h) => format!("2FA password (hint: {}):", h),
            None => "2FA password:".to_string(),
        };
        Password::new(&label)
            .without_confirmation()
            .with_display_mode(PasswordDisplayMode::Masked)
            .prompt()
            .map_err(|e| DomainError::Auth(e.to_string()))
    }
}
