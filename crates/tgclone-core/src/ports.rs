use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, SourceMessage},
    errors::ProviderResult,
    progress::ProgressSnapshot,
    Result,
};

/// Hexagonal port for the messaging provider.
///
/// Telegram (Bot API via teloxide) is the production implementation; tests use
/// an in-memory channel.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    /// One page of history strictly older than `before` (newest page when `None`),
    /// ordered newest-first. An empty page means the start of the channel.
    async fn fetch_history_page(
        &self,
        channel: ChatId,
        before: Option<MessageId>,
        page_size: usize,
    ) -> ProviderResult<Vec<SourceMessage>>;

    async fn send_text(&self, channel: ChatId, text: &str) -> ProviderResult<()>;

    async fn send_media(
        &self,
        channel: ChatId,
        message: &SourceMessage,
        blob: &Path,
        caption: &str,
    ) -> ProviderResult<()>;

    /// Download the media of `message` into `dest_dir`, returning the local file.
    async fn download_media(
        &self,
        message: &SourceMessage,
        dest_dir: &Path,
    ) -> ProviderResult<PathBuf>;
}

/// External observer of run progress (operator chat, dashboard, ...).
#[async_trait]
pub trait ProgressNotifier: Send + Sync {
    async fn notify(&self, snapshot: &ProgressSnapshot) -> Result<()>;
}

/// Notifier for headless runs.
pub struct NoopNotifier;

#[async_trait]
impl ProgressNotifier for NoopNotifier {
    async fn notify(&self, _snapshot: &ProgressSnapshot) -> Result<()> {
        Ok(())
    }
}
