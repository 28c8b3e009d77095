//! Telegram adapter (teloxide).
//!
//! Implements the `tgclone-core` ports over the Bot API and hosts the
//! operator control bot.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use teloxide::{net::Download, prelude::*, types::InputFile};

pub mod handlers;
mod history;
pub mod notifier;
pub mod router;

pub use notifier::TelegramNotifier;

use history::{map_request_error, BotForwarder, HistoryWalker};
use tgclone_core::{
    config::Config,
    domain::{ChatId, MediaKind, MediaRef, MessageBody, MessageId, SourceMessage},
    errors::{Error, ProviderError, ProviderResult},
    ports::ChannelProvider,
    Result,
};

/// `ChannelProvider` over the Bot API.
///
/// The Bot API has no history call, so messages are inspected by forwarding
/// them into a scratch chat and deleting the copy.
pub struct TelegramProvider {
    bot: Bot,
    scratch: ChatId,
    history: HistoryWalker,
}

impl TelegramProvider {
    pub fn new(bot: Bot, cfg: &Config) -> Result<Self> {
        let scratch = cfg
            .scratch_chat_id
            .or_else(|| cfg.telegram_allowed_users.first().map(|&u| ChatId(u)))
            .ok_or_else(|| Error::Config("no scratch chat for history inspection".to_string()))?;
        let history = HistoryWalker::new(
            Box::new(BotForwarder::new(bot.clone(), scratch)),
            cfg.source_head_id,
        );
        Ok(Self {
            bot,
            scratch,
            history,
        })
    }

    /// Chat that receives (and loses) the forwarded copies used to read history.
    pub fn scratch_chat(&self) -> ChatId {
        self.scratch
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }
}

/// Local file name for a downloaded payload; keeps the original name when known.
fn download_name(message: &SourceMessage, media: &MediaRef) -> String {
    let ext = match media.kind {
        MediaKind::Photo => "jpg",
        MediaKind::Video => "mp4",
        MediaKind::Animation => "mp4",
        MediaKind::Audio => "mp3",
        MediaKind::Voice => "ogg",
        MediaKind::Document => "bin",
    };
    match media.file_name.as_deref().map(sanitize_file_name) {
        Some(name) if !name.is_empty() => format!("{}_{name}", message.id),
        _ => format!("{}.{ext}", message.id),
    }
}

fn sanitize_file_name(name: &str) -> String {
    name.rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .replace('\0', "")
        .trim_start_matches('.')
        .to_string()
}

macro_rules! send_with_caption {
    ($req:expr, $caption:expr) => {{
        let mut req = $req;
        if !$caption.is_empty() {
            req = req.caption($caption.to_string());
        }
        req.await.map(|_| ())
    }};
}

#[async_trait]
impl ChannelProvider for TelegramProvider {
    async fn fetch_history_page(
        &self,
        channel: ChatId,
        before: Option<MessageId>,
        page_size: usize,
    ) -> ProviderResult<Vec<SourceMessage>> {
        self.history.fetch_page(channel, before, page_size).await
    }

    async fn send_text(&self, channel: ChatId, text: &str) -> ProviderResult<()> {
        self.bot
            .send_message(Self::tg_chat(channel), text.to_string())
            .await
            .map(|_| ())
            .map_err(map_request_error)
    }

    async fn send_media(
        &self,
        channel: ChatId,
        message: &SourceMessage,
        blob: &Path,
        caption: &str,
    ) -> ProviderResult<()> {
        let MessageBody::Media { media, .. } = &message.body else {
            return Err(ProviderError::Failed(format!(
                "message {} carries no media",
                message.id
            )));
        };
        let chat = Self::tg_chat(channel);
        let file = InputFile::file(blob.to_path_buf());

        let res = match media.kind {
            MediaKind::Photo => send_with_caption!(self.bot.send_photo(chat, file), caption),
            MediaKind::Video => send_with_caption!(self.bot.send_video(chat, file), caption),
            MediaKind::Animation => {
                send_with_caption!(self.bot.send_animation(chat, file), caption)
            }
            MediaKind::Audio => send_with_caption!(self.bot.send_audio(chat, file), caption),
            MediaKind::Voice => send_with_caption!(self.bot.send_voice(chat, file), caption),
            MediaKind::Document => {
                send_with_caption!(self.bot.send_document(chat, file), caption)
            }
        };
        res.map_err(map_request_error)
    }

    async fn download_media(
        &self,
        message: &SourceMessage,
        dest_dir: &Path,
    ) -> ProviderResult<PathBuf> {
        let MessageBody::Media { media, .. } = &message.body else {
            return Err(ProviderError::Failed(format!(
                "message {} carries no media",
                message.id
            )));
        };

        let file = self
            .bot
            .get_file(media.file_id.clone())
            .await
            .map_err(map_request_error)?;

        let path = dest_dir.join(download_name(message, media));
        let mut dst = tokio::fs::File::create(&path)
            .await
            .map_err(|e| ProviderError::Failed(format!("create {}: {e}", path.display())))?;
        if let Err(e) = self.bot.download_file(&file.path, &mut dst).await {
            drop(dst);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(ProviderError::Failed(format!("download failed: {e}")));
        }
        Ok(path)
    }
}
