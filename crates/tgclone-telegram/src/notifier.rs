use async_trait::async_trait;
use teloxide::{prelude::*, types::ParseMode};

use tgclone_core::{
    domain::ChatId, errors::Error, formatting::format_progress_html, ports::ProgressNotifier,
    progress::ProgressSnapshot, Result,
};

/// Posts progress cards to the chat that started the run.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
    chat: ChatId,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, chat: ChatId) -> Self {
        Self { bot, chat }
    }
}

#[async_trait]
impl ProgressNotifier for TelegramNotifier {
    async fn notify(&self, snapshot: &ProgressSnapshot) -> Result<()> {
        self.bot
            .send_message(
                teloxide::types::ChatId(self.chat.0),
                format_progress_html(snapshot),
            )
            .parse_mode(ParseMode::Html)
            .await
            .map_err(|e| Error::External(format!("telegram error: {e}")))?;
        Ok(())
    }
}
