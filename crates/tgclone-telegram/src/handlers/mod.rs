//! Telegram update handlers for the control bot.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use tgclone_core::{domain::UserId, security::is_authorized};

use crate::router::AppState;

mod commands;

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let user_id = msg.from().map(|u| UserId(u.id.0 as i64));

    if !is_authorized(user_id, &state.cfg.telegram_allowed_users) {
        tracing::warn!(user = ?user_id.map(|u| u.0), "unauthorized control attempt");
        let _ = bot
            .send_message(
                msg.chat.id,
                "Unauthorized. Contact the bot owner for access.",
            )
            .await;
        return Ok(());
    }

    match msg.text() {
        Some(text) if text.starts_with('/') => commands::handle_command(bot, msg, state).await,
        _ => {
            let _ = bot
                .send_message(msg.chat.id, "Send /help for the list of commands.")
                .await;
            Ok(())
        }
    }
}
