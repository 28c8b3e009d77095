use std::sync::Arc;

use teloxide::Bot;

use tgclone_core::{config::Config, supervisor::Supervisor};
use tgclone_telegram::TelegramProvider;

#[tokio::main]
async fn main() -> Result<(), tgclone_core::Error> {
    tgclone_core::logging::init("tgclone")?;

    let cfg = Arc::new(Config::load()?);
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    let provider = Arc::new(TelegramProvider::new(bot.clone(), &cfg)?);
    tracing::info!(
        scratch_chat = provider.scratch_chat().0,
        head_hint = ?cfg.source_head_id,
        "telegram provider ready"
    );
    let supervisor = Supervisor::new(cfg.clone(), provider);

    tgclone_telegram::router::run_polling(bot, cfg, supervisor)
        .await
        .map_err(|e| tgclone_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
